//! Producer - タスク作成時に処理リクエストを publish
//!
//! # フロー
//! 1. task row が store に commit された後に呼ばれる（前には呼ばない）
//! 2. `{key: task_id, value: task_id bytes, timestamp: now}` を topic に publish
//! 3. 失敗はそのまま返す。作成処理を失敗にするかは呼び出し側（TaskService）が決める

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::{ChannelError, Message, TaskId};
use crate::ports::{Clock, Publisher, SystemClock};

pub struct Producer {
    publisher: Arc<dyn Publisher>,
    topic: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl Producer {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            timeout,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one message with the configured per-publish timeout.
    pub async fn send_message(&self, message: Message) -> Result<(), ChannelError> {
        debug!(topic = %self.topic, key = %message.key, "publishing message");
        self.publisher
            .publish(&self.topic, message, self.timeout)
            .await
    }

    /// Enqueue the processing request for `task_id`.
    pub async fn publish_task(&self, task_id: &TaskId) -> Result<(), ChannelError> {
        self.send_message(Message::for_task(task_id, self.clock.now()))
            .await
    }
}
