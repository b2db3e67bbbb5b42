//! InMemoryChannel - 開発用・テスト用のメッセージチャネル
//!
//! # 実装詳細
//! - topic ごとの追記ログ（offset = ログ上の位置）
//! - consumer group ごとの cursor（= 最初の未 ack offset）
//! - ack はメッセージ単位。後ろのメッセージを ack しても、失敗したメッセージより先に
//!   cursor は進まない
//! - 新しい subscription（再起動）と `redeliver_uncommitted`（rebalance）は読み位置を
//!   cursor に巻き戻す。ack 済みのメッセージは読み飛ばす
//! - 読み位置は subscription 自身が持つ（drop すれば消える）
//! - tokio::sync::Mutex + Notify で blocking receive

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::domain::{ChannelError, Message};
use crate::ports::{Delivery, MessageSource, Publisher, RequiredAcks};

#[derive(Default)]
struct GroupState {
    /// First offset not yet acknowledged.
    cursor: u64,
    /// Acknowledged offsets at or beyond `cursor`.
    acked: BTreeSet<u64>,
    /// Bumped on rebalance; subscriptions rewind when they see a new value.
    generation: u64,
}

impl GroupState {
    fn ack(&mut self, offset: u64) {
        if offset >= self.cursor {
            self.acked.insert(offset);
        }
        while self.acked.remove(&self.cursor) {
            self.cursor += 1;
        }
    }

    fn acknowledged(&self) -> Vec<u64> {
        (0..self.cursor).chain(self.acked.iter().copied()).collect()
    }
}

#[derive(Default)]
struct TopicState {
    log: Vec<Message>,
    groups: HashMap<String, GroupState>,
}

struct ReadPosition {
    position: u64,
    generation: u64,
}

#[derive(Default)]
struct ChannelState {
    topics: HashMap<String, TopicState>,
    closed: bool,
    failing_publishes: u32,
    failing_commits: u32,
    publish_latency: Duration,
}

impl ChannelState {
    fn next_delivery(&self, topic: &str, group: &str, read: &mut ReadPosition) -> Option<Delivery> {
        let topic = self.topics.get(topic)?;
        let group = topic.groups.get(group)?;

        if read.generation != group.generation {
            read.position = group.cursor;
            read.generation = group.generation;
        }
        read.position = read.position.max(group.cursor);

        while (read.position as usize) < topic.log.len() {
            let offset = read.position;
            read.position += 1;
            if group.acked.contains(&offset) {
                continue;
            }
            return Some(Delivery {
                message: topic.log[offset as usize].clone(),
                offset,
            });
        }
        None
    }

    fn group_mut(&mut self, topic: &str, group: &str) -> Option<&mut GroupState> {
        self.topics.get_mut(topic)?.groups.get_mut(group)
    }

    fn group(&self, topic: &str, group: &str) -> Option<&GroupState> {
        self.topics.get(topic)?.groups.get(group)
    }
}

/// In-memory broker shared by producers and subscriptions (cheap to clone).
#[derive(Clone)]
pub struct InMemoryChannel {
    state: Arc<Mutex<ChannelState>>,
    notify: Arc<Notify>,
    required_acks: RequiredAcks,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::with_required_acks(RequiredAcks::default())
    }

    pub fn with_required_acks(required_acks: RequiredAcks) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState::default())),
            notify: Arc::new(Notify::new()),
            required_acks,
        }
    }

    /// Join `group` on `topic`. Reading starts at the group's cursor, so a
    /// fresh subscription (consumer restart) sees every unacknowledged message.
    pub async fn subscribe(&self, topic: &str, group: &str) -> InMemorySubscription {
        let mut state = self.state.lock().await;
        let group_state = state
            .topics
            .entry(topic.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        let read = ReadPosition {
            position: group_state.cursor,
            generation: group_state.generation,
        };

        InMemorySubscription {
            topic: topic.to_string(),
            group: group.to_string(),
            read: Mutex::new(read),
            channel: self.clone(),
        }
    }

    /// Simulate a rebalance: every subscription of `group` goes back to the
    /// cursor and sees the unacknowledged messages again.
    pub async fn redeliver_uncommitted(&self, topic: &str, group: &str) {
        {
            let mut state = self.state.lock().await;
            if let Some(group) = state.group_mut(topic, group) {
                group.generation += 1;
            }
        }
        self.notify.notify_waiters();
    }

    /// Close the connection; every pending and future `receive` fails.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn fail_next_publishes(&self, n: u32) {
        self.state.lock().await.failing_publishes = n;
    }

    pub async fn fail_next_commits(&self, n: u32) {
        self.state.lock().await.failing_commits = n;
    }

    /// Delay applied to every publish before it reaches the log.
    pub async fn set_publish_latency(&self, latency: Duration) {
        self.state.lock().await.publish_latency = latency;
    }

    /// The group's cursor (first unacknowledged offset).
    pub async fn cursor(&self, topic: &str, group: &str) -> u64 {
        let state = self.state.lock().await;
        state.group(topic, group).map_or(0, |g| g.cursor)
    }

    /// Offsets acknowledged by `group`, ascending.
    pub async fn acknowledged(&self, topic: &str, group: &str) -> Vec<u64> {
        let state = self.state.lock().await;
        state
            .group(topic, group)
            .map(GroupState::acknowledged)
            .unwrap_or_default()
    }

    /// Everything published to `topic`, in offset order.
    pub async fn published(&self, topic: &str) -> Vec<Message> {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|t| t.log.clone())
            .unwrap_or_default()
    }

    async fn append(&self, topic: &str, message: Message) -> Result<(), ChannelError> {
        let latency = self.state.lock().await.publish_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(ChannelError::Transport("injected publish failure".to_string()));
        }
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .log
            .push(message);
        Ok(())
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for InMemoryChannel {
    async fn publish(
        &self,
        topic: &str,
        message: Message,
        timeout: Duration,
    ) -> Result<(), ChannelError> {
        let result = match tokio::time::timeout(timeout, self.append(topic, message)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(timeout)),
        };
        if result.is_ok() {
            self.notify.notify_waiters();
        }

        match (self.required_acks, result) {
            // acks=none: broker 側の失敗は producer に届かない
            (RequiredAcks::None, Err(ChannelError::Transport(reason))) => {
                tracing::debug!(topic, %reason, "publish lost without acknowledgement");
                Ok(())
            }
            (_, result) => result,
        }
    }
}

/// One consumer's view of a group.
pub struct InMemorySubscription {
    topic: String,
    group: String,
    read: Mutex<ReadPosition>,
    channel: InMemoryChannel,
}

#[async_trait]
impl MessageSource for InMemorySubscription {
    async fn receive(&self) -> Result<Delivery, ChannelError> {
        loop {
            // publish より前に登録しておかないと通知を取りこぼす
            let notified = self.channel.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut read = self.read.lock().await;
                let state = self.channel.state.lock().await;
                if state.closed {
                    return Err(ChannelError::Closed);
                }
                if let Some(delivery) = state.next_delivery(&self.topic, &self.group, &mut read) {
                    return Ok(delivery);
                }
            }

            notified.await;
        }
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut state = self.channel.state.lock().await;
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(ChannelError::Transport("injected commit failure".to_string()));
        }
        let group = state
            .group_mut(&self.topic, &self.group)
            .ok_or_else(|| ChannelError::Transport(format!("unknown group {}", self.group)))?;

        group.ack(delivery.offset);
        Ok(())
    }
}
