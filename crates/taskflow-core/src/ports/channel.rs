//! Message channel port - publish / subscribe with manual acknowledgement
//!
//! チャネル自体（broker への transport）はここでは実装しません。
//! - **Publisher**: 1 回の publish = broker に 1 メッセージを durable に積む
//! - **MessageSource**: consumer group 配下の 1 subscription（受信 + 手動 commit）
//!
//! commit 規律（handler 成功まで commit しない）は `app::consumer_loop` が持ちます。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{ChannelError, Message};

/// Broker acknowledgement level required before a publish counts as done.
/// A deployment parameter, not a per-call choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequiredAcks {
    /// Fire-and-forget: broker-side failures are never reported back.
    None,
    /// The partition leader has written the message.
    #[default]
    Leader,
    /// All in-sync replicas have written the message.
    All,
}

/// Publish side.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Durably enqueue one message on `topic`.
    ///
    /// Exceeding `timeout` yields `ChannelError::Timeout`; the caller decides
    /// whether to retry.
    async fn publish(
        &self,
        topic: &str,
        message: Message,
        timeout: Duration,
    ) -> Result<(), ChannelError>;
}

/// A received message plus the channel position it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: Message,
    pub offset: u64,
}

/// Consume side: one subscription under a named consumer group.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message.
    ///
    /// An `Err` here is fatal for the consumer (connection closed etc.).
    async fn receive(&self) -> Result<Delivery, ChannelError>;

    /// Acknowledge one delivery, advancing the group's cursor past it once
    /// everything before it is acknowledged too.
    async fn commit(&self, delivery: &Delivery) -> Result<(), ChannelError>;
}
