//! MessageHandler port - 1 メッセージごとの処理
//!
//! グローバル登録はしません。handler は subscription 開始時に明示的に渡します。
//! `Err` は「commit しない」、`Ok` は「commit して次へ」を意味します。

use std::future::Future;

use async_trait::async_trait;

use crate::domain::{HandleError, Message};

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandleError>;
}

/// Any `Fn(Message) -> Future` closure is a handler.
///
/// ```ignore
/// consumer.run(&|msg: Message| async move {
///     println!("got {}", msg.key);
///     Ok(())
/// }).await?;
/// ```
#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandleError>> + Send + 'static,
{
    async fn handle(&self, message: &Message) -> Result<(), HandleError> {
        (self)(message.clone()).await
    }
}
