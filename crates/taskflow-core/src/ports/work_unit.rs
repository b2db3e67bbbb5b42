//! WorkUnit port - "processing" と "done" の間に行う実際の仕事
//!
//! # 実装
//! - **FixedDelay**: 一定時間待つだけ（本番のデフォルト）
//! - **NoWork**: 即座に完了（テスト用）

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{TaskId, WorkError};

#[async_trait]
pub trait WorkUnit: Send + Sync {
    async fn perform(&self, task_id: &TaskId) -> Result<(), WorkError>;
}

/// Holds the handling task for a fixed duration.
///
/// The consumer awaits this inline, so nothing else is pulled or handled
/// while it runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl WorkUnit for FixedDelay {
    async fn perform(&self, task_id: &TaskId) -> Result<(), WorkError> {
        tracing::debug!(task_id = %task_id, delay_ms = self.delay.as_millis() as u64, "working");
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoWork;

#[async_trait]
impl WorkUnit for NoWork {
    async fn perform(&self, _task_id: &TaskId) -> Result<(), WorkError> {
        Ok(())
    }
}
