//! TaskProcessor - メッセージごとのビジネス遷移
//!
//! # フロー
//! 1. status を `processing` に書く
//! 2. WorkUnit を実行（デフォルトは固定遅延。consumer はその間止まる）
//! 3. status を `done` に書く
//!
//! どちらの書き込みも独立した commit です。途中でプロセスが落ちると
//! `processing` のまま残ります。
//!
//! not-found も一時的な失敗と同じく `Err` で返します（commit されない）。
//! 存在しないタスクのメッセージは channel が再配送する限り失敗し続けます。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::{HandleError, Message, TaskId, TaskStatus};
use crate::ports::{MessageHandler, StatusStore, WorkUnit};

pub struct TaskProcessor {
    store: Arc<dyn StatusStore>,
    work: Arc<dyn WorkUnit>,
}

impl TaskProcessor {
    pub fn new(store: Arc<dyn StatusStore>, work: Arc<dyn WorkUnit>) -> Self {
        Self { store, work }
    }

    /// Drive `task_id` through `processing` to `done`.
    ///
    /// Succeeds only when both writes succeed. Safe to repeat: a redelivered
    /// message re-writes the same two statuses.
    pub async fn process(&self, task_id: &TaskId) -> Result<(), HandleError> {
        info!(task_id = %task_id, "task processing");

        self.write_status(task_id, TaskStatus::Processing).await?;

        self.work
            .perform(task_id)
            .await
            .map_err(|source| HandleError::Work {
                task_id: task_id.clone(),
                source,
            })?;

        self.write_status(task_id, TaskStatus::Done).await?;

        info!(task_id = %task_id, "task processed");
        Ok(())
    }

    async fn write_status(&self, task_id: &TaskId, status: TaskStatus) -> Result<(), HandleError> {
        self.store
            .update_status(task_id, status)
            .await
            .map_err(|source| {
                error!(
                    task_id = %task_id,
                    %status,
                    kind = ?source.kind(),
                    error = %source,
                    "failed to update task's status"
                );
                HandleError::Store {
                    task_id: task_id.clone(),
                    source,
                }
            })
    }
}

#[async_trait]
impl MessageHandler for TaskProcessor {
    async fn handle(&self, message: &Message) -> Result<(), HandleError> {
        let task_id = message.task_id()?;
        if !message.key_matches_value() {
            warn!(key = %message.key, task_id = %task_id, "message key differs from value; using value");
        }
        self.process(&task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StoreError, Task, WorkError};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{FixedDelay, NoWork, TaskStore};
    use chrono::Utc;
    use std::time::Duration;

    async fn store_with(id: &str) -> InMemoryTaskStore {
        let store = InMemoryTaskStore::new();
        store.create(Task::new(TaskId::from(id), "title", "")).await.unwrap();
        store
    }

    fn processor(store: &InMemoryTaskStore) -> TaskProcessor {
        TaskProcessor::new(Arc::new(store.clone()), Arc::new(NoWork))
    }

    #[tokio::test]
    async fn writes_processing_then_done() {
        let store = store_with("t1").await;
        processor(&store).process(&TaskId::from("t1")).await.unwrap();

        assert_eq!(
            store.history_for(&TaskId::from("t1")).await,
            vec![TaskStatus::Processing, TaskStatus::Done]
        );
    }

    #[tokio::test]
    async fn handling_twice_is_idempotent() {
        let store = store_with("t1").await;
        let processor = processor(&store);
        let msg = Message::for_task(&TaskId::from("t1"), Utc::now());

        processor.handle(&msg).await.unwrap();
        processor.handle(&msg).await.unwrap();

        assert_eq!(store.status_of(&TaskId::from("t1")).await, Some(TaskStatus::Done));
        assert_eq!(store.history_for(&TaskId::from("t1")).await.len(), 4);
    }

    #[tokio::test]
    async fn first_write_failure_skips_work_and_done() {
        let store = store_with("t1").await;
        store.fail_next_updates(1).await;

        let err = processor(&store).process(&TaskId::from("t1")).await.unwrap_err();

        assert!(matches!(
            err,
            HandleError::Store { source: StoreError::Storage(_), .. }
        ));
        assert_eq!(store.status_of(&TaskId::from("t1")).await, Some(TaskStatus::Created));
    }

    #[tokio::test]
    async fn missing_task_is_an_error_not_a_silent_success() {
        let store = InMemoryTaskStore::new();
        let msg = Message::for_task(&TaskId::from("ghost"), Utc::now());

        let err = processor(&store).handle(&msg).await.unwrap_err();

        assert!(matches!(
            err,
            HandleError::Store { source: StoreError::NotFound(_), .. }
        ));
    }

    #[tokio::test]
    async fn undecodable_message_is_a_decode_error() {
        let store = InMemoryTaskStore::new();
        let msg = Message::new("t1", Vec::new(), Utc::now());

        let err = processor(&store).handle(&msg).await.unwrap_err();
        assert!(matches!(err, HandleError::Decode(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn status_stays_processing_during_the_delay() {
        let store = store_with("t1").await;
        let processor = Arc::new(TaskProcessor::new(
            Arc::new(store.clone()),
            Arc::new(FixedDelay::new(Duration::from_secs(10))),
        ));

        let running = tokio::spawn({
            let processor = processor.clone();
            async move { processor.process(&TaskId::from("t1")).await }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            store.status_of(&TaskId::from("t1")).await,
            Some(TaskStatus::Processing)
        );

        running.await.unwrap().unwrap();
        assert_eq!(store.status_of(&TaskId::from("t1")).await, Some(TaskStatus::Done));
    }

    struct FailingWork;

    #[async_trait]
    impl WorkUnit for FailingWork {
        async fn perform(&self, _task_id: &TaskId) -> Result<(), WorkError> {
            Err(WorkError("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn work_failure_leaves_task_processing() {
        let store = store_with("t1").await;
        let processor = TaskProcessor::new(Arc::new(store.clone()), Arc::new(FailingWork));

        let err = processor.process(&TaskId::from("t1")).await.unwrap_err();

        assert!(matches!(err, HandleError::Work { .. }));
        assert_eq!(
            store.status_of(&TaskId::from("t1")).await,
            Some(TaskStatus::Processing)
        );
    }
}
