//! TaskService - タスクの CRUD と、作成時の処理リクエスト publish
//!
//! # 作成フロー
//! 1. store に row を作る（失敗したら作成エラー）
//! 2. row が commit された後で Producer::publish_task
//! 3. publish の失敗は警告として返すだけ（作成自体は成功）
//!
//! publish に失敗したタスクは `created` のまま残ります（outbox / 再送はしない）。

use std::sync::Arc;

use tracing::{error, info, warn};

use super::Producer;
use crate::domain::{ChannelError, ServiceError, Task, TaskId, TaskStatus};
use crate::ports::{IdGenerator, Page, TaskQuery, TaskStore};

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTask {
    pub task: Task,
    /// Set when the task was stored but its processing request could not be
    /// enqueued. The task stays `created` until something re-triggers it.
    pub enqueue_error: Option<ChannelError>,
}

impl CreatedTask {
    pub fn enqueued(&self) -> bool {
        self.enqueue_error.is_none()
    }
}

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    producer: Producer,
    ids: Arc<dyn IdGenerator>,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, producer: Producer, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            store,
            producer,
            ids,
        }
    }

    pub async fn create(&self, title: &str, description: &str) -> Result<CreatedTask, ServiceError> {
        if title.trim().is_empty() {
            return Err(ServiceError::InvalidInput("title must not be empty".to_string()));
        }

        let task = Task::new(self.ids.generate_task_id(), title, description);
        let id = self.store.create(task.clone()).await.inspect_err(|e| {
            error!(error = %e, "failed to create task");
        })?;

        let enqueue_error = match self.producer.publish_task(&id).await {
            Ok(()) => {
                info!(task_id = %id, topic = self.producer.topic(), "task sent to queue");
                None
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "failed to send task to queue; task stays created");
                Some(e)
            }
        };

        info!(task_id = %id, "task created");
        Ok(CreatedTask {
            task: Task { id, ..task },
            enqueue_error,
        })
    }

    pub async fn get_by_id(&self, id: &TaskId) -> Result<Task, ServiceError> {
        Ok(self.store.get(id).await?)
    }

    /// `amount`/`page` <= 0 disables pagination; an unknown `status_filter`
    /// disables filtering.
    pub async fn list(
        &self,
        amount: i64,
        page: i64,
        status_filter: &str,
    ) -> Result<Vec<Task>, ServiceError> {
        let query = TaskQuery::all()
            .with_status_filter(status_filter)
            .with_page(Page::new(amount, page));
        Ok(self.store.list(&query).await?)
    }

    /// External status write (PATCH). No forward-only check: this races the
    /// worker and the store keeps whichever write lands last.
    pub async fn update_status(&self, id: &TaskId, status: &str) -> Result<(), ServiceError> {
        let status: TaskStatus = status
            .parse()
            .map_err(|_| ServiceError::InvalidStatus(status.to_string()))?;
        self.store.update_status(id, status).await?;
        info!(task_id = %id, %status, "task's status updated");
        Ok(())
    }
}
