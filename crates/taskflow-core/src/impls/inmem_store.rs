//! InMemoryTaskStore - 開発用・テスト用の task table
//!
//! # 実装詳細
//! - HashMap<TaskId, Task> + 挿入順の Vec<TaskId>
//! - tokio::sync::Mutex で排他制御（ロック跨ぎで await しない）
//! - status 書き込みの履歴を保持（"processing" → "done" の順序確認用）
//! - 障害注入: `fail_next_updates(n)` で次の n 回の update_status を Storage エラーにする

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{StoreError, Task, TaskId, TaskStatus};
use crate::ports::{StatusStore, TaskQuery, TaskStore};

/// One successful status write, in the order the store applied it.
struct StatusWrite {
    id: TaskId,
    status: TaskStatus,
}

#[derive(Default)]
struct StoreState {
    rows: HashMap<TaskId, Task>,
    /// Creation order.
    order: Vec<TaskId>,
    history: Vec<StatusWrite>,
    failing_updates: u32,
}

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `update_status` calls fail with `StoreError::Storage`.
    pub async fn fail_next_updates(&self, n: u32) {
        self.state.lock().await.failing_updates = n;
    }

    /// Remove a row out-of-band (simulates an external delete).
    pub async fn remove(&self, id: &TaskId) -> Option<Task> {
        let mut state = self.state.lock().await;
        state.order.retain(|x| x != id);
        state.rows.remove(id)
    }

    pub async fn status_of(&self, id: &TaskId) -> Option<TaskStatus> {
        self.state.lock().await.rows.get(id).map(|task| task.status)
    }

    /// Status writes applied for `id`, oldest first.
    pub async fn history_for(&self, id: &TaskId) -> Vec<TaskStatus> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .filter(|write| &write.id == id)
            .map(|write| write.status)
            .collect()
    }
}

#[async_trait]
impl StatusStore for InMemoryTaskStore {
    async fn update_status(&self, id: &TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_updates > 0 {
            state.failing_updates -= 1;
            return Err(StoreError::Storage(format!(
                "injected failure writing {status} for {id}"
            )));
        }
        let Some(task) = state.rows.get_mut(id) else {
            return Err(StoreError::NotFound(id.clone()));
        };
        task.status = status;
        state.history.push(StatusWrite {
            id: id.clone(),
            status,
        });
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> Result<TaskId, StoreError> {
        let mut state = self.state.lock().await;
        if state.rows.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists(task.id));
        }
        let id = task.id.clone();
        state.order.push(id.clone());
        state.rows.insert(id.clone(), task);
        Ok(id)
    }

    async fn get(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.state
            .lock()
            .await
            .rows
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock().await;
        let rows = state.order.iter().filter_map(|id| state.rows.get(id));
        Ok(query.apply(rows))
    }
}
