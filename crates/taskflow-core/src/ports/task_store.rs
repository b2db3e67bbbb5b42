//! TaskStore port - タスクの正本（source of truth）
//!
//! 2 段構成:
//! - **StatusStore**: worker が必要とする最小の能力（id で status を書く）
//! - **TaskStore**: CRUD サービスが使う読み書き全体
//!
//! # 設計原則
//! - status 書き込みは単独の commit（"processing" と "done" の間に原子性はない）
//! - compare-and-swap はしない（外部からの PATCH と競合した場合は last-write-wins）

use async_trait::async_trait;

use crate::domain::{StoreError, Task, TaskId, TaskStatus};

/// Narrow capability the task processor needs.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Write `status` for `id`.
    ///
    /// Fails with `StoreError::NotFound` when no row matches `id`, and with
    /// `StoreError::Storage` for anything else.
    async fn update_status(&self, id: &TaskId, status: TaskStatus) -> Result<(), StoreError>;
}

/// Full task table used by the CRUD service.
#[async_trait]
pub trait TaskStore: StatusStore {
    /// Insert a new task. Returns the stored id.
    async fn create(&self, task: Task) -> Result<TaskId, StoreError>;

    async fn get(&self, id: &TaskId) -> Result<Task, StoreError>;

    /// List tasks in creation order.
    async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>, StoreError>;
}

/// Page of `amount` rows, 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub amount: u32,
}

impl Page {
    /// Pagination applies only when both values are positive.
    pub fn new(amount: i64, number: i64) -> Option<Self> {
        if amount <= 0 || number <= 0 {
            return None;
        }
        Some(Self {
            number: u32::try_from(number).ok()?,
            amount: u32::try_from(amount).ok()?,
        })
    }

    pub fn offset(&self) -> usize {
        (self.number as usize - 1) * self.amount as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub page: Option<Page>,
}

impl TaskQuery {
    pub fn all() -> Self {
        Self::default()
    }

    /// An unrecognised filter string means "no filter".
    pub fn with_status_filter(mut self, filter: &str) -> Self {
        self.status = filter.parse().ok();
        self
    }

    pub fn with_page(mut self, page: Option<Page>) -> Self {
        self.page = page;
        self
    }

    /// Apply filter and pagination to rows already in creation order.
    pub fn apply<'a>(&self, rows: impl IntoIterator<Item = &'a Task>) -> Vec<Task> {
        let filtered = rows
            .into_iter()
            .filter(|task| self.status.is_none_or(|status| task.status == status));
        match self.page {
            Some(page) => filtered
                .skip(page.offset())
                .take(page.amount as usize)
                .cloned()
                .collect(),
            None => filtered.cloned().collect(),
        }
    }
}
