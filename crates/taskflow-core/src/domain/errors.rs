//! Errors - エラー型と分類
//!
//! 各レイヤーのエラーは `kind()` で運用分類を返します。
//! 分類はログと呼び出し側の判断材料であり、consumer の commit 規律は変えません
//! （失敗したメッセージは分類に関係なく commit しない）。

use std::time::Duration;

use thiserror::Error;

use super::TaskId;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（store / broker の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

/// Status store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task not found: id={0}")]
    NotFound(TaskId),

    #[error("task already exists: id={0}")]
    AlreadyExists(TaskId),

    #[error("invalid value for task id={id}: {reason}")]
    InvalidValue { id: TaskId, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) | StoreError::AlreadyExists(_) | StoreError::InvalidValue { .. } => {
                ErrorKind::Permanent
            }
            StoreError::Storage(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Message channel failures (publish, receive, commit).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Timeout(_) => ErrorKind::Transient,
            ChannelError::Closed | ChannelError::Transport(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Work unit failure (the "real work" between the two status writes).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct WorkError(pub String);

/// Per-message handler failures. Any of these leaves the message uncommitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("status write failed for task id={task_id}: {source}")]
    Store {
        task_id: TaskId,
        #[source]
        source: StoreError,
    },

    #[error("work failed for task id={task_id}: {source}")]
    Work {
        task_id: TaskId,
        #[source]
        source: WorkError,
    },
}

impl HandleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandleError::Decode(_) => ErrorKind::Permanent,
            HandleError::Store { source, .. } => source.kind(),
            HandleError::Work { .. } => ErrorKind::Transient,
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            HandleError::Decode(_) => None,
            HandleError::Store { task_id, .. } | HandleError::Work { task_id, .. } => Some(task_id),
        }
    }
}

/// Task service failures (CRUD surface).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid status: {0:?}")]
    InvalidStatus(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Store(e) => e.kind(),
            ServiceError::InvalidStatus(_) | ServiceError::InvalidInput(_) => ErrorKind::Permanent,
        }
    }
}
