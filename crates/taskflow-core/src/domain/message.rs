//! Message - チャネルを流れる単位
//!
//! key と value は同じタスクを指します。処理側は value を正とします。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use super::errors::HandleError;

/// Wire-agnostic message envelope shared by producer and consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id (the task id). Used for partition affinity.
    pub key: String,

    /// Opaque payload; carries the task id as raw bytes.
    pub value: Vec<u8>,

    /// Creation time, informational only.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>, timestamp: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
        }
    }

    /// `{key: id, value: id bytes, timestamp: now}`
    pub fn for_task(task_id: &TaskId, now: DateTime<Utc>) -> Self {
        Self::new(task_id.as_str(), task_id.as_bytes(), now)
    }

    /// Decode the task id from `value`.
    pub fn task_id(&self) -> Result<TaskId, HandleError> {
        TaskId::from_bytes(&self.value)
    }

    /// key と value が同じタスクを指しているか
    pub fn key_matches_value(&self) -> bool {
        self.key.as_bytes() == self.value.as_slice()
    }
}
