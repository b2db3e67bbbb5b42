//! Domain identifiers.
//!
//! # TaskId
//! タスク ID は不透明な文字列として扱います。
//! - 生成時は ULID 文字列（時刻でソート可能、分散生成可能）
//! - 外部から渡された ID（`"t1"` など）もそのまま受け入れる
//! - メッセージの value（raw bytes）からの復元をサポート

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use super::errors::HandleError;

/// Identifier of a Task (the unit tracked by the store and carried by messages).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// ULID から TaskId を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid.to_string())
    }

    /// メッセージの raw bytes から復元
    ///
    /// UTF-8 でない、または空の場合は `HandleError::Decode` を返します。
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HandleError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| HandleError::Decode(format!("task id is not valid utf-8: {e}")))?;
        if s.is_empty() {
            return Err(HandleError::Decode("task id is empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
