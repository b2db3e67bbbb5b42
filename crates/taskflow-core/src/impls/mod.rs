//! Impls - 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryChannel**: topic ログ + consumer group cursor のチャネル
//! - **InMemoryTaskStore**: task table
//!
//! 本番用の transport（Kafka 等）と relational store は別クレートに置く想定です。

pub mod inmem_channel;
pub mod inmem_store;

pub use self::inmem_channel::{InMemoryChannel, InMemorySubscription};
pub use self::inmem_store::InMemoryTaskStore;
