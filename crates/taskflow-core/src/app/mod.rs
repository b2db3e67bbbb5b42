//! App - アプリケーション層
//!
//! ports を組み合わせて非同期タスク処理パイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **Producer**: タスク作成後に処理リクエストを publish
//! - **ConsumerLoop**: 1 件ずつ受信 → handler → 成功時のみ commit
//! - **TaskProcessor**: created → processing → done の遷移（handler 本体）
//! - **TaskService**: CRUD と作成時の publish

pub mod consumer_loop;
pub mod processor;
pub mod producer;
pub mod service;
pub mod status;

// 主要な型を再エクスポート
pub use self::consumer_loop::{ConsumerError, ConsumerHandle, ConsumerLoop};
pub use self::processor::TaskProcessor;
pub use self::producer::Producer;
pub use self::service::{CreatedTask, TaskService};
pub use self::status::{ConsumerCounts, ConsumerStats};
