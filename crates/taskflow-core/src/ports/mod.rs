//! Ports - 抽象化レイヤー
//!
//! 外部システム（task table, message broker）への境界を trait で定義します。
//! 実装の詳細（transport, schema, connection pool）は隠蔽します。

pub mod channel;
pub mod clock;
pub mod handler;
pub mod id_generator;
pub mod task_store;
pub mod work_unit;

// 主要な trait を再エクスポート
pub use self::channel::{Delivery, MessageSource, Publisher, RequiredAcks};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::handler::MessageHandler;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{Page, StatusStore, TaskQuery, TaskStore};
pub use self::work_unit::{FixedDelay, NoWork, WorkUnit};
