//! Domain model (ids, status, task, message, errors).

pub mod errors;
pub mod ids;
pub mod message;
pub mod status;
pub mod task;

pub use self::errors::{ChannelError, ErrorKind, HandleError, ServiceError, StoreError, WorkError};
pub use self::ids::TaskId;
pub use self::message::Message;
pub use self::status::{TaskStatus, UnknownStatus};
pub use self::task::Task;
