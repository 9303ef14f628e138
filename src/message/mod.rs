//! Message store and lifecycle state machine.
//!
//! One row per message. "queued" is a status value, not a separate queue
//! structure; every lifecycle mutation is a tenant-scoped row update. The
//! engine never deletes messages (they are the audit trail).

mod store;
mod types;

pub use store::{MessageStore, ScheduleOutcome, StoreError};
pub use types::{
    Channel, Direction, EnqueueRequest, FailureReason, InboundMessage, Message, MessageStatus,
};
