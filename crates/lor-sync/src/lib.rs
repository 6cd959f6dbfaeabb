//! Snapshot synchronization for a replica pool.
//!
//! A channel delivers object state in two shapes: live operation messages
//! and snapshot sequences broken into cursor-tagged chunks. This crate
//! reconciles the two: the [`SyncCoordinator`] accumulates snapshot chunks,
//! buffers live operations that race them, applies the completed snapshot
//! authoritatively, and replays the buffer.

mod apply;
mod coordinator;
mod cursor;

pub use apply::apply_operation_message;
pub use coordinator::{SyncCoordinator, SyncState};
pub use cursor::SyncCursor;
