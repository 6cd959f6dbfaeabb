//! # lor-pool
//!
//! Replica types and the objects pool for the loreplica engine.
//!
//! This crate provides:
//! - [`LiveMap`]: a keyed last-writer-wins map whose values may reference
//!   other pooled replicas
//! - [`LiveCounter`]: a summing numeric accumulator
//! - [`ObjectsPool`]: the arena of live replicas, with an always-present
//!   root map and tombstone garbage collection
//!
//! Leaf storage sits behind `parking_lot` locks, so reads are callable from
//! any thread without waiting on the message-processing worker. All
//! mutation is expected to arrive through one serialized context per
//! channel; the types themselves only guarantee that reads, writes and GC
//! sweeps never corrupt each other.

mod clock;
mod counter;
mod entry;
mod error;
mod map;
mod object;
mod pool;
mod serials;
mod subscribe;

pub use clock::now_ms;
pub use counter::LiveCounter;
pub use entry::MapEntry;
pub use error::{PoolError, Result};
pub use map::{diff_entries, LiveMap};
pub use object::{LiveObject, MapRead};
pub use pool::{
    effective_grace_period, ObjectsPool, GC_GRACE_PERIOD, GC_INTERVAL, MIN_GC_GRACE_PERIOD,
};
pub use serials::{can_apply_entry, SiteSerials};
pub use subscribe::{KeyUpdate, LifecycleEvent, ObjectUpdate, Subscribers, SubscriptionId};
