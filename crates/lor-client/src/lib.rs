//! # lor-client
//!
//! Client surface of the loreplica engine.
//!
//! [`RealtimeObjects`] ties the layers together: a [`ChannelTransport`]
//! seam to the realtime service, a single serialized worker applying all
//! inbound traffic through the sync coordinator, a periodic tombstone
//! sweep, and typed handles ([`LiveMapRef`], [`LiveCounterRef`]) over the
//! replica pool.
//!
//! Writes never mutate local state directly. Every mutation is published,
//! acknowledged by the server, and applied when its echo arrives on the
//! intake, so local replicas always agree with the channel's operation
//! order.

mod error;
mod guards;
mod objects;
mod transport;
mod worker;

pub use error::{ClientError, Result};
pub use objects::{LiveCounterRef, LiveMapRef, RealtimeObjects};
pub use transport::{
    ChannelMode, ChannelState, ChannelTransport, MemoryRealtime, MemoryTransport, TransportError,
};
pub use worker::InboundEvent;

// Re-exported so downstream callers can read and subscribe without naming
// the pool crate.
pub use lor_pool::{KeyUpdate, LifecycleEvent, MapRead, ObjectUpdate, SubscriptionId};
pub use lor_proto::{ObjectData, ObjectValue};
