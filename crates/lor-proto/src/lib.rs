//! # lor-proto
//!
//! Wire data model for the loreplica engine.
//!
//! This crate provides:
//! - Object identifiers (`type:hash@timestamp`) with deterministic
//!   create-operation hashing
//! - Tagged operation/state/value structures for the replication protocol
//! - A compact binary codec (bincode) and a text codec (JSON)
//! - Pure size accounting for preflight message-limit checks
//!
//! Enum codes use explicit bidirectional lookup tables with a reserved
//! `Unknown` fallback, so decoding never fails on codes introduced by newer
//! protocol versions.

mod codec;
mod error;
mod message;
mod object_id;
mod size;
mod value;

pub use codec::{decode_binary, decode_text, encode_binary, encode_text};
pub use error::{ProtoError, Result};
pub use message::{
    CounterOp, CounterPayload, MapOp, MapPayload, MapSemantics, ObjectMessage, ObjectOperation,
    ObjectState, OperationAction, WireMapEntry,
};
pub use object_id::{ObjectId, ObjectType, ROOT_OBJECT_ID};
pub use size::size_of;
pub use value::{Extras, ObjectData, ObjectValue};
