//! Operations, states and the wire envelope.
//!
//! Enum codes are explicit bidirectional lookup tables; codes this build does
//! not know decode to a reserved `Unknown` variant so newer protocol versions
//! never abort a decode.

use crate::value::{Extras, ObjectData};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of mutation an operation performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationAction {
    MapCreate,
    MapSet,
    MapRemove,
    CounterCreate,
    CounterInc,
    ObjectDelete,
    /// Forward-compatibility fallback for codes this build does not know.
    Unknown(u8),
}

impl OperationAction {
    /// Wire code for this action.
    pub fn code(self) -> u8 {
        match self {
            OperationAction::MapCreate => 0,
            OperationAction::MapSet => 1,
            OperationAction::MapRemove => 2,
            OperationAction::CounterCreate => 3,
            OperationAction::CounterInc => 4,
            OperationAction::ObjectDelete => 5,
            OperationAction::Unknown(code) => code,
        }
    }

    /// Action for a wire code. Unrecognized codes map to `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => OperationAction::MapCreate,
            1 => OperationAction::MapSet,
            2 => OperationAction::MapRemove,
            3 => OperationAction::CounterCreate,
            4 => OperationAction::CounterInc,
            5 => OperationAction::ObjectDelete,
            other => OperationAction::Unknown(other),
        }
    }
}

impl Serialize for OperationAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for OperationAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(OperationAction::from_code(u8::deserialize(deserializer)?))
    }
}

/// Conflict-resolution semantics tag carried by map payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapSemantics {
    /// Last-writer-wins per entry.
    Lww,
    Unknown(u8),
}

impl MapSemantics {
    pub fn code(self) -> u8 {
        match self {
            MapSemantics::Lww => 0,
            MapSemantics::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => MapSemantics::Lww,
            other => MapSemantics::Unknown(other),
        }
    }
}

impl Default for MapSemantics {
    fn default() -> Self {
        MapSemantics::Lww
    }
}

impl Serialize for MapSemantics {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for MapSemantics {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(MapSemantics::from_code(u8::deserialize(deserializer)?))
    }
}

/// Payload of a map set/remove operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapOp {
    pub key: String,
    #[serde(default)]
    pub data: Option<ObjectData>,
}

/// Payload of a counter increment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterOp {
    #[serde(default)]
    pub amount: f64,
}

/// One map entry as it travels inside create payloads and snapshots.
///
/// Entries carry their own timeserials; a map-create payload re-dispatches
/// each entry under that entry's serial, not the enclosing message's.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMapEntry {
    #[serde(default)]
    pub tombstone: Option<bool>,
    #[serde(default)]
    pub timeserial: Option<String>,
    #[serde(default)]
    pub data: Option<ObjectData>,
}

/// Map payload of a create operation or snapshot state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapPayload {
    #[serde(default)]
    pub semantics: MapSemantics,
    #[serde(default)]
    pub entries: HashMap<String, WireMapEntry>,
}

/// Counter payload of a create operation or snapshot state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterPayload {
    #[serde(default)]
    pub count: f64,
}

/// A single replicated-object operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectOperation {
    pub action: OperationAction,
    pub object_id: String,
    #[serde(default)]
    pub map_op: Option<MapOp>,
    #[serde(default)]
    pub counter_op: Option<CounterOp>,
    #[serde(default)]
    pub map: Option<MapPayload>,
    #[serde(default)]
    pub counter: Option<CounterPayload>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub initial_value: Option<ObjectData>,
}

impl ObjectOperation {
    /// A bare operation with no payloads.
    pub fn new(action: OperationAction, object_id: impl Into<String>) -> Self {
        ObjectOperation {
            action,
            object_id: object_id.into(),
            map_op: None,
            counter_op: None,
            map: None,
            counter: None,
            nonce: None,
            initial_value: None,
        }
    }
}

/// A point-in-time snapshot of one replica, distributed by sync chunks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    pub object_id: String,
    #[serde(default)]
    pub site_timeserials: HashMap<String, String>,
    #[serde(default)]
    pub tombstone: bool,
    #[serde(default)]
    pub create_op: Option<ObjectOperation>,
    #[serde(default)]
    pub map: Option<MapPayload>,
    #[serde(default)]
    pub counter: Option<CounterPayload>,
}

/// Wire envelope: one operation or one object state.
///
/// `id`, `timestamp` and `connection_id` may be elided on the wire and
/// back-filled from the enclosing transport envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub extras: Option<Extras>,
    #[serde(default)]
    pub operation: Option<ObjectOperation>,
    #[serde(default)]
    pub object_state: Option<ObjectState>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub site_code: Option<String>,
}

impl ObjectMessage {
    /// A message carrying one operation.
    pub fn from_operation(operation: ObjectOperation) -> Self {
        ObjectMessage {
            operation: Some(operation),
            ..Default::default()
        }
    }

    /// A message carrying one object state.
    pub fn from_state(state: ObjectState) -> Self {
        ObjectMessage {
            object_state: Some(state),
            ..Default::default()
        }
    }

    /// Back-fill `id`, `timestamp` and `connection_id` from the enclosing
    /// transport envelope when the wire elided them.
    pub fn apply_envelope_defaults(
        &mut self,
        envelope_id: Option<&str>,
        envelope_timestamp: Option<i64>,
        envelope_connection_id: Option<&str>,
        index: usize,
    ) {
        if self.id.is_none() {
            if let Some(envelope_id) = envelope_id {
                self.id = Some(format!("{}:{}", envelope_id, index));
            }
        }
        if self.timestamp.is_none() {
            self.timestamp = envelope_timestamp;
        }
        if self.connection_id.is_none() {
            self.connection_id = envelope_connection_id.map(str::to_string);
        }
    }
}
