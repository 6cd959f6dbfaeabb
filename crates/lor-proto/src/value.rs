//! Leaf values carried by map entries and counter creation.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A leaf payload value.
///
/// JSON object/array leaves travel as serialized JSON strings on the wire
/// (see [`WireValue`]) so both codecs stay self-contained; in memory they are
/// parsed trees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireValue", try_from = "WireValue")]
pub enum ObjectValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Binary(Vec<u8>),
    JsonObject(serde_json::Map<String, JsonValue>),
    JsonArray(Vec<JsonValue>),
}

/// Wire-level representation of [`ObjectValue`].
///
/// Identical to the in-memory form except that JSON leaves are carried as
/// their serialized string, which every codec can transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum WireValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Binary(Vec<u8>),
    JsonObject(String),
    JsonArray(String),
}

impl From<ObjectValue> for WireValue {
    fn from(value: ObjectValue) -> Self {
        match value {
            ObjectValue::String(s) => WireValue::String(s),
            ObjectValue::Number(n) => WireValue::Number(n),
            ObjectValue::Boolean(b) => WireValue::Boolean(b),
            ObjectValue::Binary(b) => WireValue::Binary(b),
            ObjectValue::JsonObject(o) => {
                WireValue::JsonObject(serde_json::to_string(&o).unwrap_or_default())
            }
            ObjectValue::JsonArray(a) => {
                WireValue::JsonArray(serde_json::to_string(&a).unwrap_or_default())
            }
        }
    }
}

impl TryFrom<WireValue> for ObjectValue {
    type Error = String;

    fn try_from(value: WireValue) -> Result<Self, Self::Error> {
        Ok(match value {
            WireValue::String(s) => ObjectValue::String(s),
            WireValue::Number(n) => ObjectValue::Number(n),
            WireValue::Boolean(b) => ObjectValue::Boolean(b),
            WireValue::Binary(b) => ObjectValue::Binary(b),
            WireValue::JsonObject(s) => ObjectValue::JsonObject(
                serde_json::from_str(&s).map_err(|e| format!("bad json object leaf: {}", e))?,
            ),
            WireValue::JsonArray(s) => ObjectValue::JsonArray(
                serde_json::from_str(&s).map_err(|e| format!("bad json array leaf: {}", e))?,
            ),
        })
    }
}

/// Entry data: a leaf value or a reference to another pooled replica.
///
/// `object_id` and `value` are mutually structured; a well-formed entry sets
/// exactly one of them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub value: Option<ObjectValue>,
}

impl ObjectData {
    /// Data carrying a leaf value.
    pub fn from_value(value: ObjectValue) -> Self {
        ObjectData {
            object_id: None,
            value: Some(value),
        }
    }

    /// Data referencing another pooled replica.
    pub fn from_reference(object_id: impl Into<String>) -> Self {
        ObjectData {
            object_id: Some(object_id.into()),
            value: None,
        }
    }

    /// Whether this data points at another replica.
    pub fn is_reference(&self) -> bool {
        self.object_id.is_some()
    }
}

/// Opaque message extras, carried as a JSON object.
///
/// Travels as its serialized string so the binary codec can transport it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extras(pub serde_json::Map<String, JsonValue>);

impl Serialize for Extras {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(&self.0).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for Extras {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let map = serde_json::from_str(&text).map_err(serde::de::Error::custom)?;
        Ok(Extras(map))
    }
}

impl Extras {
    /// Serialized-string length, used by size accounting.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(&self.0).map(|s| s.len()).unwrap_or(0)
    }
}
