//! Binary and text codecs for [`ObjectMessage`].
//!
//! Both codecs are structurally symmetric: `decode(encode(x)) == x`.
//! Byte-for-byte symmetry of `encode(decode(bytes))` is not guaranteed and
//! not needed. The text codec omits absent optional fields; the binary codec
//! relies on bincode's one-byte option tags.

use crate::error::ProtoError;
use crate::message::ObjectMessage;
use serde_json::Value as JsonValue;

/// Encode a message with the compact binary codec.
pub fn encode_binary(message: &ObjectMessage) -> Result<Vec<u8>, ProtoError> {
    bincode::serialize(message).map_err(|e| ProtoError::Encode(e.to_string()))
}

/// Decode a message from the compact binary codec.
pub fn decode_binary(bytes: &[u8]) -> Result<ObjectMessage, ProtoError> {
    bincode::deserialize(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
}

/// Encode a message with the text (JSON) codec. Absent optional fields are
/// omitted from the output.
pub fn encode_text(message: &ObjectMessage) -> Result<String, ProtoError> {
    let mut tree =
        serde_json::to_value(message).map_err(|e| ProtoError::Encode(e.to_string()))?;
    prune_nulls(&mut tree);
    serde_json::to_string(&tree).map_err(|e| ProtoError::Encode(e.to_string()))
}

/// Decode a message from the text (JSON) codec.
pub fn decode_text(text: &str) -> Result<ObjectMessage, ProtoError> {
    serde_json::from_str(text).map_err(|e| ProtoError::Decode(e.to_string()))
}

/// Strip `null` members recursively so absent options disappear from the
/// serialized form instead of appearing as explicit nulls.
fn prune_nulls(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                prune_nulls(v);
            }
        }
        JsonValue::Array(items) => {
            for v in items.iter_mut() {
                prune_nulls(v);
            }
        }
        _ => {}
    }
}
