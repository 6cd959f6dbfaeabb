//! Object identifiers.
//!
//! An object id is the string `"<type>:<hash>@<timestamp>"`. It names a
//! replica and encodes the provenance of the create operation that produced
//! it: the hash is computed deterministically from the create nonce and
//! initial value, so two clients issuing the logically same create converge
//! on the same id without coordination.

use crate::error::ProtoError;
use crate::value::ObjectValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// The id under which every pool keeps its root map. Never parsed, never
/// garbage-collected.
pub const ROOT_OBJECT_ID: &str = "root";

/// The replicated type an object id refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Map,
    Counter,
}

impl ObjectType {
    /// The string tag used inside the id.
    pub fn tag(self) -> &'static str {
        match self {
            ObjectType::Map => "map",
            ObjectType::Counter => "counter",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "map" => Some(ObjectType::Map),
            "counter" => Some(ObjectType::Counter),
            _ => None,
        }
    }
}

/// Parsed form of an object identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub object_type: ObjectType,
    pub hash: String,
    pub created_at_ms: i64,
}

impl ObjectId {
    /// Parse an id string of the form `"<type>:<hash>@<timestamp>"`.
    ///
    /// Splits on the first `:` and the first `@`; rejects empty input,
    /// unknown type tags and non-integer timestamps.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        if s.is_empty() {
            return Err(ProtoError::MalformedObjectId(
                "object id is empty".to_string(),
            ));
        }

        let (tag, rest) = s
            .split_once(':')
            .ok_or_else(|| ProtoError::MalformedObjectId(format!("missing ':' in {:?}", s)))?;

        let object_type = ObjectType::from_tag(tag)
            .ok_or_else(|| ProtoError::MalformedObjectId(format!("unknown type tag {:?}", tag)))?;

        let (hash, timestamp) = rest
            .split_once('@')
            .ok_or_else(|| ProtoError::MalformedObjectId(format!("missing '@' in {:?}", s)))?;

        let created_at_ms = timestamp.parse::<i64>().map_err(|_| {
            ProtoError::MalformedObjectId(format!("non-integer timestamp {:?}", timestamp))
        })?;

        Ok(ObjectId {
            object_type,
            hash: hash.to_string(),
            created_at_ms,
        })
    }

    /// Build the id produced by a create operation.
    ///
    /// The hash covers the create nonce and the serialized initial value, so
    /// the id is a pure function of the operation's content.
    pub fn from_create_op(
        object_type: ObjectType,
        nonce: Option<&str>,
        initial_value: Option<&ObjectValue>,
        timestamp_ms: i64,
    ) -> Self {
        let mut hasher = Sha256::new();
        if let Some(nonce) = nonce {
            hasher.update(nonce.as_bytes());
        }
        hasher.update(b":");
        if let Some(value) = initial_value {
            // Serialization of ObjectValue is deterministic (string-bridged
            // JSON for object/array leaves), so the digest is too.
            let canonical = serde_json::to_string(value).unwrap_or_default();
            hasher.update(canonical.as_bytes());
        }

        ObjectId {
            object_type,
            hash: to_hex(&hasher.finalize()),
            created_at_ms: timestamp_ms,
        }
    }
}

impl fmt::Display for ObjectId {
    /// Exact inverse of [`ObjectId::parse`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.object_type.tag(),
            self.hash,
            self.created_at_ms
        )
    }
}

impl FromStr for ObjectId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectId::parse(s)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let id = ObjectId::parse("map:abc123@1700000000000").unwrap();
        assert_eq!(id.object_type, ObjectType::Map);
        assert_eq!(id.hash, "abc123");
        assert_eq!(id.created_at_ms, 1700000000000);
        assert_eq!(id.to_string(), "map:abc123@1700000000000");
    }

    #[test]
    fn test_parse_counter() {
        let id = ObjectId::parse("counter:ff00@42").unwrap();
        assert_eq!(id.object_type, ObjectType::Counter);
        assert_eq!(id.created_at_ms, 42);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(ObjectId::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(ObjectId::parse("set:abc@100").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_separators() {
        assert!(ObjectId::parse("mapabc@100").is_err());
        assert!(ObjectId::parse("map:abc100").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        assert!(ObjectId::parse("map:abc@later").is_err());
        assert!(ObjectId::parse("map:abc@").is_err());
    }

    #[test]
    fn test_hash_only_splits_on_first_separator() {
        // Hashes may contain ':' or '@' past the first split points.
        let id = ObjectId::parse("map:a@100").unwrap();
        assert_eq!(id.hash, "a");
    }

    #[test]
    fn test_create_op_hash_is_deterministic() {
        let v = ObjectValue::Number(5.0);
        let a = ObjectId::from_create_op(ObjectType::Counter, Some("nonce-1"), Some(&v), 1000);
        let b = ObjectId::from_create_op(ObjectType::Counter, Some("nonce-1"), Some(&v), 1000);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_create_op_hash_varies_with_nonce() {
        let a = ObjectId::from_create_op(ObjectType::Map, Some("n1"), None, 1000);
        let b = ObjectId::from_create_op(ObjectType::Map, Some("n2"), None, 1000);
        assert_ne!(a.hash, b.hash);
    }
}
