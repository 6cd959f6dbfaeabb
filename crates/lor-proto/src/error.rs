//! Error types for the wire data model.

use thiserror::Error;

/// Errors raised while parsing identifiers or (de)serializing messages.
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("Malformed object id: {0}")]
    MalformedObjectId(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),
}

/// Result type for wire-model operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
