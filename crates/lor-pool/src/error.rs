//! Error types for replica and pool operations.

use lor_proto::ProtoError;
use thiserror::Error;

/// Errors raised while applying operations or managing the pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Operation or state targets a different object, or its semantics do
    /// not match the target replica.
    #[error("Invalid object state: {0}")]
    InvalidObjectState(String),

    /// Action code the target replica type cannot handle.
    #[error("Unsupported operation action: {0}")]
    UnsupportedOperationAction(String),

    /// Operation lacks the sub-payload its action requires.
    #[error("Missing operation payload: {0}")]
    MissingOperationPayload(String),

    /// Message lacks a serial, required for causal ordering.
    #[error("Invalid serial: {0}")]
    InvalidSerial(String),

    /// Message lacks a site code, required for causal ordering.
    #[error("Invalid site code: {0}")]
    InvalidSiteCode(String),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

/// Result type for replica and pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
