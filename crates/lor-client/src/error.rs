//! Client-surface error types.

use crate::transport::{ChannelMode, ChannelState, TransportError};
use lor_pool::PoolError;
use lor_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The channel is not in a state that permits the attempted operation.
    #[error("channel state {0:?} does not permit this operation")]
    ChannelStateInvalid(ChannelState),

    /// The channel lacks a required mode grant.
    #[error("channel mode {0:?} is required for this operation")]
    ChannelModeRequired(ChannelMode),

    /// The batch would exceed the transport's message size limit.
    #[error("message batch of {size} bytes exceeds the {limit} byte limit")]
    MessageSizeExceeded { size: usize, limit: usize },

    /// The client has been disposed; no further operations are served.
    #[error("client is disposed")]
    Disposed,

    /// The caller passed an argument the engine cannot represent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
