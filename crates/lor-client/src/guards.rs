//! Channel guards checked before touching the pool or the wire.

use crate::error::{ClientError, Result};
use crate::transport::{ChannelMode, ChannelState, ChannelTransport};
use lor_proto::{size_of, ObjectMessage};

/// A write requires an attached channel, echo, and the publish grant.
/// Without echo the client would never observe its own operations and its
/// local replicas would drift from the channel.
pub fn check_write<T: ChannelTransport + ?Sized>(transport: &T) -> Result<()> {
    let state = transport.channel_state();
    if state != ChannelState::Attached {
        return Err(ClientError::ChannelStateInvalid(state));
    }
    if !transport.echo_enabled() {
        return Err(ClientError::ChannelStateInvalid(state));
    }
    if !transport
        .channel_modes()
        .contains(&ChannelMode::ObjectPublish)
    {
        return Err(ClientError::ChannelModeRequired(ChannelMode::ObjectPublish));
    }
    Ok(())
}

/// A read requires a channel that can still receive updates and the
/// subscribe grant.
pub fn check_read<T: ChannelTransport + ?Sized>(transport: &T) -> Result<()> {
    let state = transport.channel_state();
    if matches!(state, ChannelState::Detached | ChannelState::Failed) {
        return Err(ClientError::ChannelStateInvalid(state));
    }
    if !transport
        .channel_modes()
        .contains(&ChannelMode::ObjectSubscribe)
    {
        return Err(ClientError::ChannelModeRequired(
            ChannelMode::ObjectSubscribe,
        ));
    }
    Ok(())
}

/// Pre-publish size check over the whole batch.
pub fn check_size(messages: &[ObjectMessage], limit: usize) -> Result<()> {
    let size: usize = messages.iter().map(size_of).sum();
    if size > limit {
        return Err(ClientError::MessageSizeExceeded { size, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRealtime;
    use lor_proto::{ObjectOperation, OperationAction};

    #[test]
    fn test_write_requires_attached() {
        let transport = MemoryRealtime::new().connect();
        assert!(check_write(&transport).is_ok());

        transport.set_channel_state(ChannelState::Suspended);
        assert!(matches!(
            check_write(&transport),
            Err(ClientError::ChannelStateInvalid(ChannelState::Suspended))
        ));
    }

    #[test]
    fn test_write_requires_echo() {
        let transport = MemoryRealtime::new().connect();
        transport.set_echo_enabled(false);
        assert!(check_write(&transport).is_err());
    }

    #[test]
    fn test_write_requires_publish_mode() {
        let transport = MemoryRealtime::new().connect();
        transport.set_channel_modes(vec![ChannelMode::ObjectSubscribe]);
        assert!(matches!(
            check_write(&transport),
            Err(ClientError::ChannelModeRequired(ChannelMode::ObjectPublish))
        ));
    }

    #[test]
    fn test_read_allowed_while_suspended() {
        let transport = MemoryRealtime::new().connect();
        transport.set_channel_state(ChannelState::Suspended);
        assert!(check_read(&transport).is_ok());

        transport.set_channel_state(ChannelState::Failed);
        assert!(check_read(&transport).is_err());
    }

    #[test]
    fn test_read_requires_subscribe_mode() {
        let transport = MemoryRealtime::new().connect();
        transport.set_channel_modes(vec![ChannelMode::ObjectPublish]);
        assert!(matches!(
            check_read(&transport),
            Err(ClientError::ChannelModeRequired(ChannelMode::ObjectSubscribe))
        ));
    }

    #[test]
    fn test_size_guard() {
        let mut op = ObjectOperation::new(OperationAction::MapSet, "map:a@1");
        op.map_op = Some(lor_proto::MapOp {
            key: "k".repeat(64),
            data: None,
        });
        let message = lor_proto::ObjectMessage::from_operation(op);

        assert!(check_size(std::slice::from_ref(&message), 1024).is_ok());
        assert!(matches!(
            check_size(&[message], 16),
            Err(ClientError::MessageSizeExceeded { limit: 16, .. })
        ));
    }
}
