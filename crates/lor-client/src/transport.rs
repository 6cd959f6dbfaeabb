//! Channel transport abstraction and the in-memory hub used by tests and
//! the demo binary.
//!
//! The engine never talks to a network directly: everything it needs from
//! the realtime layer is behind [`ChannelTransport`]. The in-memory
//! implementation plays the server role for a set of connected clients.
//! It assigns each connection a site code, stamps every published message
//! with a lexicographically increasing serial, and echoes the batch to all
//! connected clients, the publisher included.

use crate::worker::InboundEvent;
use async_trait::async_trait;
use lor_pool::now_ms;
use lor_proto::ObjectMessage;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Lifecycle state of the underlying channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
}

/// Capability grants on the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    ObjectSubscribe,
    ObjectPublish,
}

/// Failure reported by the transport when a publish is not acknowledged.
#[derive(Clone, Debug, Error)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

/// Everything the engine needs from the realtime layer.
///
/// `publish` resolves once the server acknowledges the batch; the
/// transport performs no internal retry, errors surface to the caller.
#[async_trait]
pub trait ChannelTransport: Send + Sync + 'static {
    async fn publish(&self, messages: Vec<ObjectMessage>) -> Result<(), TransportError>;

    fn channel_state(&self) -> ChannelState;

    fn channel_modes(&self) -> Vec<ChannelMode>;

    /// Whether published messages are echoed back to this connection.
    fn echo_enabled(&self) -> bool;

    /// Upper bound on the summed size of one published batch, in bytes.
    fn max_message_size(&self) -> usize;

    /// Server-advertised tombstone grace period, if any.
    fn gc_grace_period(&self) -> Option<Duration>;
}

const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

struct HubInner {
    next_site: u32,
    next_serial: u64,
    next_envelope: u64,
    intakes: Vec<mpsc::Sender<InboundEvent>>,
}

/// In-memory stand-in for the realtime service, shared by a set of
/// connected [`MemoryTransport`]s.
#[derive(Clone)]
pub struct MemoryRealtime {
    inner: Arc<RwLock<HubInner>>,
}

impl MemoryRealtime {
    pub fn new() -> Self {
        MemoryRealtime {
            inner: Arc::new(RwLock::new(HubInner {
                next_site: 0,
                next_serial: 0,
                next_envelope: 0,
                intakes: Vec::new(),
            })),
        }
    }

    /// Open a connection. Each connection gets its own site code.
    pub fn connect(&self) -> MemoryTransport {
        let site = {
            let mut inner = self.inner.write();
            inner.next_site += 1;
            inner.next_site
        };
        MemoryTransport {
            connection_id: format!("conn-{}", site),
            site_code: format!("s{:02}", site),
            hub: self.inner.clone(),
            state: RwLock::new(ChannelState::Attached),
            modes: RwLock::new(vec![ChannelMode::ObjectSubscribe, ChannelMode::ObjectPublish]),
            echo: RwLock::new(true),
            max_message_size: RwLock::new(DEFAULT_MAX_MESSAGE_SIZE),
            grace_period: RwLock::new(None),
        }
    }

    /// Register a client's intake with the hub and deliver the attach
    /// notification. A fresh hub carries no object data, so the client
    /// transitions straight to synced.
    pub async fn attach(&self, intake: mpsc::Sender<InboundEvent>) {
        self.inner.write().intakes.push(intake.clone());
        let _ = intake
            .send(InboundEvent::Attached {
                has_sync_data: false,
            })
            .await;
    }
}

impl Default for MemoryRealtime {
    fn default() -> Self {
        Self::new()
    }
}

/// One client connection to a [`MemoryRealtime`] hub.
///
/// State, modes, echo and limits are adjustable so tests can drive the
/// guard paths.
pub struct MemoryTransport {
    connection_id: String,
    site_code: String,
    hub: Arc<RwLock<HubInner>>,
    state: RwLock<ChannelState>,
    modes: RwLock<Vec<ChannelMode>>,
    echo: RwLock<bool>,
    max_message_size: RwLock<usize>,
    grace_period: RwLock<Option<Duration>>,
}

impl MemoryTransport {
    pub fn site_code(&self) -> &str {
        &self.site_code
    }

    pub fn set_channel_state(&self, state: ChannelState) {
        *self.state.write() = state;
    }

    pub fn set_channel_modes(&self, modes: Vec<ChannelMode>) {
        *self.modes.write() = modes;
    }

    pub fn set_echo_enabled(&self, echo: bool) {
        *self.echo.write() = echo;
    }

    pub fn set_max_message_size(&self, limit: usize) {
        *self.max_message_size.write() = limit;
    }

    pub fn set_gc_grace_period(&self, grace: Option<Duration>) {
        *self.grace_period.write() = grace;
    }
}

#[async_trait]
impl ChannelTransport for MemoryTransport {
    async fn publish(&self, mut messages: Vec<ObjectMessage>) -> Result<(), TransportError> {
        let timestamp = now_ms();

        // Stamp envelopes and collect recipients under the hub lock, then
        // deliver without holding it.
        let intakes: Vec<mpsc::Sender<InboundEvent>> = {
            let mut inner = self.hub.write();
            inner.next_envelope += 1;
            let envelope_id = format!("mem:{:08}", inner.next_envelope);
            for (index, message) in messages.iter_mut().enumerate() {
                inner.next_serial += 1;
                message.serial = Some(format!("{:016}", inner.next_serial));
                message.site_code = Some(self.site_code.clone());
                message.apply_envelope_defaults(
                    Some(&envelope_id),
                    Some(timestamp),
                    Some(&self.connection_id),
                    index,
                );
            }
            inner.intakes.clone()
        };

        debug!(count = messages.len(), site = %self.site_code, "hub broadcasting batch");
        for intake in intakes {
            // A closed intake belongs to a disposed client.
            let _ = intake.send(InboundEvent::Operations(messages.clone())).await;
        }
        Ok(())
    }

    fn channel_state(&self) -> ChannelState {
        *self.state.read()
    }

    fn channel_modes(&self) -> Vec<ChannelMode> {
        self.modes.read().clone()
    }

    fn echo_enabled(&self) -> bool {
        *self.echo.read()
    }

    fn max_message_size(&self) -> usize {
        *self.max_message_size.read()
    }

    fn gc_grace_period(&self) -> Option<Duration> {
        *self.grace_period.read()
    }
}
