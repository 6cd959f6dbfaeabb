//! The serialized intake worker.
//!
//! Every inbound event funnels through one bounded mailbox into a single
//! task that owns the sync coordinator. Serialization is what upholds the
//! pool's ordering guarantees; nothing else applies inbound messages.

use lor_pool::ObjectsPool;
use lor_proto::ObjectMessage;
use lor_sync::SyncCoordinator;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Mailbox capacity. Senders back-pressure once the worker falls this far
/// behind.
pub(crate) const INTAKE_CAPACITY: usize = 256;

/// One event delivered by the transport layer.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    /// Live operation messages, already envelope-stamped.
    Operations(Vec<ObjectMessage>),
    /// One chunk of a snapshot sequence.
    SyncChunk {
        cursor: Option<String>,
        messages: Vec<ObjectMessage>,
    },
    /// Channel attach notification.
    Attached { has_sync_data: bool },
}

/// Spawn the worker task. Returns the intake sender and the join handle;
/// closing the sender or flipping the shutdown signal stops the task.
pub(crate) fn spawn(
    pool: Arc<ObjectsPool>,
    mut shutdown: watch::Receiver<bool>,
) -> (mpsc::Sender<InboundEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<InboundEvent>(INTAKE_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut coordinator = SyncCoordinator::new();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = rx.recv() => {
                    match event {
                        Some(InboundEvent::Operations(messages)) => {
                            for message in &messages {
                                coordinator.handle_object_message(message.clone(), &pool);
                            }
                        }
                        Some(InboundEvent::SyncChunk { cursor, messages }) => {
                            coordinator.handle_sync_chunk(cursor.as_deref(), messages, &pool);
                        }
                        Some(InboundEvent::Attached { has_sync_data }) => {
                            coordinator.handle_attached(has_sync_data, &pool);
                        }
                        None => break,
                    }
                }
            }
        }
        debug!("intake worker stopped");
    });

    (tx, handle)
}
