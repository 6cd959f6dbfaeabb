//! Public client surface: the objects facade and typed replica handles.

use crate::error::{ClientError, Result};
use crate::guards;
use crate::transport::ChannelTransport;
use crate::worker::{self, InboundEvent};
use lor_pool::{
    effective_grace_period, now_ms, LiveObject, MapRead, ObjectUpdate, ObjectsPool,
    SubscriptionId, GC_INTERVAL,
};
use lor_proto::{
    CounterOp, CounterPayload, MapOp, MapPayload, ObjectData, ObjectId, ObjectMessage,
    ObjectOperation, ObjectType, ObjectValue, OperationAction, ROOT_OBJECT_ID,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

struct Shared<T: ChannelTransport> {
    transport: Arc<T>,
    pool: Arc<ObjectsPool>,
    intake: mpsc::Sender<InboundEvent>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl<T: ChannelTransport> Shared<T> {
    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ClientError::Disposed);
        }
        Ok(())
    }

    async fn publish(&self, messages: Vec<ObjectMessage>) -> Result<()> {
        self.ensure_live()?;
        guards::check_write(self.transport.as_ref())?;
        guards::check_size(&messages, self.transport.max_message_size())?;
        self.transport.publish(messages).await?;
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        self.ensure_live()?;
        guards::check_read(self.transport.as_ref())
    }
}

/// Entry point to the replicated object tree on one channel.
///
/// Owns the replica pool, the serialized intake worker and the periodic
/// tombstone sweep. Cloning is cheap and shares everything.
pub struct RealtimeObjects<T: ChannelTransport> {
    shared: Arc<Shared<T>>,
}

impl<T: ChannelTransport> Clone for RealtimeObjects<T> {
    fn clone(&self) -> Self {
        RealtimeObjects {
            shared: self.shared.clone(),
        }
    }
}

impl<T: ChannelTransport> RealtimeObjects<T> {
    pub fn new(transport: Arc<T>) -> Self {
        let pool = Arc::new(ObjectsPool::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (intake, worker_handle) = worker::spawn(pool.clone(), shutdown_rx.clone());
        let gc_handle = spawn_gc(pool.clone(), &transport, shutdown_rx);

        RealtimeObjects {
            shared: Arc::new(Shared {
                transport,
                pool,
                intake,
                shutdown: shutdown_tx,
                tasks: Mutex::new(vec![worker_handle, gc_handle]),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Sender feeding the intake worker. The transport integration pushes
    /// decoded channel traffic through this.
    pub fn intake(&self) -> mpsc::Sender<InboundEvent> {
        self.shared.intake.clone()
    }

    /// Handle on the root map. Always present; never garbage collected.
    pub fn root(&self) -> LiveMapRef<T> {
        LiveMapRef {
            object_id: ROOT_OBJECT_ID.to_string(),
            shared: self.shared.clone(),
        }
    }

    /// Ids of every pooled replica, for diagnostics.
    pub fn object_ids(&self) -> Vec<String> {
        self.shared.pool.ids()
    }

    /// Typed handle on a pooled map replica, if one exists under this id.
    pub fn map(&self, object_id: &str) -> Result<Option<LiveMapRef<T>>> {
        self.shared.check_read()?;
        Ok(self
            .shared
            .pool
            .get(object_id)
            .filter(|object| object.as_map().is_some())
            .map(|_| LiveMapRef {
                object_id: object_id.to_string(),
                shared: self.shared.clone(),
            }))
    }

    /// Typed handle on a pooled counter replica, if one exists under this id.
    pub fn counter(&self, object_id: &str) -> Result<Option<LiveCounterRef<T>>> {
        self.shared.check_read()?;
        Ok(self
            .shared
            .pool
            .get(object_id)
            .filter(|object| object.as_counter().is_some())
            .map(|_| LiveCounterRef {
                object_id: object_id.to_string(),
                shared: self.shared.clone(),
            }))
    }

    /// Create a map replica on the channel and return its handle.
    ///
    /// The replica id is a pure function of the create operation, so every
    /// client derives the same id from the echoed operation.
    pub async fn create_map(&self) -> Result<LiveMapRef<T>> {
        let nonce = format!("{:016x}", rand::random::<u64>());
        let object_id =
            ObjectId::from_create_op(ObjectType::Map, Some(&nonce), None, now_ms()).to_string();

        let mut op = ObjectOperation::new(OperationAction::MapCreate, &object_id);
        op.map = Some(MapPayload::default());
        op.nonce = Some(nonce);

        self.shared
            .publish(vec![ObjectMessage::from_operation(op)])
            .await?;

        // The replica materializes when the intake worker applies the echoed
        // create; the handle resolves it through the pool from then on.
        Ok(LiveMapRef {
            object_id,
            shared: self.shared.clone(),
        })
    }

    /// Create a counter replica starting at `initial`.
    pub async fn create_counter(&self, initial: f64) -> Result<LiveCounterRef<T>> {
        if !initial.is_finite() {
            return Err(ClientError::InvalidArgument(
                "counter value must be finite".to_string(),
            ));
        }
        let nonce = format!("{:016x}", rand::random::<u64>());
        let initial_value = ObjectValue::Number(initial);
        let object_id = ObjectId::from_create_op(
            ObjectType::Counter,
            Some(&nonce),
            Some(&initial_value),
            now_ms(),
        )
        .to_string();

        let mut op = ObjectOperation::new(OperationAction::CounterCreate, &object_id);
        op.counter = Some(CounterPayload { count: initial });
        op.initial_value = Some(ObjectData::from_value(initial_value));
        op.nonce = Some(nonce);

        self.shared
            .publish(vec![ObjectMessage::from_operation(op)])
            .await?;

        Ok(LiveCounterRef {
            object_id,
            shared: self.shared.clone(),
        })
    }

    /// Stop the worker and the sweep task and clear the pool. Idempotent;
    /// every operation after this fails with [`ClientError::Disposed`].
    pub async fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("disposing objects client");
        let _ = self.shared.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.shared.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.shared.pool.dispose();
    }
}

fn spawn_gc<T: ChannelTransport>(
    pool: Arc<ObjectsPool>,
    transport: &Arc<T>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let grace = effective_grace_period(transport.gc_grace_period());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GC_INTERVAL);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    pool.gc_sweep(grace.as_millis() as i64, now_ms());
                }
            }
        }
    })
}

/// Typed handle on a map replica.
///
/// Handles never pin a replica instance: every access resolves the id
/// through the pool, so a handle stays valid across snapshot rewrites and
/// pool resets. An unresolved id (replica not yet echoed, or evicted by a
/// sync) reads as a zero-value map.
pub struct LiveMapRef<T: ChannelTransport> {
    object_id: String,
    shared: Arc<Shared<T>>,
}

impl<T: ChannelTransport> Clone for LiveMapRef<T> {
    fn clone(&self) -> Self {
        LiveMapRef {
            object_id: self.object_id.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T: ChannelTransport> LiveMapRef<T> {
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    fn replica(&self) -> Option<Arc<LiveObject>> {
        self.shared.pool.get(&self.object_id)
    }

    pub fn get(&self, key: &str) -> Result<Option<MapRead>> {
        self.shared.check_read()?;
        Ok(self.replica().and_then(|object| {
            object
                .as_map()
                .and_then(|map| map.get(key, &self.shared.pool))
        }))
    }

    pub fn entries(&self) -> Result<Vec<(String, MapRead)>> {
        self.shared.check_read()?;
        Ok(self
            .replica()
            .and_then(|object| object.as_map().map(|map| map.entries(&self.shared.pool)))
            .unwrap_or_default())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.shared.check_read()?;
        Ok(self
            .replica()
            .and_then(|object| object.as_map().map(|map| map.keys(&self.shared.pool)))
            .unwrap_or_default())
    }

    pub fn values(&self) -> Result<Vec<MapRead>> {
        self.shared.check_read()?;
        Ok(self
            .replica()
            .and_then(|object| object.as_map().map(|map| map.values(&self.shared.pool)))
            .unwrap_or_default())
    }

    pub fn size(&self) -> Result<usize> {
        self.shared.check_read()?;
        Ok(self
            .replica()
            .and_then(|object| object.as_map().map(|map| map.size(&self.shared.pool)))
            .unwrap_or(0))
    }

    /// Set `key` to a leaf value. Resolves once the server acknowledges;
    /// the local replica updates when the echo arrives.
    pub async fn set(&self, key: &str, value: ObjectValue) -> Result<()> {
        self.publish_set(key, ObjectData::from_value(value)).await
    }

    /// Set `key` to a reference to another replica.
    pub async fn set_reference(&self, key: &str, target_id: &str) -> Result<()> {
        ObjectId::parse(target_id)?;
        self.publish_set(key, ObjectData::from_reference(target_id))
            .await
    }

    async fn publish_set(&self, key: &str, data: ObjectData) -> Result<()> {
        check_map_key(key)?;
        let mut op = ObjectOperation::new(OperationAction::MapSet, self.object_id());
        op.map_op = Some(MapOp {
            key: key.to_string(),
            data: Some(data),
        });
        self.shared
            .publish(vec![ObjectMessage::from_operation(op)])
            .await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        check_map_key(key)?;
        let mut op = ObjectOperation::new(OperationAction::MapRemove, self.object_id());
        op.map_op = Some(MapOp {
            key: key.to_string(),
            data: None,
        });
        self.shared
            .publish(vec![ObjectMessage::from_operation(op)])
            .await
    }

    /// Subscribe to per-key updates. Materializes the replica if its echo
    /// has not arrived yet, so a subscription on a fresh handle never
    /// misses it.
    pub fn subscribe(
        &self,
        callback: impl Fn(&ObjectUpdate) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.shared.check_read()?;
        let object = self.shared.pool.create_zero_value_if_absent(&self.object_id)?;
        // Replica type is a pure function of the id.
        Ok(object
            .as_map()
            .expect("map id resolves to a map replica")
            .subscribe(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(object) = self.replica() {
            if let Some(map) = object.as_map() {
                map.unsubscribe(id);
            }
        }
    }
}

/// Typed handle on a counter replica.
///
/// Resolves through the pool by id on every access, like [`LiveMapRef`].
/// An unresolved id reads as zero.
pub struct LiveCounterRef<T: ChannelTransport> {
    object_id: String,
    shared: Arc<Shared<T>>,
}

impl<T: ChannelTransport> Clone for LiveCounterRef<T> {
    fn clone(&self) -> Self {
        LiveCounterRef {
            object_id: self.object_id.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T: ChannelTransport> LiveCounterRef<T> {
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    fn replica(&self) -> Option<Arc<LiveObject>> {
        self.shared.pool.get(&self.object_id)
    }

    pub fn value(&self) -> Result<f64> {
        self.shared.check_read()?;
        Ok(self
            .replica()
            .and_then(|object| object.as_counter().map(|counter| counter.value()))
            .unwrap_or(0.0))
    }

    /// Add `amount`. Resolves on server ack; the local value updates when
    /// the echo arrives.
    pub async fn increment(&self, amount: f64) -> Result<()> {
        if !amount.is_finite() {
            return Err(ClientError::InvalidArgument(
                "counter amount must be finite".to_string(),
            ));
        }
        let mut op = ObjectOperation::new(OperationAction::CounterInc, self.object_id());
        op.counter_op = Some(CounterOp { amount });
        self.shared
            .publish(vec![ObjectMessage::from_operation(op)])
            .await
    }

    pub async fn decrement(&self, amount: f64) -> Result<()> {
        self.increment(-amount).await
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&ObjectUpdate) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.shared.check_read()?;
        let object = self.shared.pool.create_zero_value_if_absent(&self.object_id)?;
        Ok(object
            .as_counter()
            .expect("counter id resolves to a counter replica")
            .subscribe(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(object) = self.replica() {
            if let Some(counter) = object.as_counter() {
                counter.unsubscribe(id);
            }
        }
    }
}

fn check_map_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ClientError::InvalidArgument(
            "map key must not be empty".to_string(),
        ));
    }
    Ok(())
}
