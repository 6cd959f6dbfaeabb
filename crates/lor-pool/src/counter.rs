//! LiveCounter replica: a numeric accumulator CRDT.
//!
//! Increments sum; a counter-create's initial value is additive relative to
//! concurrent increments, merged exactly once per replica instance.

use crate::error::{PoolError, Result};
use crate::object::{validate_message, BaseState};
use crate::subscribe::{LifecycleEvent, ObjectUpdate, Subscribers, SubscriptionId};
use lor_proto::{ObjectMessage, ObjectState, OperationAction};
use parking_lot::RwLock;
use tracing::debug;

/// A replicated summing counter.
pub struct LiveCounter {
    object_id: String,
    inner: RwLock<CounterInner>,
    updates: Subscribers<ObjectUpdate>,
    lifecycle: Subscribers<LifecycleEvent>,
}

struct CounterInner {
    base: BaseState,
    value: f64,
}

impl LiveCounter {
    /// A fresh zero-value counter.
    pub fn zero_value(object_id: impl Into<String>) -> Self {
        LiveCounter {
            object_id: object_id.into(),
            inner: RwLock::new(CounterInner {
                base: BaseState::new(),
                value: 0.0,
            }),
            updates: Subscribers::new(),
            lifecycle: Subscribers::new(),
        }
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Current value. Callable from any thread; a tombstoned counter reads
    /// as zero (its payload is cleared).
    pub fn value(&self) -> f64 {
        self.inner.read().value
    }

    pub fn is_tombstoned(&self) -> bool {
        self.inner.read().base.is_tombstoned()
    }

    pub fn tombstoned_at(&self) -> Option<i64> {
        self.inner.read().base.tombstoned_at
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&ObjectUpdate) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.updates.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.updates.unsubscribe(id)
    }

    pub fn on_lifecycle(
        &self,
        callback: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.lifecycle.subscribe(callback)
    }

    /// Apply a single live operation message.
    pub fn apply_object(&self, message: &ObjectMessage) -> Result<()> {
        let (operation, serial, site_code) = validate_message(&self.object_id, message)?;

        let mut update = None;
        let mut deleted = false;
        {
            let mut inner = self.inner.write();
            let can_apply = inner.base.site_serials.can_apply(site_code, serial);
            // High-water mark moves even when the payload is skipped.
            inner.base.site_serials.observe(site_code, serial);
            if !can_apply || inner.base.is_tombstoned() {
                debug!(
                    object_id = %self.object_id,
                    site_code, serial, "skipping counter operation"
                );
                return Ok(());
            }

            match operation.action {
                OperationAction::CounterCreate => {
                    if !inner.base.create_op_merged {
                        let amount = operation.counter.as_ref().map(|c| c.count).unwrap_or(0.0);
                        inner.value += amount;
                        inner.base.create_op_merged = true;
                        if amount != 0.0 {
                            update = Some(ObjectUpdate::Counter { amount });
                        }
                    }
                }
                OperationAction::CounterInc => {
                    let amount = operation
                        .counter_op
                        .as_ref()
                        .ok_or_else(|| {
                            PoolError::MissingOperationPayload(
                                "COUNTER_INC without counter_op".to_string(),
                            )
                        })?
                        .amount;
                    inner.value += amount;
                    update = Some(ObjectUpdate::Counter { amount });
                }
                OperationAction::ObjectDelete => {
                    let previous = inner.value;
                    Self::tombstone_locked(&mut inner, message.timestamp);
                    deleted = true;
                    update = Some(ObjectUpdate::Counter { amount: -previous });
                }
                other => {
                    return Err(PoolError::UnsupportedOperationAction(format!(
                        "counter cannot apply {:?}",
                        other
                    )));
                }
            }
        }

        if let Some(update) = update {
            if !update.is_empty() {
                self.updates.emit(&update);
            }
        }
        if deleted {
            self.lifecycle.emit(&LifecycleEvent::Deleted);
        }
        Ok(())
    }

    /// Apply a snapshot state. Returns the diff for deferred notification;
    /// the caller emits it once the whole snapshot has been applied.
    pub fn apply_object_sync(&self, state: &ObjectState) -> Option<ObjectUpdate> {
        let mut deleted = false;
        let update = {
            let mut inner = self.inner.write();
            inner
                .base
                .site_serials
                .replace_all(state.site_timeserials.clone());

            if inner.base.is_tombstoned() {
                None
            } else if state.tombstone {
                let previous = inner.value;
                Self::tombstone_locked(&mut inner, None);
                deleted = true;
                if previous != 0.0 {
                    Some(ObjectUpdate::Counter { amount: -previous })
                } else {
                    None
                }
            } else {
                let previous = inner.value;
                let mut value = state.counter.as_ref().map(|c| c.count).unwrap_or(0.0);
                if let Some(create_op) = &state.create_op {
                    if !inner.base.create_op_merged {
                        value += create_op.counter.as_ref().map(|c| c.count).unwrap_or(0.0);
                        inner.base.create_op_merged = true;
                    }
                }
                inner.value = value;
                let amount = value - previous;
                if amount != 0.0 {
                    Some(ObjectUpdate::Counter { amount })
                } else {
                    None
                }
            }
        };

        if deleted {
            self.lifecycle.emit(&LifecycleEvent::Deleted);
        }
        update
    }

    /// Emit a previously computed diff (deferred sync notification).
    pub fn notify_update(&self, update: &ObjectUpdate) {
        if !update.is_empty() {
            self.updates.emit(update);
        }
    }

    /// Idempotent one-way tombstone transition.
    pub fn tombstone(&self) {
        let fired = {
            let mut inner = self.inner.write();
            if inner.base.is_tombstoned() {
                false
            } else {
                Self::tombstone_locked(&mut inner, None);
                true
            }
        };
        if fired {
            self.lifecycle.emit(&LifecycleEvent::Deleted);
        }
    }

    fn tombstone_locked(inner: &mut CounterInner, at_ms: Option<i64>) {
        inner.base.mark_tombstoned(at_ms);
        inner.value = 0.0;
    }

    pub fn is_eligible_for_gc(&self, grace_period_ms: i64, now_ms: i64) -> bool {
        self.inner.read().base.is_eligible_for_gc(grace_period_ms, now_ms)
    }
}
