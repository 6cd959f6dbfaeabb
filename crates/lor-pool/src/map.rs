//! LiveMap replica: a keyed LWW-entry CRDT.
//!
//! Every key holds one [`MapEntry`] replaced wholesale on each applied write.
//! Entry writes are ordered per key by timeserial comparison, so delivery
//! order does not affect the converged state. Values may reference other
//! pooled replicas; references are materialized eagerly so reads never
//! observe a dangling id.

use crate::clock::now_ms;
use crate::entry::MapEntry;
use crate::error::{PoolError, Result};
use crate::object::{validate_message, BaseState, MapRead};
use crate::pool::ObjectsPool;
use crate::subscribe::{KeyUpdate, LifecycleEvent, ObjectUpdate, Subscribers, SubscriptionId};
use lor_proto::{
    MapPayload, MapSemantics, ObjectData, ObjectMessage, ObjectState, OperationAction,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// A replicated last-writer-wins map.
pub struct LiveMap {
    object_id: String,
    inner: RwLock<MapInner>,
    updates: Subscribers<ObjectUpdate>,
    lifecycle: Subscribers<LifecycleEvent>,
}

struct MapInner {
    base: BaseState,
    entries: HashMap<String, MapEntry>,
}

impl LiveMap {
    /// A fresh zero-value map.
    pub fn zero_value(object_id: impl Into<String>) -> Self {
        LiveMap {
            object_id: object_id.into(),
            inner: RwLock::new(MapInner {
                base: BaseState::new(),
                entries: HashMap::new(),
            }),
            updates: Subscribers::new(),
            lifecycle: Subscribers::new(),
        }
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
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

    // ---- reads ----------------------------------------------------------

    /// Read one key. Returns `None` for a tombstoned map, an absent or
    /// tombstoned entry, or an entry referencing a tombstoned replica.
    pub fn get(&self, key: &str, pool: &ObjectsPool) -> Option<MapRead> {
        let inner = self.inner.read();
        if inner.base.is_tombstoned() {
            return None;
        }
        let entry = inner.entries.get(key)?;
        Self::read_entry(entry, pool)
    }

    /// All live entries. Entries referencing tombstoned replicas are skipped.
    pub fn entries(&self, pool: &ObjectsPool) -> Vec<(String, MapRead)> {
        let inner = self.inner.read();
        if inner.base.is_tombstoned() {
            return Vec::new();
        }
        inner
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                Self::read_entry(entry, pool).map(|read| (key.clone(), read))
            })
            .collect()
    }

    pub fn keys(&self, pool: &ObjectsPool) -> Vec<String> {
        self.entries(pool).into_iter().map(|(k, _)| k).collect()
    }

    pub fn values(&self, pool: &ObjectsPool) -> Vec<MapRead> {
        self.entries(pool).into_iter().map(|(_, v)| v).collect()
    }

    pub fn size(&self, pool: &ObjectsPool) -> usize {
        self.entries(pool).len()
    }

    fn read_entry(entry: &MapEntry, pool: &ObjectsPool) -> Option<MapRead> {
        if entry.tombstoned {
            return None;
        }
        let data = entry.data.as_ref()?;
        if let Some(ref_id) = &data.object_id {
            // Tombstoned references are never surfaced; a missing replica is
            // treated the same way.
            let object = pool.get(ref_id)?;
            if object.is_tombstoned() {
                return None;
            }
            return Some(MapRead::Object(object));
        }
        data.value.clone().map(MapRead::Value)
    }

    // ---- live operations -------------------------------------------------

    /// Apply a single live operation message.
    pub fn apply_object(&self, message: &ObjectMessage, pool: &ObjectsPool) -> Result<()> {
        let (operation, serial, site_code) = validate_message(&self.object_id, message)?;

        let mut update: Option<ObjectUpdate> = None;
        let mut deleted = false;
        {
            let mut inner = self.inner.write();
            let can_apply = inner.base.site_serials.can_apply(site_code, serial);
            // High-water mark moves even when the payload is skipped.
            inner.base.site_serials.observe(site_code, serial);
            if !can_apply || inner.base.is_tombstoned() {
                debug!(
                    object_id = %self.object_id,
                    site_code, serial, "skipping map operation"
                );
                return Ok(());
            }

            match operation.action {
                OperationAction::MapCreate => {
                    let merged =
                        Self::merge_create_locked(&mut inner, operation.map.as_ref(), pool)?;
                    if !merged.is_empty() {
                        update = Some(ObjectUpdate::Map { update: merged });
                    }
                }
                OperationAction::MapSet => {
                    let map_op = operation.map_op.as_ref().ok_or_else(|| {
                        PoolError::MissingOperationPayload("MAP_SET without map_op".to_string())
                    })?;
                    let data = map_op.data.clone().ok_or_else(|| {
                        PoolError::MissingOperationPayload("MAP_SET without data".to_string())
                    })?;
                    if let Some(applied) = Self::apply_set_locked(
                        &mut inner,
                        &map_op.key,
                        Some(serial.to_string()),
                        data,
                        pool,
                    )? {
                        update = Some(ObjectUpdate::Map {
                            update: HashMap::from([(map_op.key.clone(), applied)]),
                        });
                    }
                }
                OperationAction::MapRemove => {
                    let map_op = operation.map_op.as_ref().ok_or_else(|| {
                        PoolError::MissingOperationPayload("MAP_REMOVE without map_op".to_string())
                    })?;
                    if let Some(applied) = Self::apply_remove_locked(
                        &mut inner,
                        &map_op.key,
                        Some(serial.to_string()),
                    ) {
                        update = Some(ObjectUpdate::Map {
                            update: HashMap::from([(map_op.key.clone(), applied)]),
                        });
                    }
                }
                OperationAction::ObjectDelete => {
                    let removed = Self::tombstone_locked(&mut inner, message.timestamp);
                    deleted = true;
                    if !removed.is_empty() {
                        update = Some(ObjectUpdate::Map { update: removed });
                    }
                }
                other => {
                    return Err(PoolError::UnsupportedOperationAction(format!(
                        "map cannot apply {:?}",
                        other
                    )));
                }
            }
        }

        if let Some(update) = update {
            self.updates.emit(&update);
        }
        if deleted {
            self.lifecycle.emit(&LifecycleEvent::Deleted);
        }
        Ok(())
    }

    /// Apply a snapshot state. Returns the diff for deferred notification.
    pub fn apply_object_sync(&self, state: &ObjectState, pool: &ObjectsPool) -> Option<ObjectUpdate> {
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
                let removed = Self::tombstone_locked(&mut inner, None);
                deleted = true;
                if removed.is_empty() {
                    None
                } else {
                    Some(ObjectUpdate::Map { update: removed })
                }
            } else {
                let previous = std::mem::take(&mut inner.entries);
                inner.entries = Self::entries_from_payload(state.map.as_ref(), pool);
                if let Some(create_op) = &state.create_op {
                    if !inner.base.create_op_merged {
                        // Merge failures inside a snapshot are non-fatal.
                        if let Err(e) =
                            Self::merge_create_locked(&mut inner, create_op.map.as_ref(), pool)
                        {
                            warn!(object_id = %self.object_id, error = %e,
                                "dropping create op while applying snapshot");
                        }
                    }
                }
                let diff = diff_entries(&previous, &inner.entries);
                if diff.is_empty() {
                    None
                } else {
                    Some(ObjectUpdate::Map { update: diff })
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
                None
            } else {
                Some(Self::tombstone_locked(&mut inner, None))
            }
        };
        if let Some(removed) = fired {
            if !removed.is_empty() {
                self.updates.emit(&ObjectUpdate::Map { update: removed });
            }
            self.lifecycle.emit(&LifecycleEvent::Deleted);
        }
    }

    /// Drop all data and serial bookkeeping, as if freshly constructed.
    /// Used when the pool resets to its initial state. Returns the diff.
    pub fn reset_data(&self) -> ObjectUpdate {
        let mut inner = self.inner.write();
        let previous = std::mem::take(&mut inner.entries);
        inner.base = BaseState::new();
        ObjectUpdate::Map {
            update: diff_entries(&previous, &inner.entries),
        }
    }

    pub fn is_eligible_for_gc(&self, grace_period_ms: i64, now_ms: i64) -> bool {
        self.inner.read().base.is_eligible_for_gc(grace_period_ms, now_ms)
    }

    /// Sweep internal tombstoned entries past the grace period.
    pub fn on_gc_interval(&self, grace_period_ms: i64, now_ms: i64) {
        let mut inner = self.inner.write();
        inner
            .entries
            .retain(|_, entry| !entry.is_eligible_for_gc(grace_period_ms, now_ms));
    }

    // ---- internals -------------------------------------------------------

    /// Set `key` if the incoming serial wins. References are materialized in
    /// the pool before the entry becomes visible.
    fn apply_set_locked(
        inner: &mut MapInner,
        key: &str,
        serial: Option<String>,
        data: ObjectData,
        pool: &ObjectsPool,
    ) -> Result<Option<KeyUpdate>> {
        if let Some(existing) = inner.entries.get(key) {
            if !existing.can_apply(serial.as_deref()) {
                return Ok(None);
            }
        }
        if let Some(ref_id) = &data.object_id {
            pool.create_zero_value_if_absent(ref_id)?;
        }
        inner
            .entries
            .insert(key.to_string(), MapEntry::live(serial, data));
        Ok(Some(KeyUpdate::Updated))
    }

    /// Remove `key` (tombstone the entry) if the incoming serial wins.
    fn apply_remove_locked(
        inner: &mut MapInner,
        key: &str,
        serial: Option<String>,
    ) -> Option<KeyUpdate> {
        if let Some(existing) = inner.entries.get(key) {
            if !existing.can_apply(serial.as_deref()) {
                return None;
            }
        }
        inner
            .entries
            .insert(key.to_string(), MapEntry::tombstone(serial, now_ms()));
        Some(KeyUpdate::Removed)
    }

    /// Merge a map-create payload at most once per instance. Each payload
    /// entry is re-dispatched as a synthetic set/remove under that entry's
    /// own timeserial.
    fn merge_create_locked(
        inner: &mut MapInner,
        payload: Option<&MapPayload>,
        pool: &ObjectsPool,
    ) -> Result<HashMap<String, KeyUpdate>> {
        let mut merged = HashMap::new();
        if inner.base.create_op_merged {
            return Ok(merged);
        }
        if let Some(payload) = payload {
            if payload.semantics != MapSemantics::Lww {
                return Err(PoolError::InvalidObjectState(format!(
                    "map create with semantics {:?}",
                    payload.semantics
                )));
            }
            for (key, wire_entry) in &payload.entries {
                let serial = wire_entry.timeserial.clone();
                if wire_entry.tombstone.unwrap_or(false) {
                    if let Some(applied) = Self::apply_remove_locked(inner, key, serial) {
                        merged.insert(key.clone(), applied);
                    }
                } else if let Some(data) = wire_entry.data.clone() {
                    if let Some(applied) =
                        Self::apply_set_locked(inner, key, serial, data, pool)?
                    {
                        merged.insert(key.clone(), applied);
                    }
                } else {
                    debug!(key, "dropping create entry without data");
                }
            }
        }
        inner.base.create_op_merged = true;
        Ok(merged)
    }

    /// Tombstone this map, clearing every entry. Returns removals for the
    /// update diff.
    fn tombstone_locked(inner: &mut MapInner, at_ms: Option<i64>) -> HashMap<String, KeyUpdate> {
        inner.base.mark_tombstoned(at_ms);
        let previous = std::mem::take(&mut inner.entries);
        diff_entries(&previous, &inner.entries)
    }

    /// Build entry storage from a snapshot map payload. Live entries without
    /// data are malformed and dropped; references are materialized.
    fn entries_from_payload(
        payload: Option<&MapPayload>,
        pool: &ObjectsPool,
    ) -> HashMap<String, MapEntry> {
        let mut entries = HashMap::new();
        let Some(payload) = payload else {
            return entries;
        };
        for (key, wire_entry) in &payload.entries {
            let serial = wire_entry.timeserial.clone();
            if wire_entry.tombstone.unwrap_or(false) {
                entries.insert(key.clone(), MapEntry::tombstone(serial, now_ms()));
            } else if let Some(data) = wire_entry.data.clone() {
                if let Some(ref_id) = &data.object_id {
                    if let Err(e) = pool.create_zero_value_if_absent(ref_id) {
                        warn!(key, error = %e, "dropping snapshot entry with malformed reference");
                        continue;
                    }
                }
                entries.insert(key.clone(), MapEntry::live(serial, data));
            } else {
                warn!(key, "dropping snapshot entry without data");
            }
        }
        entries
    }
}

/// Classify per-key changes between two entry maps.
///
/// Keys that never existed, stayed tombstoned, or kept identical live data
/// produce no entry; transitions into live data are `Updated`, transitions
/// out of it are `Removed`.
pub fn diff_entries(
    previous: &HashMap<String, MapEntry>,
    current: &HashMap<String, MapEntry>,
) -> HashMap<String, KeyUpdate> {
    let mut diff = HashMap::new();
    let keys: HashSet<&String> = previous.keys().chain(current.keys()).collect();

    for key in keys {
        let prev = previous.get(key).filter(|e| !e.tombstoned);
        let curr = current.get(key).filter(|e| !e.tombstoned);
        match (prev, curr) {
            (None, Some(_)) => {
                diff.insert(key.clone(), KeyUpdate::Updated);
            }
            (Some(_), None) => {
                diff.insert(key.clone(), KeyUpdate::Removed);
            }
            (Some(p), Some(c)) => {
                if p.data != c.data {
                    diff.insert(key.clone(), KeyUpdate::Updated);
                }
            }
            (None, None) => {}
        }
    }
    diff
}
