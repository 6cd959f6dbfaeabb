//! The objects pool: an arena of live replicas keyed by object id.
//!
//! The pool always holds one root map under the id `"root"`, created at
//! construction and never individually deleted; only its data can be
//! cleared. Replicas live until a GC sweep removes them or the pool is
//! disposed.

use crate::error::Result;
use crate::object::LiveObject;
use crate::subscribe::ObjectUpdate;
use lor_proto::ROOT_OBJECT_ID;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How often the background sweep runs.
pub const GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default minimum retention of tombstones before they are purged.
pub const GC_GRACE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Floor for server-supplied grace overrides. Anything at or below this would
/// break causal ordering of delayed operations and is ignored.
pub const MIN_GC_GRACE_PERIOD: Duration = Duration::from_secs(2 * 60);

/// Arena of live replicas for one channel.
pub struct ObjectsPool {
    objects: RwLock<HashMap<String, Arc<LiveObject>>>,
}

impl ObjectsPool {
    /// A pool holding only the root map.
    pub fn new() -> Self {
        let root = Arc::new(LiveObject::zero_value_from_id(ROOT_OBJECT_ID)
            .expect("root id is always constructible"));
        ObjectsPool {
            objects: RwLock::new(HashMap::from([(ROOT_OBJECT_ID.to_string(), root)])),
        }
    }

    pub fn get(&self, object_id: &str) -> Option<Arc<LiveObject>> {
        self.objects.read().get(object_id).cloned()
    }

    /// The root map. Always present.
    pub fn root(&self) -> Arc<LiveObject> {
        self.get(ROOT_OBJECT_ID)
            .expect("root object is never removed")
    }

    pub fn set(&self, object_id: impl Into<String>, object: Arc<LiveObject>) {
        self.objects.write().insert(object_id.into(), object);
    }

    /// Fetch the replica for `object_id`, constructing and inserting an
    /// empty one when absent. Idempotent: a replica already in the pool is
    /// returned unchanged.
    pub fn create_zero_value_if_absent(&self, object_id: &str) -> Result<Arc<LiveObject>> {
        if let Some(existing) = self.get(object_id) {
            return Ok(existing);
        }
        let fresh = Arc::new(LiveObject::zero_value_from_id(object_id)?);
        let mut objects = self.objects.write();
        Ok(objects
            .entry(object_id.to_string())
            .or_insert(fresh)
            .clone())
    }

    /// Remove every replica whose id is not in `keep_ids`. The root map is
    /// exempt. Used after a completed sync: snapshots are authoritative over
    /// replica existence.
    pub fn delete_extra(&self, keep_ids: &HashSet<String>) {
        let mut objects = self.objects.write();
        objects.retain(|id, _| id == ROOT_OBJECT_ID || keep_ids.contains(id));
    }

    /// Drop every non-root replica and clear the root map's own data, as if
    /// the pool were freshly constructed. When `emit_events` is set, root
    /// subscribers are notified of the clear.
    pub fn reset_to_initial(&self, emit_events: bool) {
        let root = self.root();
        {
            let mut objects = self.objects.write();
            objects.retain(|id, _| id == ROOT_OBJECT_ID);
        }
        let update = root
            .as_map()
            .map(|map| map.reset_data())
            .unwrap_or(ObjectUpdate::Map {
                update: HashMap::new(),
            });
        if emit_events && !update.is_empty() {
            root.notify_update(&update);
        }
    }

    /// One sweep pass: purge replicas whose tombstones outlived the grace
    /// period, and ask the rest to sweep their internal tombstoned entries.
    pub fn gc_sweep(&self, grace_period_ms: i64, now_ms: i64) {
        // Replica locks are never taken while holding the pool lock: a
        // concurrent write holding a replica lock may be materializing a
        // reference, which takes the pool lock. Sweep over a snapshot.
        let snapshot: Vec<(String, Arc<LiveObject>)> = {
            let objects = self.objects.read();
            objects
                .iter()
                .map(|(id, object)| (id.clone(), object.clone()))
                .collect()
        };

        let mut expired: HashSet<String> = HashSet::new();
        for (id, object) in &snapshot {
            if id != ROOT_OBJECT_ID && object.is_eligible_for_gc(grace_period_ms, now_ms) {
                expired.insert(id.clone());
            }
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "purging tombstoned replicas");
            let mut objects = self.objects.write();
            for id in &expired {
                objects.remove(id);
            }
        }

        for (id, object) in snapshot {
            if !expired.contains(&id) {
                object.on_gc_interval(grace_period_ms, now_ms);
            }
        }
    }

    /// All pooled ids.
    pub fn ids(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Release every replica, root included. Only valid at disposal; the
    /// pool must not be used afterwards.
    pub fn dispose(&self) {
        self.objects.write().clear();
    }
}

impl Default for ObjectsPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the effective GC grace period from an optional server override.
/// Overrides at or below the floor are rejected.
pub fn effective_grace_period(server_override: Option<Duration>) -> Duration {
    match server_override {
        Some(grace) if grace > MIN_GC_GRACE_PERIOD => grace,
        Some(grace) => {
            warn!(
                supplied_ms = grace.as_millis() as u64,
                floor_ms = MIN_GC_GRACE_PERIOD.as_millis() as u64,
                "ignoring too-short gc grace override"
            );
            GC_GRACE_PERIOD
        }
        None => GC_GRACE_PERIOD,
    }
}
