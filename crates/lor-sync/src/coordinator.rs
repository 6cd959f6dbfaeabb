//! The sync coordinator: a state machine reconciling an in-flight snapshot
//! sequence with concurrently arriving live operations.
//!
//! While a snapshot sequence is in flight, live operations are buffered in
//! arrival order and replayed through the ordinary live path once the
//! sequence completes. A completed snapshot is authoritative over replica
//! existence: pooled replicas absent from it (other than root) are removed.

use crate::apply::apply_operation_message;
use crate::cursor::SyncCursor;
use lor_pool::{LiveObject, ObjectUpdate, ObjectsPool};
use lor_proto::{ObjectMessage, ObjectState};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the coordinator stands relative to snapshot catch-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// No sync observed yet; live operations are buffered.
    Initialized,
    /// A snapshot sequence is in flight.
    Syncing,
    /// Caught up; live operations apply immediately.
    Synced,
}

/// State machine over one channel's snapshot catch-up.
pub struct SyncCoordinator {
    state: SyncState,
    current_sync_id: Option<String>,
    snapshot_pool: HashMap<String, ObjectState>,
    buffered_ops: Vec<ObjectMessage>,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        SyncCoordinator {
            state: SyncState::Initialized,
            current_sync_id: None,
            snapshot_pool: HashMap::new(),
            buffered_ops: Vec::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Number of currently buffered live operations.
    pub fn buffered_len(&self) -> usize {
        self.buffered_ops.len()
    }

    /// Ingest one sync chunk: a cursor plus the object states it carries.
    pub fn handle_sync_chunk(
        &mut self,
        cursor: Option<&str>,
        messages: Vec<ObjectMessage>,
        pool: &ObjectsPool,
    ) {
        let cursor = cursor
            .filter(|c| !c.is_empty())
            .map(SyncCursor::parse);

        // A sequence announced by attach is Syncing with no sync id yet; its
        // first chunk adopts the cursor's id instead of restarting, so ops
        // buffered since attach survive until replay.
        let announced = self.state == SyncState::Syncing && self.current_sync_id.is_none();
        let starts_new = !announced
            && match (&cursor, &self.current_sync_id) {
                (Some(c), Some(current)) => c.sync_id != *current,
                _ => true,
            };
        if starts_new {
            self.start_new_sync(cursor.as_ref().map(|c| c.sync_id.clone()));
        } else if announced {
            self.current_sync_id = cursor.as_ref().map(|c| c.sync_id.clone());
        }

        for message in messages {
            let Some(state) = message.object_state else {
                warn!("dropping sync message without object state");
                continue;
            };
            if state.map.is_none() && state.counter.is_none() {
                warn!(object_id = %state.object_id, "dropping malformed object state");
                continue;
            }
            self.snapshot_pool.insert(state.object_id.clone(), state);
        }

        let ends = cursor.map_or(true, |c| c.ends_sequence());
        if ends {
            self.end_sync(pool);
        }
    }

    /// Ingest one live operation message: buffered until synced, applied
    /// immediately afterwards.
    pub fn handle_object_message(&mut self, message: ObjectMessage, pool: &ObjectsPool) {
        if self.state == SyncState::Synced {
            apply_operation_message(&message, pool);
        } else {
            self.buffered_ops.push(message);
        }
    }

    /// Channel attach notification. `has_sync_data` mirrors the transport's
    /// "more sync data to expect" flag: when set, a snapshot sequence is
    /// about to follow even if its first cursor is empty; when clear, the
    /// channel has no object data and the pool resets to its initial state.
    pub fn handle_attached(&mut self, has_sync_data: bool, pool: &ObjectsPool) {
        if has_sync_data {
            self.start_new_sync(None);
        } else {
            info!("attached without sync data; resetting to initial state");
            self.buffered_ops.clear();
            self.snapshot_pool.clear();
            self.current_sync_id = None;
            pool.reset_to_initial(true);
            self.state = SyncState::Synced;
        }
    }

    /// Discard partial accumulators and enter `Syncing`.
    fn start_new_sync(&mut self, sync_id: Option<String>) {
        if !self.buffered_ops.is_empty() || !self.snapshot_pool.is_empty() {
            debug!(
                buffered = self.buffered_ops.len(),
                accumulated = self.snapshot_pool.len(),
                "discarding partial sync state"
            );
        }
        self.buffered_ops.clear();
        self.snapshot_pool.clear();
        self.current_sync_id = sync_id;
        self.state = SyncState::Syncing;
    }

    /// Apply the accumulated snapshot, replay buffered operations in their
    /// original arrival order, and transition to `Synced`.
    fn end_sync(&mut self, pool: &ObjectsPool) {
        self.apply_snapshot(pool);

        let buffered = std::mem::take(&mut self.buffered_ops);
        for message in &buffered {
            apply_operation_message(message, pool);
        }

        self.current_sync_id = None;
        self.state = SyncState::Synced;
        info!(replayed = buffered.len(), "sync sequence completed");
    }

    fn apply_snapshot(&mut self, pool: &ObjectsPool) {
        let keep_ids: HashSet<String> = self.snapshot_pool.keys().cloned().collect();

        // Notifications for pre-existing replicas are deferred until the
        // whole snapshot has been applied.
        let mut deferred: Vec<(Arc<LiveObject>, ObjectUpdate)> = Vec::new();

        for (object_id, state) in self.snapshot_pool.drain() {
            match pool.get(&object_id) {
                Some(object) => {
                    if let Some(update) = object.apply_object_sync(&state, pool) {
                        deferred.push((object, update));
                    }
                }
                None => {
                    let object = match LiveObject::zero_value_from_state(&state) {
                        Ok(object) => Arc::new(object),
                        Err(e) => {
                            warn!(object_id = %object_id, error = %e,
                                "dropping snapshot state for unconstructible object");
                            continue;
                        }
                    };
                    object.apply_object_sync(&state, pool);
                    pool.set(object_id, object);
                }
            }
        }

        // Snapshots are authoritative over existence.
        pool.delete_extra(&keep_ids);

        for (object, update) in deferred {
            object.notify_update(&update);
        }
    }
}

impl Default for SyncCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lor_pool::MapRead;
    use lor_proto::{
        CounterOp, CounterPayload, MapOp, MapPayload, ObjectData, ObjectOperation, ObjectValue,
        OperationAction, WireMapEntry, ROOT_OBJECT_ID,
    };

    fn counter_state(object_id: &str, count: f64) -> ObjectMessage {
        ObjectMessage::from_state(ObjectState {
            object_id: object_id.to_string(),
            counter: Some(CounterPayload { count }),
            ..Default::default()
        })
    }

    fn root_state(entries: Vec<(&str, f64)>) -> ObjectMessage {
        let mut payload = MapPayload::default();
        for (key, value) in entries {
            payload.entries.insert(
                key.to_string(),
                WireMapEntry {
                    tombstone: None,
                    timeserial: Some("0001".to_string()),
                    data: Some(ObjectData::from_value(ObjectValue::Number(value))),
                },
            );
        }
        ObjectMessage::from_state(ObjectState {
            object_id: ROOT_OBJECT_ID.to_string(),
            map: Some(payload),
            ..Default::default()
        })
    }

    fn inc(object_id: &str, amount: f64, serial: &str) -> ObjectMessage {
        let mut op = ObjectOperation::new(OperationAction::CounterInc, object_id);
        op.counter_op = Some(CounterOp { amount });
        ObjectMessage {
            serial: Some(serial.to_string()),
            site_code: Some("s1".to_string()),
            operation: Some(op),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_chunk_sync() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();
        assert_eq!(coordinator.state(), SyncState::Initialized);

        coordinator.handle_sync_chunk(
            Some("sync-1:"),
            vec![counter_state("counter:a@1", 7.0)],
            &pool,
        );

        assert_eq!(coordinator.state(), SyncState::Synced);
        let counter = pool.get("counter:a@1").unwrap();
        assert_eq!(counter.as_counter().unwrap().value(), 7.0);
    }

    #[test]
    fn test_multi_chunk_sync_accumulates() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        coordinator.handle_sync_chunk(
            Some("sync-1:more"),
            vec![counter_state("counter:a@1", 1.0)],
            &pool,
        );
        assert_eq!(coordinator.state(), SyncState::Syncing);
        // Nothing applied yet.
        assert!(pool.get("counter:a@1").is_none());

        coordinator.handle_sync_chunk(
            Some("sync-1:"),
            vec![counter_state("counter:b@1", 2.0)],
            &pool,
        );
        assert_eq!(coordinator.state(), SyncState::Synced);
        assert!(pool.get("counter:a@1").is_some());
        assert!(pool.get("counter:b@1").is_some());
    }

    #[test]
    fn test_new_sync_id_discards_partial_state() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        coordinator.handle_sync_chunk(
            Some("sync-1:more"),
            vec![counter_state("counter:a@1", 1.0)],
            &pool,
        );
        coordinator.handle_object_message(inc("counter:a@1", 5.0, "0001"), &pool);
        assert_eq!(coordinator.buffered_len(), 1);

        // A different sync id restarts the sequence from scratch.
        coordinator.handle_sync_chunk(
            Some("sync-2:"),
            vec![counter_state("counter:b@1", 2.0)],
            &pool,
        );

        assert_eq!(coordinator.state(), SyncState::Synced);
        assert!(pool.get("counter:a@1").is_none());
        assert!(pool.get("counter:b@1").is_some());
        assert_eq!(coordinator.buffered_len(), 0);
    }

    #[test]
    fn test_ops_buffered_during_sync_replay_in_order() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        coordinator.handle_sync_chunk(
            Some("sync-1:more"),
            vec![counter_state("counter:a@1", 10.0)],
            &pool,
        );
        coordinator.handle_object_message(inc("counter:a@1", 5.0, "0001"), &pool);
        coordinator.handle_object_message(inc("counter:a@1", 3.0, "0002"), &pool);

        coordinator.handle_sync_chunk(Some("sync-1:"), vec![], &pool);

        let counter = pool.get("counter:a@1").unwrap();
        assert_eq!(counter.as_counter().unwrap().value(), 18.0);
    }

    #[test]
    fn test_ops_buffered_before_any_sync() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        // Initialized: not applied, buffered.
        coordinator.handle_object_message(inc("counter:a@1", 5.0, "0001"), &pool);
        assert!(pool.get("counter:a@1").is_none());
        assert_eq!(coordinator.buffered_len(), 1);
    }

    #[test]
    fn test_live_ops_apply_once_synced() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();
        coordinator.handle_sync_chunk(None, vec![], &pool);
        assert_eq!(coordinator.state(), SyncState::Synced);

        coordinator.handle_object_message(inc("counter:a@1", 2.0, "0001"), &pool);
        assert_eq!(pool.get("counter:a@1").unwrap().as_counter().unwrap().value(), 2.0);
    }

    #[test]
    fn test_sync_is_authoritative_over_existence() {
        let pool = ObjectsPool::new();
        pool.create_zero_value_if_absent("counter:old@1").unwrap();

        let mut coordinator = SyncCoordinator::new();
        coordinator.handle_sync_chunk(
            Some("sync-1:"),
            vec![counter_state("counter:new@1", 1.0)],
            &pool,
        );

        assert!(pool.get("counter:old@1").is_none());
        assert!(pool.get("counter:new@1").is_some());
        assert!(pool.get(ROOT_OBJECT_ID).is_some());
    }

    #[test]
    fn test_malformed_states_are_dropped() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        // State with neither map nor counter payload.
        let malformed = ObjectMessage::from_state(ObjectState {
            object_id: "counter:bad@1".to_string(),
            ..Default::default()
        });
        coordinator.handle_sync_chunk(Some("sync-1:"), vec![malformed], &pool);

        assert_eq!(coordinator.state(), SyncState::Synced);
        assert!(pool.get("counter:bad@1").is_none());
    }

    #[test]
    fn test_snapshot_updates_existing_replica() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        // First sync seeds the counter.
        coordinator.handle_sync_chunk(
            Some("sync-1:"),
            vec![counter_state("counter:a@1", 5.0)],
            &pool,
        );
        let counter = pool.get("counter:a@1").unwrap();

        // Second sync overrides it in place.
        coordinator.handle_sync_chunk(
            Some("sync-2:"),
            vec![counter_state("counter:a@1", 9.0)],
            &pool,
        );
        assert!(Arc::ptr_eq(&counter, &pool.get("counter:a@1").unwrap()));
        assert_eq!(counter.as_counter().unwrap().value(), 9.0);
    }

    #[test]
    fn test_attached_without_sync_data_resets() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        // Seed some state through a first sync.
        coordinator.handle_sync_chunk(
            Some("sync-1:"),
            vec![
                counter_state("counter:a@1", 5.0),
                root_state(vec![("k", 1.0)]),
            ],
            &pool,
        );
        let root = pool.root();
        assert_eq!(root.as_map().unwrap().size(&pool), 1);

        coordinator.handle_attached(false, &pool);

        assert_eq!(coordinator.state(), SyncState::Synced);
        assert!(pool.get("counter:a@1").is_none());
        assert_eq!(pool.root().as_map().unwrap().size(&pool), 0);
    }

    #[test]
    fn test_attached_with_sync_data_waits() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        coordinator.handle_attached(true, &pool);
        assert_eq!(coordinator.state(), SyncState::Syncing);

        // Live ops during the announced sync are buffered.
        coordinator.handle_object_message(inc("counter:a@1", 1.0, "0001"), &pool);
        assert_eq!(coordinator.buffered_len(), 1);

        coordinator.handle_sync_chunk(Some("sync-1:"), vec![], &pool);
        assert_eq!(coordinator.state(), SyncState::Synced);
        assert_eq!(pool.get("counter:a@1").unwrap().as_counter().unwrap().value(), 1.0);
    }

    #[test]
    fn test_attach_announced_sequence_adopts_first_cursor() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        coordinator.handle_attached(true, &pool);
        coordinator.handle_object_message(inc("counter:a@1", 1.0, "0001"), &pool);

        // The first chunk continues the announced sequence under its own
        // sync id; the op buffered since attach is not discarded.
        coordinator.handle_sync_chunk(
            Some("sync-1:more"),
            vec![counter_state("counter:a@1", 5.0)],
            &pool,
        );
        assert_eq!(coordinator.state(), SyncState::Syncing);
        assert_eq!(coordinator.buffered_len(), 1);

        coordinator.handle_sync_chunk(Some("sync-1:"), vec![], &pool);
        assert_eq!(coordinator.state(), SyncState::Synced);
        assert_eq!(
            pool.get("counter:a@1").unwrap().as_counter().unwrap().value(),
            6.0
        );
    }

    #[test]
    fn test_snapshot_reference_resolves_after_sync() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        // Root references a counter; both arrive in the same snapshot.
        let mut payload = MapPayload::default();
        payload.entries.insert(
            "votes".to_string(),
            WireMapEntry {
                tombstone: None,
                timeserial: Some("0001".to_string()),
                data: Some(ObjectData::from_reference("counter:v@1")),
            },
        );
        let root_msg = ObjectMessage::from_state(ObjectState {
            object_id: ROOT_OBJECT_ID.to_string(),
            map: Some(payload),
            ..Default::default()
        });

        coordinator.handle_sync_chunk(
            Some("sync-1:"),
            vec![root_msg, counter_state("counter:v@1", 3.0)],
            &pool,
        );

        let root = pool.root();
        match root.as_map().unwrap().get("votes", &pool) {
            Some(MapRead::Object(object)) => {
                assert_eq!(object.as_counter().unwrap().value(), 3.0);
            }
            _ => panic!("expected counter reference"),
        }
    }

    #[test]
    fn test_map_set_buffered_then_replayed() {
        let pool = ObjectsPool::new();
        let mut coordinator = SyncCoordinator::new();

        coordinator.handle_sync_chunk(Some("sync-1:more"), vec![], &pool);
        let mut op = ObjectOperation::new(OperationAction::MapSet, ROOT_OBJECT_ID);
        op.map_op = Some(MapOp {
            key: "name".to_string(),
            data: Some(ObjectData::from_value(ObjectValue::String(
                "amy".to_string(),
            ))),
        });
        coordinator.handle_object_message(
            ObjectMessage {
                serial: Some("0005".to_string()),
                site_code: Some("s1".to_string()),
                operation: Some(op),
                ..Default::default()
            },
            &pool,
        );

        coordinator.handle_sync_chunk(Some("sync-1:"), vec![], &pool);

        match pool.root().as_map().unwrap().get("name", &pool) {
            Some(MapRead::Value(ObjectValue::String(s))) => assert_eq!(s, "amy"),
            _ => panic!("expected replayed map set"),
        }
    }
}
