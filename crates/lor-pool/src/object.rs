//! Shared replica lifecycle and the closed replica variant.
//!
//! Both replicated types share causal-serial bookkeeping, tombstoning and
//! GC eligibility. They are dispatched through the closed [`LiveObject`]
//! enum rather than virtual inheritance.

use crate::clock::now_ms;
use crate::counter::LiveCounter;
use crate::error::{PoolError, Result};
use crate::map::LiveMap;
use crate::pool::ObjectsPool;
use crate::serials::SiteSerials;
use crate::subscribe::ObjectUpdate;
use lor_proto::{
    ObjectId, ObjectMessage, ObjectOperation, ObjectState, ObjectType, ObjectValue,
    ROOT_OBJECT_ID,
};
use std::sync::Arc;

/// Lifecycle state every replica carries.
#[derive(Clone, Debug, Default)]
pub(crate) struct BaseState {
    pub site_serials: SiteSerials,
    pub tombstoned_at: Option<i64>,
    pub create_op_merged: bool,
}

impl BaseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned_at.is_some()
    }

    /// One-way transition; keeps the earliest tombstone timestamp.
    pub fn mark_tombstoned(&mut self, at_ms: Option<i64>) {
        if self.tombstoned_at.is_none() {
            self.tombstoned_at = Some(at_ms.unwrap_or_else(now_ms));
        }
    }

    pub fn is_eligible_for_gc(&self, grace_period_ms: i64, now_ms: i64) -> bool {
        match self.tombstoned_at {
            Some(at) => now_ms - at >= grace_period_ms,
            None => false,
        }
    }
}

/// Validate a live operation message against the target replica and extract
/// the pieces every type needs.
pub(crate) fn validate_message<'a>(
    object_id: &str,
    message: &'a ObjectMessage,
) -> Result<(&'a ObjectOperation, &'a str, &'a str)> {
    let operation = message.operation.as_ref().ok_or_else(|| {
        PoolError::MissingOperationPayload("message without operation".to_string())
    })?;
    if operation.object_id != object_id {
        return Err(PoolError::InvalidObjectState(format!(
            "operation for {:?} applied to {:?}",
            operation.object_id, object_id
        )));
    }
    let serial = message
        .serial
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PoolError::InvalidSerial("message without serial".to_string()))?;
    let site_code = message
        .site_code
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PoolError::InvalidSiteCode("message without site code".to_string()))?;
    Ok((operation, serial, site_code))
}

/// Result of reading a map key: a leaf value or another pooled replica.
#[derive(Clone)]
pub enum MapRead {
    Value(ObjectValue),
    Object(Arc<LiveObject>),
}

/// A live replica: one of the two supported replicated types.
pub enum LiveObject {
    Map(LiveMap),
    Counter(LiveCounter),
}

impl LiveObject {
    /// Construct the zero-value replica an id describes. The root id is
    /// always a map and never parsed.
    pub fn zero_value_from_id(object_id: &str) -> Result<Self> {
        if object_id == ROOT_OBJECT_ID {
            return Ok(LiveObject::Map(LiveMap::zero_value(object_id)));
        }
        let parsed = ObjectId::parse(object_id)?;
        Ok(match parsed.object_type {
            ObjectType::Map => LiveObject::Map(LiveMap::zero_value(object_id)),
            ObjectType::Counter => LiveObject::Counter(LiveCounter::zero_value(object_id)),
        })
    }

    /// Construct the zero-value replica matching a snapshot state's declared
    /// shape, falling back to the id when the state carries no payload.
    pub fn zero_value_from_state(state: &ObjectState) -> Result<Self> {
        if state.counter.is_some() {
            Ok(LiveObject::Counter(LiveCounter::zero_value(
                state.object_id.clone(),
            )))
        } else if state.map.is_some() {
            Ok(LiveObject::Map(LiveMap::zero_value(state.object_id.clone())))
        } else {
            Self::zero_value_from_id(&state.object_id)
        }
    }

    pub fn object_id(&self) -> &str {
        match self {
            LiveObject::Map(map) => map.object_id(),
            LiveObject::Counter(counter) => counter.object_id(),
        }
    }

    pub fn as_map(&self) -> Option<&LiveMap> {
        match self {
            LiveObject::Map(map) => Some(map),
            LiveObject::Counter(_) => None,
        }
    }

    pub fn as_counter(&self) -> Option<&LiveCounter> {
        match self {
            LiveObject::Counter(counter) => Some(counter),
            LiveObject::Map(_) => None,
        }
    }

    /// Apply a single live operation message.
    pub fn apply_object(&self, message: &ObjectMessage, pool: &ObjectsPool) -> Result<()> {
        match self {
            LiveObject::Map(map) => map.apply_object(message, pool),
            LiveObject::Counter(counter) => counter.apply_object(message),
        }
    }

    /// Apply a snapshot state; the returned diff is emitted later by the
    /// sync coordinator.
    pub fn apply_object_sync(
        &self,
        state: &ObjectState,
        pool: &ObjectsPool,
    ) -> Option<ObjectUpdate> {
        match self {
            LiveObject::Map(map) => map.apply_object_sync(state, pool),
            LiveObject::Counter(counter) => counter.apply_object_sync(state),
        }
    }

    /// Emit a previously computed diff.
    pub fn notify_update(&self, update: &ObjectUpdate) {
        match self {
            LiveObject::Map(map) => map.notify_update(update),
            LiveObject::Counter(counter) => counter.notify_update(update),
        }
    }

    pub fn tombstone(&self) {
        match self {
            LiveObject::Map(map) => map.tombstone(),
            LiveObject::Counter(counter) => counter.tombstone(),
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        match self {
            LiveObject::Map(map) => map.is_tombstoned(),
            LiveObject::Counter(counter) => counter.is_tombstoned(),
        }
    }

    pub fn tombstoned_at(&self) -> Option<i64> {
        match self {
            LiveObject::Map(map) => map.tombstoned_at(),
            LiveObject::Counter(counter) => counter.tombstoned_at(),
        }
    }

    pub fn is_eligible_for_gc(&self, grace_period_ms: i64, now_ms: i64) -> bool {
        match self {
            LiveObject::Map(map) => map.is_eligible_for_gc(grace_period_ms, now_ms),
            LiveObject::Counter(counter) => counter.is_eligible_for_gc(grace_period_ms, now_ms),
        }
    }

    /// Sweep internal tombstoned sub-entries. Counters have none.
    pub fn on_gc_interval(&self, grace_period_ms: i64, now_ms: i64) {
        if let LiveObject::Map(map) = self {
            map.on_gc_interval(grace_period_ms, now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_value_from_id() {
        let map = LiveObject::zero_value_from_id("map:abc@1").unwrap();
        assert!(map.as_map().is_some());

        let counter = LiveObject::zero_value_from_id("counter:abc@1").unwrap();
        assert!(counter.as_counter().is_some());

        let root = LiveObject::zero_value_from_id(ROOT_OBJECT_ID).unwrap();
        assert!(root.as_map().is_some());

        assert!(LiveObject::zero_value_from_id("bogus").is_err());
    }

    #[test]
    fn test_zero_value_from_state_prefers_payload_shape() {
        use lor_proto::CounterPayload;

        let state = ObjectState {
            object_id: "counter:abc@1".to_string(),
            counter: Some(CounterPayload { count: 1.0 }),
            ..Default::default()
        };
        assert!(LiveObject::zero_value_from_state(&state)
            .unwrap()
            .as_counter()
            .is_some());

        // No payload: the id decides.
        let bare = ObjectState {
            object_id: "map:abc@1".to_string(),
            ..Default::default()
        };
        assert!(LiveObject::zero_value_from_state(&bare)
            .unwrap()
            .as_map()
            .is_some());
    }

    #[test]
    fn test_gc_eligibility_requires_tombstone_and_grace() {
        let object = LiveObject::zero_value_from_id("counter:abc@1").unwrap();
        assert!(!object.is_eligible_for_gc(0, i64::MAX));

        object.tombstone();
        let at = object.tombstoned_at().unwrap();
        assert!(!object.is_eligible_for_gc(1_000, at + 999));
        assert!(object.is_eligible_for_gc(1_000, at + 1_000));
    }
}
