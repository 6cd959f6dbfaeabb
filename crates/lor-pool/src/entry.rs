//! Per-key storage of a live map.

use crate::serials::can_apply_entry;
use lor_proto::ObjectData;

/// One map entry. Entries are replaced wholesale on every applied write,
/// never mutated in place. Invariant: a tombstoned entry carries no data.
#[derive(Clone, Debug, PartialEq)]
pub struct MapEntry {
    pub tombstoned: bool,
    pub tombstoned_at: Option<i64>,
    pub timeserial: Option<String>,
    pub data: Option<ObjectData>,
}

impl MapEntry {
    /// A live entry holding `data`, written at `timeserial`.
    pub fn live(timeserial: Option<String>, data: ObjectData) -> Self {
        MapEntry {
            tombstoned: false,
            tombstoned_at: None,
            timeserial,
            data: Some(data),
        }
    }

    /// A tombstoned entry written at `timeserial`, removed at `now_ms`.
    pub fn tombstone(timeserial: Option<String>, now_ms: i64) -> Self {
        MapEntry {
            tombstoned: true,
            tombstoned_at: Some(now_ms),
            timeserial,
            data: None,
        }
    }

    /// LWW admissibility of an incoming write against this entry.
    pub fn can_apply(&self, incoming_serial: Option<&str>) -> bool {
        can_apply_entry(incoming_serial, self.timeserial.as_deref())
    }

    /// Whether this tombstoned entry has outlived the grace period.
    pub fn is_eligible_for_gc(&self, grace_period_ms: i64, now_ms: i64) -> bool {
        match (self.tombstoned, self.tombstoned_at) {
            (true, Some(at)) => now_ms - at >= grace_period_ms,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lor_proto::{ObjectData, ObjectValue};

    fn data(n: f64) -> ObjectData {
        ObjectData::from_value(ObjectValue::Number(n))
    }

    #[test]
    fn test_tombstone_clears_data() {
        let entry = MapEntry::tombstone(Some("0002".to_string()), 1000);
        assert!(entry.tombstoned);
        assert!(entry.data.is_none());
        assert_eq!(entry.tombstoned_at, Some(1000));
    }

    #[test]
    fn test_lww_against_existing_serial() {
        let entry = MapEntry::live(Some("0005".to_string()), data(1.0));
        assert!(entry.can_apply(Some("0006")));
        assert!(!entry.can_apply(Some("0005")));
        assert!(!entry.can_apply(Some("0004")));
        assert!(!entry.can_apply(None));
    }

    #[test]
    fn test_gc_eligibility() {
        let entry = MapEntry::tombstone(None, 1_000);
        assert!(!entry.is_eligible_for_gc(500, 1_400));
        assert!(entry.is_eligible_for_gc(500, 1_500));

        let live = MapEntry::live(None, data(0.0));
        assert!(!live.is_eligible_for_gc(0, i64::MAX));
    }
}
