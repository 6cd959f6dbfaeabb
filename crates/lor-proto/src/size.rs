//! Deterministic size accounting for preflight limit checks.
//!
//! `size_of` is a pure function with fixed per-field-kind rules: UTF-8 byte
//! length for strings, 8 bytes for any numeric, 1 byte for a boolean, the raw
//! length for binary, the serialized-string length for nested JSON leaves.
//! Only `client_id`, `operation`, `object_state` and `extras` contribute;
//! ids, timestamps, serials, nonces, site codes and type tags do not.

use crate::message::{
    CounterOp, CounterPayload, MapOp, MapPayload, ObjectMessage, ObjectOperation, ObjectState,
    WireMapEntry,
};
use crate::value::{ObjectData, ObjectValue};

const NUMBER_SIZE: usize = 8;
const BOOLEAN_SIZE: usize = 1;

/// Accounted size of a message.
pub fn size_of(message: &ObjectMessage) -> usize {
    let mut size = 0;
    if let Some(client_id) = &message.client_id {
        size += client_id.len();
    }
    if let Some(operation) = &message.operation {
        size += size_of_operation(operation);
    }
    if let Some(state) = &message.object_state {
        size += size_of_state(state);
    }
    if let Some(extras) = &message.extras {
        size += extras.serialized_len();
    }
    size
}

fn size_of_operation(operation: &ObjectOperation) -> usize {
    let mut size = 0;
    if let Some(map_op) = &operation.map_op {
        size += size_of_map_op(map_op);
    }
    if let Some(counter_op) = &operation.counter_op {
        size += size_of_counter_op(counter_op);
    }
    if let Some(map) = &operation.map {
        size += size_of_map_payload(map);
    }
    if let Some(counter) = &operation.counter {
        size += size_of_counter_payload(counter);
    }
    if let Some(initial_value) = &operation.initial_value {
        size += size_of_data(initial_value);
    }
    size
}

fn size_of_state(state: &ObjectState) -> usize {
    let mut size = BOOLEAN_SIZE; // tombstone flag
    if let Some(create_op) = &state.create_op {
        size += size_of_operation(create_op);
    }
    if let Some(map) = &state.map {
        size += size_of_map_payload(map);
    }
    if let Some(counter) = &state.counter {
        size += size_of_counter_payload(counter);
    }
    size
}

fn size_of_map_op(map_op: &MapOp) -> usize {
    let mut size = map_op.key.len();
    if let Some(data) = &map_op.data {
        size += size_of_data(data);
    }
    size
}

fn size_of_counter_op(_counter_op: &CounterOp) -> usize {
    NUMBER_SIZE
}

fn size_of_map_payload(map: &MapPayload) -> usize {
    map.entries
        .iter()
        .map(|(key, entry)| key.len() + size_of_map_entry(entry))
        .sum()
}

fn size_of_map_entry(entry: &WireMapEntry) -> usize {
    let mut size = 0;
    if entry.tombstone.is_some() {
        size += BOOLEAN_SIZE;
    }
    if let Some(data) = &entry.data {
        size += size_of_data(data);
    }
    size
}

fn size_of_counter_payload(_counter: &CounterPayload) -> usize {
    NUMBER_SIZE
}

fn size_of_data(data: &ObjectData) -> usize {
    // References carry only an object id, which is not accounted.
    match &data.value {
        Some(value) => size_of_value(value),
        None => 0,
    }
}

fn size_of_value(value: &ObjectValue) -> usize {
    match value {
        ObjectValue::String(s) => s.len(),
        ObjectValue::Number(_) => NUMBER_SIZE,
        ObjectValue::Boolean(_) => BOOLEAN_SIZE,
        ObjectValue::Binary(bytes) => bytes.len(),
        ObjectValue::JsonObject(map) => serde_json::to_string(map)
            .map(|s| s.len())
            .unwrap_or(0),
        ObjectValue::JsonArray(items) => serde_json::to_string(items)
            .map(|s| s.len())
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ObjectOperation, OperationAction};

    fn set_op(key: &str, value: ObjectValue) -> ObjectMessage {
        let mut op = ObjectOperation::new(OperationAction::MapSet, "map:abc@1");
        op.map_op = Some(MapOp {
            key: key.to_string(),
            data: Some(ObjectData::from_value(value)),
        });
        ObjectMessage::from_operation(op)
    }

    #[test]
    fn test_string_value_counts_utf8_bytes() {
        let msg = set_op("k", ObjectValue::String("héllo".to_string()));
        // key "k" (1) + "héllo" (6 bytes in UTF-8)
        assert_eq!(size_of(&msg), 7);
    }

    #[test]
    fn test_numeric_value_counts_eight() {
        let msg = set_op("n", ObjectValue::Number(1.0));
        assert_eq!(size_of(&msg), 1 + 8);
    }

    #[test]
    fn test_boolean_value_counts_one() {
        let msg = set_op("b", ObjectValue::Boolean(true));
        assert_eq!(size_of(&msg), 1 + 1);
    }

    #[test]
    fn test_binary_value_counts_raw_length() {
        let msg = set_op("data", ObjectValue::Binary(vec![0u8; 16]));
        assert_eq!(size_of(&msg), 4 + 16);
    }

    #[test]
    fn test_reference_counts_nothing() {
        let mut op = ObjectOperation::new(OperationAction::MapSet, "map:abc@1");
        op.map_op = Some(MapOp {
            key: "ref".to_string(),
            data: Some(ObjectData::from_reference("counter:def@2")),
        });
        let msg = ObjectMessage::from_operation(op);
        assert_eq!(size_of(&msg), 3);
    }

    #[test]
    fn test_ids_serials_and_nonces_are_free() {
        let mut msg = set_op("k", ObjectValue::Number(0.0));
        let base = size_of(&msg);

        msg.id = Some("very-long-message-id".to_string());
        msg.serial = Some("01700000000000-000042".to_string());
        msg.site_code = Some("eu1".to_string());
        msg.timestamp = Some(1700000000000);
        msg.operation.as_mut().unwrap().nonce = Some("nonce-value".to_string());

        assert_eq!(size_of(&msg), base);
    }

    #[test]
    fn test_client_id_counts() {
        let mut msg = set_op("k", ObjectValue::Number(0.0));
        let base = size_of(&msg);
        msg.client_id = Some("client-abc".to_string());
        assert_eq!(size_of(&msg), base + 10);
    }

    #[test]
    fn test_counter_inc_counts_eight() {
        let mut op = ObjectOperation::new(OperationAction::CounterInc, "counter:x@1");
        op.counter_op = Some(CounterOp { amount: 123.0 });
        assert_eq!(size_of(&ObjectMessage::from_operation(op)), 8);
    }

    #[test]
    fn test_json_value_counts_serialized_length() {
        let items = vec![serde_json::json!(1), serde_json::json!(2)];
        let expected = serde_json::to_string(&items).unwrap().len();
        let msg = set_op("j", ObjectValue::JsonArray(items));
        assert_eq!(size_of(&msg), 1 + expected);
    }

    #[test]
    fn test_state_size_is_deterministic() {
        let state = ObjectState {
            object_id: "counter:x@1".to_string(),
            counter: Some(CounterPayload { count: 5.0 }),
            ..Default::default()
        };
        let msg = ObjectMessage::from_state(state);
        // tombstone flag (1) + counter payload (8)
        assert_eq!(size_of(&msg), 9);
        assert_eq!(size_of(&msg), size_of(&msg.clone()));
    }
}
