//! The live-operation application path, used outside of sync and for
//! replaying buffered operations after a sync completes.

use lor_pool::ObjectsPool;
use lor_proto::ObjectMessage;
use tracing::warn;

/// Apply one live operation message to the pool.
///
/// The target replica is materialized lazily: receiving an operation for a
/// never-before-seen object (its create op may simply not have arrived yet)
/// is not an error, every type bootstraps from a zero value. Per-message
/// failures are logged and swallowed so one bad message never stops the
/// serialized worker.
pub fn apply_operation_message(message: &ObjectMessage, pool: &ObjectsPool) {
    let Some(operation) = &message.operation else {
        warn!("dropping object message without operation");
        return;
    };

    match pool.create_zero_value_if_absent(&operation.object_id) {
        Ok(object) => {
            if let Err(e) = object.apply_object(message, pool) {
                warn!(
                    object_id = %operation.object_id,
                    error = %e,
                    "dropping inapplicable operation"
                );
            }
        }
        Err(e) => {
            warn!(
                object_id = %operation.object_id,
                error = %e,
                "dropping operation for unconstructible object"
            );
        }
    }
}
