//! Subscriber registries and update diffs.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// What happened to one map key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyUpdate {
    Updated,
    Removed,
}

/// Diff delivered to subscribers after an applied mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectUpdate {
    Map { update: HashMap<String, KeyUpdate> },
    Counter { amount: f64 },
}

impl ObjectUpdate {
    /// Whether the diff carries no visible change.
    pub fn is_empty(&self) -> bool {
        match self {
            ObjectUpdate::Map { update } => update.is_empty(),
            ObjectUpdate::Counter { amount } => *amount == 0.0,
        }
    }
}

/// Lifecycle events of a replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The replica was tombstoned. Fired exactly once.
    Deleted,
}

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Registry of update callbacks.
///
/// Callbacks run on the thread that applied the mutation, after the replica's
/// internal lock has been released, so a callback may read the replica.
pub struct Subscribers<T> {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(SubscriptionId, Callback<T>)>>,
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Subscribers {
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.callbacks.write().retain(|(sid, _)| *sid != id);
    }

    pub fn emit(&self, event: &T) {
        for (_, callback) in self.callbacks.read().iter() {
            callback(event);
        }
    }

    pub fn clear(&self) {
        self.callbacks.write().clear();
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_subscribe_and_emit() {
        let subs: Subscribers<ObjectUpdate> = Subscribers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits2 = hits.clone();
        subs.subscribe(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        subs.emit(&ObjectUpdate::Counter { amount: 1.0 });
        subs.emit(&ObjectUpdate::Counter { amount: 2.0 });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let subs: Subscribers<ObjectUpdate> = Subscribers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits2 = hits.clone();
        let id = subs.subscribe(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        subs.unsubscribe(id);

        subs.emit(&ObjectUpdate::Counter { amount: 1.0 });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_update_emptiness() {
        assert!(ObjectUpdate::Counter { amount: 0.0 }.is_empty());
        assert!(!ObjectUpdate::Counter { amount: 0.5 }.is_empty());
        assert!(ObjectUpdate::Map {
            update: HashMap::new()
        }
        .is_empty());
    }
}
