use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

/// Invoked with the peer's acknowledgment arguments.
pub type AckCallback = Box<dyn FnOnce(Vec<Value>) + Send + 'static>;

/// Correlates outbound events that expect a response with the `ack` packets
/// that answer them.
///
/// Ids start at 1 and only grow within a connection lifetime. [`clear`]
/// drops every pending callback without calling it and restarts numbering.
///
/// [`clear`]: AckCorrelator::clear
#[derive(Default)]
pub struct AckCorrelator {
    inner: Mutex<PendingAcks>,
}

#[derive(Default)]
struct PendingAcks {
    last_id: u64,
    callbacks: HashMap<u64, AckCallback>,
}

impl AckCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pending(&self, callback: AckCallback) -> u64 {
        let mut inner = self.inner.lock();
        inner.last_id += 1;
        let id = inner.last_id;
        inner.callbacks.insert(id, callback);
        id
    }

    /// Runs the callback registered under `id`, if any. Returns `false` for
    /// unknown or already-resolved ids, which happens when an ack races a
    /// disconnect.
    pub fn resolve(&self, id: u64, args: Vec<Value>) -> bool {
        // Release the lock before running user code; the callback may emit again.
        let callback = self.inner.lock().callbacks.remove(&id);
        match callback {
            Some(callback) => {
                callback(args);
                true
            }
            None => {
                debug!(ack_id = id, "ignoring stale acknowledgment");
                false
            }
        }
    }

    /// Removes a callback whose event never made it onto the wire.
    pub fn cancel(&self, id: u64) -> Option<AckCallback> {
        self.inner.lock().callbacks.remove(&id)
    }

    /// Takes every pending callback out of the table and restarts numbering.
    /// The callbacks are returned uninvoked so the caller decides where they
    /// are dropped.
    pub fn clear(&self) -> Vec<AckCallback> {
        let mut inner = self.inner.lock();
        inner.last_id = 0;
        std::mem::take(&mut inner.callbacks).into_values().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use serde_json::json;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> AckCallback {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn ids_are_strictly_increasing_from_one() {
        let acks = AckCorrelator::new();
        let ids: Vec<u64> = (0..4).map(|_| acks.register_pending(Box::new(|_| {}))).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(acks.pending_len(), 4);
    }

    #[test]
    fn resolve_invokes_once_with_args() {
        let acks = AckCorrelator::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let id = acks.register_pending(Box::new(move |args| sink.lock().push(args)));

        assert!(acks.resolve(id, vec![json!("ok")]));
        assert!(!acks.resolve(id, vec![json!("again")]));

        assert_eq!(*received.lock(), vec![vec![json!("ok")]]);
        assert_eq!(acks.pending_len(), 0);
    }

    #[test]
    fn unknown_id_is_ignored() {
        let acks = AckCorrelator::new();
        assert!(!acks.resolve(99, Vec::new()));
    }

    #[test]
    fn clear_drops_without_invoking_and_restarts_numbering() {
        let acks = AckCorrelator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let first = acks.register_pending(counting(&calls));
        acks.register_pending(counting(&calls));

        assert_eq!(acks.clear().len(), 2);
        assert!(!acks.resolve(first, Vec::new()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(acks.register_pending(counting(&calls)), 1);
    }

    #[test]
    fn cancel_removes_only_that_callback() {
        let acks = AckCorrelator::new();
        let first = acks.register_pending(Box::new(|_| {}));
        let second = acks.register_pending(Box::new(|_| {}));

        assert!(acks.cancel(second).is_some());
        assert!(acks.cancel(second).is_none());
        assert_eq!(acks.pending_len(), 1);
        assert!(acks.resolve(first, Vec::new()));
    }

    #[test]
    fn callback_may_register_another_ack() {
        let acks = Arc::new(AckCorrelator::new());
        let inner = Arc::clone(&acks);
        let id = acks.register_pending(Box::new(move |_| {
            inner.register_pending(Box::new(|_| {}));
        }));

        assert!(acks.resolve(id, Vec::new()));
        assert_eq!(acks.pending_len(), 1);
    }
}
