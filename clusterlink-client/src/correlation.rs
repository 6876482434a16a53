//! Remote eval correlation
//!
//! Outbound remote evals are tracked by their `uid` until the matching
//! REMOTE_EVAL reply arrives. The same opcode also carries requests from
//! other shards, so the tracker is what tells the two apart: a `uid` that is
//! pending here is a reply, anything else is a request for this shard.
//!
//! # Lifecycle
//!
//! 1. **Register**: allocate a `uid` and a oneshot channel
//! 2. **Send**: the facade writes `{id, data, uid}` to the socket
//! 3. **Complete**: the driver sees a reply with that `uid` and resolves
//!    the channel, removing the entry
//! 4. **Fail**: on teardown every entry resolves with `ConnectionClosed`
//!
//! Timeouts are enforced by the caller racing the receiver against
//! `tokio::time::timeout` and cancelling the entry when it elapses.

use clusterlink_core::{Error, Result};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Upper bound of the random counter start, leaving room to count upward
const START_RANGE: u64 = 1 << 40;

/// An outbound remote eval awaiting its reply
pub(crate) struct PendingEval {
    pub(crate) target: u32,
    tx: oneshot::Sender<Result<Value>>,
}

/// Tracker for outbound remote evals
#[derive(Clone)]
pub struct EvalTracker {
    pending: Arc<Mutex<HashMap<u64, PendingEval>>>,
    counter: Arc<AtomicU64>,
}

impl EvalTracker {
    pub fn new() -> Self {
        let start = rand::thread_rng().gen_range(0..START_RANGE);
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            counter: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Register an eval aimed at `target` and return its uid and receiver
    pub async fn register(&self, target: u32) -> (u64, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;

        let mut uid = self.counter.fetch_add(1, Ordering::Relaxed);
        while pending.contains_key(&uid) {
            uid = self.counter.fetch_add(1, Ordering::Relaxed);
        }
        pending.insert(uid, PendingEval { target, tx });

        (uid, rx)
    }

    /// Resolve the eval registered under `uid` with the reply data
    ///
    /// Returns `false` if no such eval is pending.
    pub async fn complete(&self, uid: u64, data: Value) -> bool {
        let Some(entry) = self.pending.lock().await.remove(&uid) else {
            return false;
        };
        tracing::debug!(uid, target = entry.target, "Remote eval reply received");
        // The caller may have stopped waiting; the entry is gone either way.
        let _ = entry.tx.send(Ok(data));
        true
    }

    pub async fn is_pending(&self, uid: u64) -> bool {
        self.pending.lock().await.contains_key(&uid)
    }

    /// Drop the entry for `uid` without resolving it
    pub async fn cancel(&self, uid: u64) {
        self.pending.lock().await.remove(&uid);
    }

    /// Drop the entry for `uid` from synchronous code, such as a `Drop` impl
    pub(crate) fn cancel_detached(&self, uid: u64) {
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.remove(&uid);
            return;
        }

        let tracker = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { tracker.cancel(uid).await });
            }
            Err(_) => tracing::debug!(uid, "No runtime left to cancel remote eval"),
        }
    }

    /// Fail every pending eval with `error`
    pub async fn fail_all(&self, error: Error) {
        let mut pending = self.pending.lock().await;
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), error = %error, "Failing pending remote evals");
        }
        for (_, entry) in pending.drain() {
            let _ = entry.tx.send(Err(error.clone()));
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Default for EvalTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_allocates_distinct_uids() {
        let tracker = EvalTracker::new();

        let (uid1, _rx1) = tracker.register(1).await;
        let (uid2, _rx2) = tracker.register(1).await;

        assert_ne!(uid1, uid2);
        assert_eq!(tracker.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_register_skips_uids_in_use() {
        let tracker = EvalTracker::new();
        let (uid, _rx) = tracker.register(1).await;

        // Rewind the counter onto the live uid
        tracker.counter.store(uid, Ordering::Relaxed);
        let (next, _rx2) = tracker.register(2).await;

        assert_ne!(next, uid);
        assert_eq!(tracker.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_complete_resolves_once() {
        let tracker = EvalTracker::new();
        let (uid, rx) = tracker.register(7).await;

        assert!(tracker.complete(uid, json!(2)).await);
        assert_eq!(rx.await.unwrap().unwrap(), json!(2));

        assert!(!tracker.complete(uid, json!(2)).await);
        assert_eq!(tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_complete_unknown_uid() {
        let tracker = EvalTracker::new();
        assert!(!tracker.complete(42, Value::Null).await);
    }

    #[tokio::test]
    async fn test_cancel() {
        let tracker = EvalTracker::new();
        let (uid, rx) = tracker.register(3).await;

        tracker.cancel(uid).await;
        assert!(!tracker.is_pending(uid).await);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_detached() {
        let tracker = EvalTracker::new();
        let (uid, _rx) = tracker.register(3).await;

        tracker.cancel_detached(uid);
        assert!(!tracker.is_pending(uid).await);
    }

    #[tokio::test]
    async fn test_cancel_detached_while_locked() {
        let tracker = EvalTracker::new();
        let (uid, _rx) = tracker.register(3).await;

        {
            let _held = tracker.pending.lock().await;
            tracker.cancel_detached(uid);
        }

        // The removal was handed to a task; give it a turn
        for _ in 0..10 {
            if !tracker.is_pending(uid).await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!tracker.is_pending(uid).await);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let tracker = EvalTracker::new();
        let (_, rx1) = tracker.register(1).await;
        let (_, rx2) = tracker.register(2).await;

        tracker.fail_all(Error::ConnectionClosed).await;

        assert_eq!(rx1.await.unwrap(), Err(Error::ConnectionClosed));
        assert_eq!(rx2.await.unwrap(), Err(Error::ConnectionClosed));
        assert_eq!(tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let tracker = EvalTracker::new();
        let clone = tracker.clone();

        let (uid, _rx) = tracker.register(5).await;
        assert!(clone.is_pending(uid).await);
    }
}
