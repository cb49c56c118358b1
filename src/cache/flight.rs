//! Single-Flight Table
//!
//! Per-key in-flight markers. The first caller to miss a key becomes the
//! leader and owns a [`FlightGuard`]; everyone else receives a watch
//! receiver and waits for the leader's shared outcome. Dropping the guard
//! without completing it (panic, cancellation) wakes the waiters with an
//! error so nobody waits forever.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{CacheError, Result};

/// Shared outcome slot; `None` while the computation runs
pub type FlightOutcome<V> = Option<Result<V>>;

/// Receiver side of an in-flight computation
pub type FlightReceiver<V> = watch::Receiver<FlightOutcome<V>>;

type Slots<V> = Mutex<HashMap<String, FlightReceiver<V>>>;

/// Result of trying to claim a key
pub enum Claim<V> {
    /// Caller must compute and complete the guard
    Leader(FlightGuard<V>),
    /// Another caller is computing; wait on the receiver
    Follower(FlightReceiver<V>),
}

impl<V> std::fmt::Debug for Claim<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Claim::Leader(guard) => f.debug_tuple("Leader").field(&guard.key).finish(),
            Claim::Follower(_) => f.write_str("Follower"),
        }
    }
}

/// In-flight computations by key
pub struct FlightTable<V> {
    slots: Arc<Slots<V>>,
}

impl<V: Clone> FlightTable<V> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Become the leader for `key`, or join the running computation
    pub fn claim(&self, key: &str) -> Claim<V> {
        let mut slots = self.slots.lock();
        if let Some(rx) = slots.get(key) {
            return Claim::Follower(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        slots.insert(key.to_string(), rx);
        Claim::Leader(FlightGuard {
            key: key.to_string(),
            tx,
            slots: self.slots.clone(),
            completed: false,
        })
    }

    /// Number of keys currently being computed
    pub fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }
}

impl<V: Clone> Default for FlightTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Leadership of one key's computation
pub struct FlightGuard<V> {
    key: String,
    tx: watch::Sender<FlightOutcome<V>>,
    slots: Arc<Slots<V>>,
    completed: bool,
}

impl<V> FlightGuard<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Subscribe to this computation's outcome
    pub fn subscribe(&self) -> FlightReceiver<V> {
        self.tx.subscribe()
    }

    /// Publish the outcome and release the key
    pub fn complete(mut self, outcome: Result<V>) {
        self.release();
        self.tx.send_replace(Some(outcome));
        self.completed = true;
    }

    /// Remove our marker; a newer leader's marker for the same key is kept
    fn release(&self) {
        let mut slots = self.slots.lock();
        if slots
            .get(&self.key)
            .is_some_and(|rx| rx.same_channel(&self.tx.subscribe()))
        {
            slots.remove(&self.key);
        }
    }
}

impl<V> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.release();
        self.tx.send_replace(Some(Err(CacheError::compute(
            self.key.clone(),
            "computation abandoned before completing",
        ))));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_first_claim_leads_rest_follow() {
        let table: FlightTable<u32> = FlightTable::new();
        let guard = match table.claim("k") {
            Claim::Leader(g) => g,
            Claim::Follower(_) => panic!("first claim must lead"),
        };
        let mut rx = match table.claim("k") {
            Claim::Follower(rx) => rx,
            Claim::Leader(_) => panic!("second claim must follow"),
        };
        assert!(table.is_in_flight("k"));

        guard.complete(Ok(7));
        let outcome = rx.wait_for(Option::is_some).await.unwrap().clone();
        assert_eq!(outcome.unwrap().unwrap(), 7);
        assert_eq!(table.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_release_allows_new_leader() {
        let table: FlightTable<u32> = FlightTable::new();
        if let Claim::Leader(g) = table.claim("k") {
            g.complete(Ok(1));
        }
        assert_matches!(table.claim("k"), Claim::Leader(_));
    }

    #[tokio::test]
    async fn test_dropped_guard_wakes_followers_with_error() {
        let table: FlightTable<u32> = FlightTable::new();
        let guard = match table.claim("k") {
            Claim::Leader(g) => g,
            Claim::Follower(_) => unreachable!(),
        };
        let mut rx = match table.claim("k") {
            Claim::Follower(rx) => rx,
            Claim::Leader(_) => unreachable!(),
        };

        drop(guard);
        let outcome = rx.wait_for(Option::is_some).await.unwrap().clone();
        assert_matches!(outcome, Some(Err(CacheError::Compute { .. })));
        assert!(!table.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let table: FlightTable<u32> = FlightTable::new();
        let guard = match table.claim("k") {
            Claim::Leader(g) => g,
            Claim::Follower(_) => unreachable!(),
        };
        let receivers: Vec<_> = (0..3)
            .map(|_| match table.claim("k") {
                Claim::Follower(rx) => rx,
                Claim::Leader(_) => unreachable!(),
            })
            .collect();

        guard.complete(Err(CacheError::compute("k", "boom")));
        for mut rx in receivers {
            let outcome = rx.wait_for(Option::is_some).await.unwrap().clone();
            assert_matches!(outcome, Some(Err(CacheError::Compute { ref key, .. })) if key == "k");
        }
    }

    #[test]
    fn test_independent_keys() {
        let table: FlightTable<u32> = FlightTable::new();
        assert_matches!(table.claim("a"), Claim::Leader(_));
        // The guard above was dropped immediately, releasing "a"
        assert_eq!(table.in_flight(), 0);

        let _a = table.claim("a");
        let _b = table.claim("b");
        assert_eq!(table.in_flight(), 2);
    }
}
