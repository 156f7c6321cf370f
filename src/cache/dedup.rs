//! In-flight request deduplication.
//!
//! Concurrent callers asking for the same key share one underlying load: the
//! first caller (the leader) registers the key and runs the factory, every
//! later caller (a follower) subscribes and receives a clone of the settled
//! outcome. The registration is removed the moment the call settles, so
//! callers arriving after settlement start a fresh attempt.

use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::trace;

type Payload = Vec<u8>;
type Outcome = Result<Payload>;

struct InFlight {
    tx: broadcast::Sender<Outcome>,
    subscribers: u64,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

/// Read-only view of the deduplicator's counters.
#[derive(Debug, Clone)]
pub struct DedupSnapshot {
    /// Keys currently in flight.
    pub in_flight: usize,
    /// Loads actually started (leaders).
    pub started: u64,
    /// Calls that joined an existing in-flight load instead of starting one.
    pub joined: u64,
}

impl DedupSnapshot {
    /// Share of calls that were absorbed by an existing in-flight load.
    pub fn dedup_rate(&self) -> f64 {
        let total = self.started + self.joined;
        if total == 0 {
            0.0
        } else {
            self.joined as f64 / total as f64
        }
    }
}

/// Tracks in-flight loads by key and collapses duplicates.
pub struct RequestDeduplicator {
    in_flight: InFlightMap,
    started: AtomicU64,
    joined: AtomicU64,
}

enum Role {
    Leader,
    Follower(broadcast::Receiver<Outcome>),
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::default(),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Run `factory` for `key`, unless a load for `key` is already in
    /// flight, in which case the existing outcome is awaited and shared.
    ///
    /// The registration happens synchronously before the factory's first
    /// await point, so callers arriving in the same scheduler turn are
    /// guaranteed to observe it. Cleanup runs on settlement and, via a drop
    /// guard, when the leader future is dropped mid-flight; followers of a
    /// dropped leader observe [`Error::Cancelled`].
    pub async fn run<F, Fut>(&self, key: &str, factory: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Outcome>,
    {
        let role = {
            let mut map = self.in_flight.lock().unwrap();
            match map.get_mut(key) {
                Some(entry) => {
                    entry.subscribers += 1;
                    self.joined.fetch_add(1, Ordering::Relaxed);
                    trace!(key, subscribers = entry.subscribers, "joined in-flight request");
                    Role::Follower(entry.tx.subscribe())
                }
                None => {
                    // Capacity 1: exactly one message is ever broadcast per
                    // registration, so receivers cannot lag.
                    let (tx, _rx) = broadcast::channel(1);
                    map.insert(key.to_string(), InFlight { tx, subscribers: 0 });
                    self.started.fetch_add(1, Ordering::Relaxed);
                    Role::Leader
                }
            }
        };

        match role {
            Role::Follower(mut rx) => match rx.recv().await {
                Ok(outcome) => outcome,
                // Leader future dropped before settling.
                Err(_) => Err(Error::Cancelled),
            },
            Role::Leader => {
                let guard = SettleGuard::new(key, Arc::clone(&self.in_flight));
                let outcome = factory().await;
                guard.settle(outcome.clone());
                outcome
            }
        }
    }

    pub fn snapshot(&self) -> DedupSnapshot {
        DedupSnapshot {
            in_flight: self.in_flight.lock().unwrap().len(),
            started: self.started.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
        }
    }
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight registration exactly once: on settlement, or on
/// drop if the leader never settled.
struct SettleGuard {
    key: String,
    map: InFlightMap,
    armed: bool,
}

impl SettleGuard {
    fn new(key: &str, map: InFlightMap) -> Self {
        Self {
            key: key.to_string(),
            map,
            armed: true,
        }
    }

    fn settle(mut self, outcome: Outcome) {
        self.armed = false;
        // Remove and broadcast under one lock hold: a caller arriving after
        // this point finds no registration and starts a fresh attempt.
        let entry = self.map.lock().unwrap().remove(&self.key);
        if let Some(entry) = entry {
            let _ = entry.tx.send(outcome);
        }
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if self.armed {
            // Leader dropped mid-flight; clearing the slot drops the sender,
            // which wakes followers with a closed-channel error.
            self.map.lock().unwrap().remove(&self.key);
        }
    }
}
