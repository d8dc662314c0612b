//! Request coalescing
//!
//! Concurrent requests for the same key share one unit of work. The first
//! caller spawns the work as its own task, so dropping any caller's future,
//! the first one included, never cancels it for the others. If the work
//! task dies before producing a value, every waiter sees `None`.
//!
//! Each flight carries an urgency. A caller that joins with a greater
//! urgency raises it, and the running work observes the raise through a
//! watch channel.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    pub total_requests: u64,
    /// Requests that joined work already in flight
    pub coalesced_requests: u64,
    pub in_flight: usize,
}

struct Flight<V, U> {
    result: broadcast::Sender<V>,
    urgency: watch::Sender<U>,
}

pub struct RequestCoalescer<K, V, U = ()> {
    in_flight: Mutex<HashMap<K, Flight<V, U>>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
}

impl<K, V, U> RequestCoalescer<K, V, U>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
    U: Ord + Clone + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Flight<V, U>>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `work` for `key`, or wait for the run already in flight
    pub async fn run<F, Fut>(self: &Arc<Self>, key: K, work: F) -> Option<V>
    where
        U: Default,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.run_ranked(key, U::default(), move |_| work()).await
    }

    /// Like [`run`](Self::run), raising the flight's urgency to at least
    /// `urgency`. The leader's `work` receives the live urgency.
    pub async fn run_ranked<F, Fut>(self: &Arc<Self>, key: K, urgency: U, work: F) -> Option<V>
    where
        F: FnOnce(watch::Receiver<U>) -> Fut + Send + 'static,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let (mut rx, leader) = {
            let mut in_flight = self.lock();
            match in_flight.get(&key) {
                Some(flight) => {
                    let coalesced = self.coalesced_requests.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(key = ?key, coalesced, "Joining in-flight request");
                    flight.urgency.send_if_modified(|current| {
                        if urgency > *current {
                            debug!(key = ?key, from = ?current, to = ?urgency, "Raising flight urgency");
                            *current = urgency;
                            true
                        } else {
                            false
                        }
                    });
                    (flight.result.subscribe(), None)
                }
                None => {
                    let (result, rx) = broadcast::channel(1);
                    let (urgency, urgency_rx) = watch::channel(urgency);
                    in_flight.insert(key.clone(), Flight { result, urgency });
                    (rx, Some(urgency_rx))
                }
            }
        };

        if let Some(urgency) = leader {
            let guard = FlightGuard {
                coalescer: Arc::clone(self),
                key: Some(key),
            };
            tokio::spawn(async move {
                let value = work(urgency).await;
                guard.complete(value);
            });
        }

        rx.recv().await.ok()
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            in_flight: self.lock().len(),
        }
    }
}

impl<K, V, U> Default for RequestCoalescer<K, V, U>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
    U: Ord + Clone + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Owns a key's in-flight slot for the lifetime of its work task.
///
/// Dropping the guard without completing (the task panicked or was aborted)
/// closes the channel, so waiters wake with `None` instead of hanging.
struct FlightGuard<K, V, U>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
    U: Ord + Clone + Debug + Send + Sync + 'static,
{
    coalescer: Arc<RequestCoalescer<K, V, U>>,
    key: Option<K>,
}

impl<K, V, U> FlightGuard<K, V, U>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
    U: Ord + Clone + Debug + Send + Sync + 'static,
{
    fn complete(mut self, value: V) {
        let Some(key) = self.key.take() else {
            return;
        };
        let flight = self.coalescer.lock().remove(&key);
        if let Some(flight) = flight {
            let waiters = flight.result.receiver_count();
            let _ = flight.result.send(value);
            debug!(key = ?key, waiters, "Broadcast result to waiters");
        }
    }
}

impl<K, V, U> Drop for FlightGuard<K, V, U>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
    U: Ord + Clone + Debug + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            debug!(key = ?key, "In-flight request abandoned");
            self.coalescer.lock().remove(&key);
        }
    }
}
