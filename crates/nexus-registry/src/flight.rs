//! Single-flight lazy cache.
//!
//! [`SingleFlight`] maps keys to values produced by an async initializer.
//! At most one initializer runs per key at a time: the first caller starts
//! it and every caller that arrives while it is in flight awaits the same
//! shared future. A success is cached; a failure is handed to every waiter
//! and then forgotten.
//!
//! Each attempt is driven by its own tokio task, so it settles the cache
//! even when every caller stops waiting.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::error::RegistryResult;

type Attempt<V> = Shared<BoxFuture<'static, RegistryResult<V>>>;
type Slots<K, V> = Mutex<HashMap<K, Slot<V>>>;

enum Slot<V> {
    Ready(V),
    Pending { attempt: u64, future: Attempt<V> },
}

// The map is only mutated by whole-slot inserts and removes, so a
// poisoned lock still guards a consistent map.
fn lock<K, V>(slots: &Slots<K, V>) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Replace the pending slot for `attempt` with its outcome. A no-op when the
/// slot was already settled or belongs to a newer attempt.
fn settle<K, V>(slots: &Slots<K, V>, key: K, attempt: u64, result: &RegistryResult<V>)
where
    K: Eq + Hash,
    V: Clone,
{
    let mut slots = lock(slots);
    let owns_slot = matches!(
        slots.get(&key),
        Some(Slot::Pending { attempt: current, .. }) if *current == attempt
    );
    if !owns_slot {
        return;
    }
    match result {
        Ok(value) => {
            slots.insert(key, Slot::Ready(value.clone()));
        }
        Err(_) => {
            slots.remove(&key);
        }
    }
}

/// A keyed cache whose entries are initialized at most once concurrently.
pub struct SingleFlight<K, V> {
    slots: Arc<Slots<K, V>>,
    next_attempt: AtomicU64,
    started: AtomicU64,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_attempt: AtomicU64::new(0),
            started: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        lock(&*self.slots)
    }

    /// The cached value for `key`, if initialization has succeeded.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.slots().get(key) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Whether an initialization for `key` is currently in flight.
    pub fn is_pending(&self, key: &K) -> bool {
        matches!(self.slots().get(key), Some(Slot::Pending { .. }))
    }

    /// Keys with a cached value.
    pub fn ready_keys(&self) -> Vec<K> {
        self.slots()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// How many initializers have been started over the cache's lifetime.
    pub fn attempts_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Return the cached value, join the in-flight attempt, or start one.
    ///
    /// `init` is only called when no value is cached and nothing is in
    /// flight. The attempt runs on a spawned task, so dropping the returned
    /// future only abandons this caller's wait: the attempt still completes
    /// and its outcome is cached or discarded as usual. Must be called from
    /// within a tokio runtime.
    pub async fn get_or_try_init<F, Fut>(&self, key: K, init: F) -> RegistryResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RegistryResult<V>> + Send + 'static,
    {
        let (attempt, future) = {
            let mut slots = self.slots();
            match slots.get(&key) {
                Some(Slot::Ready(value)) => return Ok(value.clone()),
                Some(Slot::Pending { attempt, future }) => (*attempt, future.clone()),
                None => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
                    self.started.fetch_add(1, Ordering::SeqCst);
                    let future = init().boxed().shared();
                    slots.insert(
                        key.clone(),
                        Slot::Pending {
                            attempt,
                            future: future.clone(),
                        },
                    );

                    let driver = future.clone();
                    let owner = Arc::clone(&self.slots);
                    let owner_key = key.clone();
                    tokio::spawn(async move {
                        let result = driver.await;
                        settle(&*owner, owner_key, attempt, &result);
                    });
                    (attempt, future)
                }
            }
        };

        let result = future.await;
        // Settle here too so the cache reflects the outcome by the time any
        // waiter returns.
        settle(&*self.slots, key, attempt, &result);
        result
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
