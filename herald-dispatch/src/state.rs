//! Keyed state behind the circuit breaker and rate limiter
//!
//! Both components express every mutation as a read-modify-write closure run
//! through [`KeyedStore::update`]. The store guarantees the closure runs
//! atomically with respect to other updates of the same key, which is the only
//! atomicity either algorithm needs. [`MemoryKeyedStore`] provides that within
//! one process; a shared cache with compare-and-set can provide it across
//! processes behind the same trait.

use std::{fmt::Debug, sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use herald_common::Clock;

/// Key shared by breaker and limiter state for one channel instance
#[must_use]
pub fn channel_key(tenant_id: &str, instance_id: &str) -> String {
    format!("{tenant_id}:{instance_id}")
}

pub trait KeyedStore<V>: Send + Sync + Debug {
    fn get(&self, key: &str) -> Option<V>;

    fn set(&self, key: &str, value: V, ttl: Option<Duration>);

    /// Replace the value under `key` with `f(current)` and return the new value
    ///
    /// `f` must not call back into the store. A `ttl` is applied to the
    /// written value; `None` keeps it forever.
    fn update(&self, key: &str, ttl: Option<Duration>, f: &mut dyn FnMut(Option<V>) -> V) -> V;

    fn remove(&self, key: &str) -> Option<V>;

    /// Drop expired entries, returning how many were removed
    ///
    /// Stores that expire entries on their own have nothing to do here.
    fn purge_expired(&self) -> usize {
        0
    }
}

/// Counter operations over any `u64` store
pub trait CounterExt: KeyedStore<u64> {
    /// Add one and return the post-increment count
    fn increment(&self, key: &str, ttl: Option<Duration>) -> u64 {
        self.update(key, ttl, &mut |count| count.unwrap_or(0).saturating_add(1))
    }
}

impl<T: KeyedStore<u64> + ?Sized> CounterExt for T {}

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    /// Milliseconds since the epoch after which the slot is treated as absent
    expires_at: Option<i64>,
}

impl<V> Slot<V> {
    fn live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// In-process keyed store
///
/// Updates hold the `DashMap` shard lock for their key, so they are serialised
/// per key without blocking unrelated keys on other shards. Expired slots read
/// as absent and are physically removed by [`KeyedStore::purge_expired`].
#[derive(Debug)]
pub struct MemoryKeyedStore<V> {
    slots: DashMap<String, Slot<V>>,
    clock: Arc<dyn Clock>,
}

impl<V> MemoryKeyedStore<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| {
            let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            self.clock.now_ms().saturating_add(ttl)
        })
    }

    /// Number of slots held, including expired ones not yet purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<V> KeyedStore<V> for MemoryKeyedStore<V>
where
    V: Clone + Send + Sync + Debug,
{
    fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        self.slots
            .get(key)
            .filter(|slot| slot.live(now))
            .map(|slot| slot.value.clone())
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let expires_at = self.expiry(ttl);
        self.slots
            .insert(key.to_string(), Slot { value, expires_at });
    }

    fn update(&self, key: &str, ttl: Option<Duration>, f: &mut dyn FnMut(Option<V>) -> V) -> V {
        let now = self.clock.now_ms();
        let expires_at = self.expiry(ttl);

        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied
                    .get()
                    .live(now)
                    .then(|| occupied.get().value.clone());
                let value = f(current);
                occupied.insert(Slot {
                    value: value.clone(),
                    expires_at,
                });
                value
            }
            Entry::Vacant(vacant) => {
                let value = f(None);
                vacant.insert(Slot {
                    value: value.clone(),
                    expires_at,
                });
                value
            }
        }
    }

    fn remove(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        self.slots
            .remove(key)
            .filter(|(_, slot)| slot.live(now))
            .map(|(_, slot)| slot.value)
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.live(now));
        before.saturating_sub(self.slots.len())
    }
}
