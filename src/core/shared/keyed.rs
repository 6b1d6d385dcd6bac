//! Per-key async mutex slots.
//!
//! Each key owns one `tokio::sync::Mutex<V>`. Holding a slot guard serializes
//! work for that key only; other keys proceed concurrently.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyedSlots<K, V> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<V>>>>,
}

impl<K, V> KeyedSlots<K, V>
where
    K: Eq + Hash + Clone,
    V: Default,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for exclusive access to the slot of `key`, creating it on first use.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<V> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(V::default())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Drops slots nobody is holding or waiting on and whose value satisfies `idle`.
    pub fn prune(&self, idle: impl Fn(&V) -> bool) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(value) => !idle(&*value),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for KeyedSlots<K, V>
where
    K: Eq + Hash + Clone,
    V: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for KeyedSlots<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.slots.lock().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("KeyedSlots").field("slots", &count).finish()
    }
}
