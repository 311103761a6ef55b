use indexmap::IndexMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use super::pattern::KeyPattern;

struct LocalEntry {
    value: String,
    expires_at: Instant,
}

/// Bounded in-process fallback store.
///
/// Entries keep insertion order; when the store is full, expired entries are
/// purged first and then the oldest `eviction_batch` entries are dropped.
pub struct LocalStore {
    entries: Mutex<IndexMap<String, LocalEntry>>,
    max_entries: usize,
    eviction_batch: usize,
}

impl LocalStore {
    pub fn new(max_entries: usize, eviction_batch: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            max_entries: max_entries.max(1),
            eviction_batch: eviction_batch.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.shift_remove(key);
        }
        None
    }

    /// Zero `ttl` is never stored
    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();

        // Rewrites move the key to the back of the eviction order
        entries.shift_remove(key);

        if entries.len() >= self.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);
        }
        if entries.len() >= self.max_entries {
            let count = self.eviction_batch.min(entries.len());
            entries.drain(..count);
            debug!("Local cache full, evicted {} oldest entries", count);
        }

        entries.insert(
            key.to_string(),
            LocalEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
    }

    /// Remove every key matching `pattern`
    pub fn remove_matching(&self, pattern: &KeyPattern) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
