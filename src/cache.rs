//! Set-with-deadlines used to suppress revisiting recently seen keys.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

use crate::clock;
use crate::queue::Queue;

struct Expiry<K> {
    key: K,
    deadline: Instant,
}

/// A cache whose entries expire in deadline order.
///
/// Every live key sits in the map; keys with a deadline additionally sit in
/// a FIFO kept stably sorted by ascending deadline, so a sweep evicts the
/// earliest deadlines first and breaks ties in insertion order. Entries
/// inserted without a deadline are never evicted. The cache is not
/// internally synchronized; the scrape event loop owns it exclusively.
pub struct EvictableCache<K, V> {
    entries: HashMap<K, V>,
    deadlines: Queue<Expiry<K>>,
    on_eviction: Box<dyn FnMut(K, V) + Send>,
}

impl<K, V> EvictableCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache that invokes `on_eviction` for every expired entry.
    ///
    /// The callback must be short and must not re-enter the cache.
    pub fn new(on_eviction: impl FnMut(K, V) + Send + 'static) -> Self {
        Self {
            entries: HashMap::new(),
            deadlines: Queue::new(),
            on_eviction: Box::new(on_eviction),
        }
    }

    /// Insert `key` unless it is already present.
    ///
    /// Returns false (and changes nothing) for a key that is already live.
    /// A `deadline` of `None` means the entry never expires. Insertion ends
    /// with an eviction sweep either way.
    pub fn add_if_not_seen(&mut self, key: K, value: V, deadline: Option<Instant>) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        if let Some(at) = deadline {
            self.mark(key.clone(), at);
        }
        self.entries.insert(key, value);
        self.sweep();
        true
    }

    /// Whether `key` is live, after purging anything stale.
    pub fn seen(&mut self, key: &K) -> bool {
        self.sweep();
        self.entries.contains_key(key)
    }

    /// Run an eviction sweep.
    pub fn evict(&mut self) {
        self.sweep();
    }

    /// Number of entries currently tracked for eviction.
    pub fn evict_size(&self) -> usize {
        self.deadlines.len()
    }

    fn mark(&mut self, key: K, deadline: Instant) {
        self.deadlines.push(Expiry { key, deadline });
        // Stable sort keeps insertion order among equal deadlines.
        self.deadlines.as_mut_slice().sort_by_key(|e| e.deadline);
    }

    fn sweep(&mut self) {
        loop {
            let expired = match self.deadlines.peek() {
                Some(head) => clock::now() > head.deadline,
                None => return,
            };
            if !expired {
                return;
            }
            let Some(head) = self.deadlines.pop() else {
                return;
            };
            if let Some(value) = self.entries.remove(&head.key) {
                (self.on_eviction)(head.key, value);
            }
        }
    }
}
