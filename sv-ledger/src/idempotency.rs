//! At-most-once ingest gate.
//!
//! A bounded set of `(source_system, source_event_id)` keys. The gate is a
//! hot cache, not durable storage: entries evicted past the cap are
//! assumed new, and durable deduplication remains the store's transfer-id
//! uniqueness.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

/// Default cap on remembered event keys.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// LRU-bounded duplicate-event detector.
#[derive(Debug)]
pub struct IdempotencyGate {
    seen: Mutex<LruCache<(String, String), ()>>,
}

impl IdempotencyGate {
    /// Create a gate with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a gate remembering at most `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record `(source, event_id)` and report whether it was new.
    ///
    /// Returns `false` exactly when the key is already present within the
    /// cap window. Insert-under-lock, so two concurrent calls with the
    /// same key admit exactly one.
    pub fn verify_unique(&self, source: &str, event_id: &str) -> bool {
        let key = (source.to_string(), event_id.to_string());
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.put(key, ()).is_none()
    }

    /// Number of keys currently remembered.
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no keys are remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdempotencyGate {
    fn default() -> Self {
        Self::new()
    }
}
