use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a stale entry may still serve as last-known-good.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Entries kept per window before the oldest one is evicted.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Short time-bounded cache so repeated polls inside one interval do not
/// re-hit upstream.
///
/// Entries younger than `ttl` are fresh. Older ones keep serving as
/// last-known-good values for degraded results until `retention` runs out.
/// Writes drop entries past retention and evict the oldest entry once
/// `capacity` is reached.
pub struct CacheWindow<V> {
    ttl: Duration,
    retention: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> CacheWindow<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_limits(ttl, DEFAULT_RETENTION.max(ttl), DEFAULT_CAPACITY)
    }

    pub fn with_limits(ttl: Duration, retention: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            retention: retention.max(ttl),
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Value stored less than one TTL ago.
    pub fn fresh(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, v)| v.clone())
    }

    /// Any stored value still inside the retention period.
    pub fn last_known(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|(stored, _)| stored.elapsed() < self.retention)
            .map(|(_, v)| v.clone())
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let retention = self.retention;
        entries.retain(|_, (stored, _)| stored.elapsed() < retention);

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (stored, _))| *stored)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (Instant::now(), value));
    }

    /// Drop every entry past the retention period.
    pub fn clear_expired(&self) {
        let retention = self.retention;
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, (stored, _)| stored.elapsed() < retention);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
