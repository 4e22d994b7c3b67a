use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<V> {
    default_ttl: Duration,
    entries: HashMap<String, Entry<V>>,
}

/// Thread-safe TTL map keyed by string.
///
/// `get` evicts lazily: an expired entry is removed on access and `None` is
/// returned. Handles are cheap clones sharing one store; a single mutex
/// guards the map. Used by remote data adapters to suppress duplicate
/// upstream calls within a short window.
pub struct TtlCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                default_ttl,
                entries: HashMap::new(),
            })),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().expect("ttl cache lock poisoned");
        match inner.entries.get(key) {
            None => None,
            Some(entry) if entry.expires_at < Instant::now() => {
                inner.entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
        }
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let ttl = self.inner.lock().expect("ttl cache lock poisoned").default_ttl;
        self.set_with_ttl(key, value, ttl);
    }

    /// Insert with a per-entry TTL override.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut inner = self.inner.lock().expect("ttl cache lock poisoned");
        inner.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.inner
            .lock()
            .expect("ttl cache lock poisoned")
            .entries
            .remove(key);
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("ttl cache lock poisoned")
            .entries
            .clear();
    }
}
