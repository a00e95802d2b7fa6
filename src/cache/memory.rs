//! In-process cache backend.

use std::{
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{CacheError, Cacher};

const DEFAULT_CAPACITY: usize = 1024;

struct Stored {
    data: Vec<u8>,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Stored {
    fn is_live_at(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// A bounded, process-local [`Cacher`].
///
/// Entries are evicted least-recently-used once `capacity` is reached, and
/// dropped lazily when read after their TTL. Safe to share across tasks.
pub struct MemoryCacher {
    entries: Mutex<LruCache<String, Stored>>,
}

impl MemoryCacher {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Like [`new`](Self::new), clamping a zero capacity to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, LruCache<String, Stored>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    lock_kind = "mutex.lock",
                    result = "poisoned_recovered",
                    "Recovered from poisoned cache lock"
                );
                poisoned.into_inner()
            }
        }
    }
}

impl Default for MemoryCacher {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Cacher for MemoryCacher {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let mut entries = self.lock("get");
        let now = Instant::now();

        match entries.get(key) {
            Some(stored) if stored.is_live_at(now) => Ok(stored.data.clone()),
            Some(_) => {
                entries.pop(key);
                debug!(key, "expired entry evicted on read");
                Err(CacheError::NotFound {
                    key: key.to_owned(),
                })
            }
            None => Err(CacheError::NotFound {
                key: key.to_owned(),
            }),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let stored = Stored {
            data: value,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.lock("set").put(key.to_owned(), stored);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut entries = self.lock("del");
        for key in keys {
            entries.pop(key.as_str());
        }
        Ok(())
    }
}
