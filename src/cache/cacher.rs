//! The [`Cacher`] contract and its simplest backends.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;

use super::CacheError;

/// A key-value store for serialized cache entries.
///
/// Implementations are shared across every in-flight request and must be
/// safe for concurrent use. Values are opaque bytes; encoding belongs to the
/// caller. Dropping a returned future abandons the operation, so callers can
/// bound each call with a timeout.
#[async_trait]
pub trait Cacher: Send + Sync {
    /// Returns the bytes stored under `key`, or [`CacheError::NotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    /// Stores `value` under `key` for at most `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Removes `keys`. Missing keys are not an error.
    async fn del(&self, keys: &[String]) -> Result<(), CacheError>;
}

#[async_trait]
impl<C> Cacher for Arc<C>
where
    C: Cacher + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        (**self).del(keys).await
    }
}

/// A backend that stores nothing.
///
/// [`NoopCacher::disabled`] (also the `Default`) fails every call with
/// [`CacheError::Disabled`], forcing callers down their pass-through path.
/// [`NoopCacher::silent`] accepts writes and deletes but never finds a key.
#[derive(Debug, Clone, Copy)]
pub struct NoopCacher {
    should_err: bool,
}

impl NoopCacher {
    /// A backend whose every operation fails.
    pub fn disabled() -> Self {
        Self { should_err: true }
    }

    /// A backend that swallows writes and always misses.
    pub fn silent() -> Self {
        Self { should_err: false }
    }
}

impl Default for NoopCacher {
    fn default() -> Self {
        Self::disabled()
    }
}

#[async_trait]
impl Cacher for NoopCacher {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        debug!(operation = "GET", key, "noop operation");
        if self.should_err {
            return Err(CacheError::Disabled);
        }
        Err(CacheError::NotFound {
            key: key.to_owned(),
        })
    }

    async fn set(&self, key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        debug!(operation = "SET", key, "noop operation");
        if self.should_err {
            return Err(CacheError::Disabled);
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        debug!(operation = "DEL", count = keys.len(), "noop operation");
        if self.should_err {
            return Err(CacheError::Disabled);
        }
        Ok(())
    }
}

/// Decorator that namespaces every key with a fixed prefix.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::{sync::Arc, time::Duration};
/// use stash::cache::{Cacher, MemoryCacher, PrefixedCacher};
///
/// let shared = Arc::new(MemoryCacher::default());
/// let tenant = PrefixedCacher::new(Arc::clone(&shared), "tenant-a:");
///
/// tenant.set("/home", b"hi".to_vec(), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(shared.get("tenant-a:/home").await.unwrap(), b"hi");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PrefixedCacher<C> {
    inner: C,
    prefix: String,
}

impl<C> PrefixedCacher<C> {
    pub fn new(inner: C, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl<C> Cacher for PrefixedCacher<C>
where
    C: Cacher,
{
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.inner.get(&self.prefixed(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.inner.set(&self.prefixed(key), value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        let keys: Vec<String> = keys.iter().map(|key| self.prefixed(key)).collect();
        self.inner.del(&keys).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Cacher for Recorder {
        async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
            self.seen.lock().unwrap().push(key.to_owned());
            Ok(Vec::new())
        }

        async fn set(&self, key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            self.seen.lock().unwrap().push(key.to_owned());
            Ok(())
        }

        async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
            self.seen.lock().unwrap().extend(keys.iter().cloned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn disabled_noop_fails_everything() {
        let noop = NoopCacher::default();
        assert!(matches!(noop.get("k").await, Err(CacheError::Disabled)));
        assert!(matches!(
            noop.set("k", vec![1], Duration::from_secs(1)).await,
            Err(CacheError::Disabled)
        ));
        assert!(noop.del(&["k".to_owned()]).await.is_err());
    }

    #[tokio::test]
    async fn silent_noop_accepts_writes_but_misses() {
        let noop = NoopCacher::silent();
        noop.set("k", vec![1], Duration::from_secs(1)).await.unwrap();
        assert!(noop.get("k").await.unwrap_err().is_not_found());
        noop.del(&["k".to_owned()]).await.unwrap();
    }

    #[tokio::test]
    async fn prefix_applies_to_every_operation() {
        let recorder = Arc::new(Recorder::default());
        let cacher = PrefixedCacher::new(Arc::clone(&recorder), "ns:");

        cacher.get("a").await.unwrap();
        cacher.set("b", Vec::new(), Duration::from_secs(1)).await.unwrap();
        cacher.del(&["c".to_owned(), "d".to_owned()]).await.unwrap();

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["ns:a", "ns:b", "ns:c", "ns:d"]);
        assert_eq!(cacher.prefix(), "ns:");
    }
}
