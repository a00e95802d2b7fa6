//! Policy for [`CacheMiddleware`](super::CacheMiddleware).

use std::time::Duration;

use crate::{Method, StatusCode};

const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_STALE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configurable options for the cache middleware.
///
/// Empty lists and zero durations are replaced by the defaults when the
/// middleware is built, so a partially filled value is always usable.
///
/// | Setting            | Default          |
/// |--------------------|------------------|
/// | `allowed_methods`  | `GET`, `HEAD`    |
/// | `allowed_statuses` | `200`            |
/// | `key_prefix`       | empty            |
/// | `ttl`              | 15 minutes       |
/// | `use_stale`        | `false`          |
/// | `stale_statuses`   | `500`            |
/// | `stale_ttl`        | 24 hours         |
/// | `backend_timeout`  | none             |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use stash::{StatusCode, cache::CacheOptions};
///
/// let options = CacheOptions::new()
///     .ttl(Duration::from_secs(60))
///     .use_stale(true)
///     .stale_statuses([StatusCode::InternalServerError, StatusCode::BadGateway]);
/// assert!(options.is_stale_trigger(StatusCode::BadGateway));
/// ```
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Request methods eligible for caching.
    pub allowed_methods: Vec<Method>,
    /// Response statuses eligible for storage.
    pub allowed_statuses: Vec<StatusCode>,
    /// Namespace prepended to every derived key.
    pub key_prefix: String,
    /// How long a stored response is served as a hit.
    pub ttl: Duration,
    /// Serve a previously cached response when the handler fails.
    pub use_stale: bool,
    /// Handler statuses that trigger the stale fallback.
    pub stale_statuses: Vec<StatusCode>,
    /// Backend TTL of stored entries; outlives `ttl` so a stale copy survives.
    pub stale_ttl: Duration,
    /// Upper bound on each backend call. Elapsed calls count as failures.
    pub backend_timeout: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            allowed_methods: vec![Method::Get, Method::Head],
            allowed_statuses: vec![StatusCode::Ok],
            key_prefix: String::new(),
            ttl: DEFAULT_TTL,
            use_stale: false,
            stale_statuses: vec![StatusCode::InternalServerError],
            stale_ttl: DEFAULT_STALE_TTL,
            backend_timeout: None,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn allowed_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.allowed_methods = methods.into_iter().collect();
        self
    }

    #[must_use]
    pub fn allowed_statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.allowed_statuses = statuses.into_iter().collect();
        self
    }

    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn use_stale(mut self, use_stale: bool) -> Self {
        self.use_stale = use_stale;
        self
    }

    #[must_use]
    pub fn stale_statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.stale_statuses = statuses.into_iter().collect();
        self
    }

    #[must_use]
    pub fn stale_ttl(mut self, stale_ttl: Duration) -> Self {
        self.stale_ttl = stale_ttl;
        self
    }

    #[must_use]
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    /// Fills empty lists and zero durations with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.allowed_methods.is_empty() {
            self.allowed_methods = defaults.allowed_methods;
        }
        if self.allowed_statuses.is_empty() {
            self.allowed_statuses = defaults.allowed_statuses;
        }
        if self.ttl.is_zero() {
            self.ttl = defaults.ttl;
        }
        if self.stale_statuses.is_empty() {
            self.stale_statuses = defaults.stale_statuses;
        }
        if self.stale_ttl.is_zero() {
            self.stale_ttl = defaults.stale_ttl;
        }
        self
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    pub fn allows_status(&self, status: StatusCode) -> bool {
        self.allowed_statuses.contains(&status)
    }

    /// Returns `true` if `status` should fall back to a stale entry.
    ///
    /// Always `false` while `use_stale` is off.
    pub fn is_stale_trigger(&self, status: StatusCode) -> bool {
        self.use_stale && self.stale_statuses.contains(&status)
    }
}
