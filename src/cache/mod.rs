//! Response caching layer.
//!
//! [`CacheMiddleware`] memoizes downstream responses behind a pluggable
//! [`Cacher`] backend and, when configured, answers with a previously cached
//! ("stale") response when the downstream handler fails.
//!
//! ## Pieces
//!
//! - [`Cacher`]: get/set/delete of serialized bytes by key, with a TTL.
//!   Backends: [`NoopCacher`], [`MemoryCacher`], and the [`PrefixedCacher`]
//!   decorator.
//! - [`CacheKey`]: canonical key derived from the path and the query
//!   parameters that affect the response.
//! - [`CachedResponse`]: the stored unit: headers, body, status, expiration.
//! - [`CaptureWriter`]: a [`ResponseWriter`](crate::http::ResponseWriter)
//!   wrapper that buffers what it forwards, and withholds while a stale
//!   fallback might still replace the response.
//! - [`CacheOptions`]: per-middleware policy.
//!
//! ## Bypassing the cache
//!
//! A request opts out when its context carries the [`NoCache`] marker. The
//! middleware sets it itself for `?cache=false`; outer layers can set it
//! with [`with_no_cache`].

use std::time::Duration;

use thiserror::Error;

use crate::context::Context;

mod cacher;
mod capture;
mod entry;
pub mod key;
mod memory;
mod middleware;
mod options;

pub use cacher::{Cacher, NoopCacher, PrefixedCacher};
pub use capture::CaptureWriter;
pub use entry::{CachedResponse, EntryError, HeaderMerge};
pub use key::CacheKey;
pub use memory::MemoryCacher;
pub use middleware::CacheMiddleware;
pub use options::CacheOptions;

/// Header added to every response that was served from the cache.
pub const CACHED_RESPONSE_HEADER: &str = "x-cached-response";

/// Query parameter that, when set to `false`, bypasses the cache.
pub const NO_CACHE_QUERY_PARAM: &str = "cache";

/// Errors reported by [`Cacher`] backends.
///
/// The middleware treats every variant as a soft failure: a failed lookup is
/// a miss, and a failed write or delete is logged and otherwise ignored.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached value under key `{key}`")]
    NotFound { key: String },

    #[error("cache backend is disabled")]
    Disabled,

    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache {op} timed out after {elapsed:?}")]
    Timeout {
        op: &'static str,
        elapsed: Duration,
    },
}

impl CacheError {
    /// Returns `true` for a plain miss, as opposed to a backend fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Context marker: the cache must be neither read nor written for this request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

/// Marks the request so that cache layers leave it alone.
pub fn with_no_cache(ctx: &mut Context) {
    ctx.extensions_mut().insert(NoCache);
}

/// Reports whether cache layers may serve or store this request.
pub fn use_cache(ctx: &Context) -> bool {
    !ctx.extensions().contains::<NoCache>()
}

/// Sets the [`NoCache`] marker when the query string carries `cache=false`.
pub fn context_from_request(ctx: &mut Context) {
    if ctx.request().query_param(NO_CACHE_QUERY_PARAM) == Some("false") {
        with_no_cache(ctx);
    }
}
