//! The response cache middleware.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use tracing::{debug, error, warn};

use super::{
    CacheError, CacheKey, CacheOptions, CachedResponse, Cacher, CaptureWriter, HeaderMerge,
    context_from_request, use_cache,
};
use crate::{
    Response, StatusCode,
    context::Context,
    http::{Headers, ResponseBuffer, ResponseWriter},
    middleware::{Middleware, Next},
    write,
};

/// Caches downstream responses in a [`Cacher`] and serves them back.
///
/// Per request:
///
/// 1. Requests marked [`NoCache`](super::NoCache) (including `?cache=false`)
///    and requests whose method is not allowed pass straight through; the
///    backend is not touched.
/// 2. The key is looked up. A fresh entry is written out with the
///    `x-cached-response: true` header and the handler is skipped. An entry
///    that cannot be decoded yields a `500`.
/// 3. Otherwise the handler runs behind a [`CaptureWriter`]. An allowed
///    status is stored (backend TTL: `stale_ttl`). Any other status purges
///    the key; with stale fallback enabled and a trigger status, the entry
///    found in step 2, expired or not, is sent instead of the handler's
///    output and is not re-stored. None of the failed response's headers
///    are kept.
///
/// Backend failures never fail the request. Concurrent misses on the same
/// key all reach the handler; the last store wins.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stash::cache::{CacheMiddleware, CacheOptions, MemoryCacher};
/// use stash::middleware::Pipeline;
/// use stash::{Response, StatusCode};
///
/// let cache = CacheMiddleware::new(
///     Arc::new(MemoryCacher::default()),
///     CacheOptions::new().use_stale(true),
/// );
/// let pipeline = Pipeline::new()
///     .with(cache)
///     .endpoint(|_ctx| async { Response::new(StatusCode::Ok).body("ok") });
/// ```
#[derive(Clone)]
pub struct CacheMiddleware {
    cacher: Arc<dyn Cacher>,
    options: Arc<CacheOptions>,
}

impl CacheMiddleware {
    pub fn new(cacher: Arc<dyn Cacher>, options: CacheOptions) -> Self {
        Self {
            cacher,
            options: Arc::new(options.normalized()),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let cacher = Arc::clone(&self.cacher);
        let options = Arc::clone(&self.options);

        Box::pin(async move { respond(cacher.as_ref(), &options, ctx, next).await })
    }
}

async fn respond(
    cacher: &dyn Cacher,
    options: &CacheOptions,
    mut ctx: Context,
    next: Next,
) -> Response {
    context_from_request(&mut ctx);
    if !use_cache(&ctx) || !options.allows_method(ctx.request().method()) {
        debug!(
            cache = "response",
            outcome = "bypass",
            method = %ctx.request().method(),
            path = ctx.request().path(),
            "cache not consulted"
        );
        return next.run(ctx).await;
    }

    let key = CacheKey::from_request(&options.key_prefix, ctx.request());

    let candidate = match bounded(options.backend_timeout, "get", cacher.get(key.as_str())).await
    {
        Ok(data) => match CachedResponse::from_bytes(&data) {
            Ok(entry) => Some(entry),
            Err(err) => {
                error!(cache = "response", %key, error = %err, "failed to decode cached response");
                return write::error(StatusCode::InternalServerError, &err.to_string());
            }
        },
        Err(err) => {
            soft_failure("get", &key, &err);
            None
        }
    };

    let mut sink = ResponseBuffer::new();

    if let Some(entry) = candidate.as_ref().filter(|entry| entry.is_fresh()) {
        if let Err(err) = entry.write_to(&mut sink, HeaderMerge::KeepExisting) {
            error!(cache = "response", %key, error = %err, "failed to write cached response");
            return write::error(StatusCode::InternalServerError, &err.to_string());
        }
        debug!(cache = "response", outcome = "hit", %key, "serving cached response");
        return sink.into_response();
    }

    debug!(
        cache = "response",
        outcome = "miss",
        %key,
        stale_candidate = candidate.is_some(),
        "cache miss, executing handler"
    );

    let response = next.run(ctx).await;

    let mut capture = CaptureWriter::new(&mut sink, options.use_stale, &options.stale_statuses);
    if let Err(err) = response.write_to(&mut capture) {
        warn!(cache = "response", %key, error = %err, "failed to capture handler response");
    }
    let status = capture.status().unwrap_or(StatusCode::Ok);

    if options.allows_status(status) {
        // a status can be both storable and a stale trigger; send what was held back
        if let Err(err) = capture.release() {
            warn!(cache = "response", %key, error = %err, "failed to release captured response");
        }
        let body = capture.read_all();
        let entry = CachedResponse::new(capture.headers().clone(), body.to_vec(), status, options.ttl);
        store(cacher, options, &key, &entry).await;
        return sink.into_response();
    }

    match candidate.filter(|_| options.is_stale_trigger(status)) {
        Some(entry) => {
            drop(capture);
            // headers of the failed response must not leak onto the stale copy
            *sink.headers_mut() = Headers::new();
            if let Err(err) = entry.write_to(&mut sink, HeaderMerge::Replace) {
                error!(cache = "response", %key, error = %err, "failed to write stale response");
                return write::error(StatusCode::InternalServerError, &err.to_string());
            }
            warn!(
                cache = "response",
                outcome = "stale",
                %key,
                status = status.as_u16(),
                "handler failed, serving stale response"
            );
        }
        None => {
            if let Err(err) = capture.release() {
                warn!(cache = "response", %key, error = %err, "failed to release captured response");
            }
        }
    }

    purge(cacher, options, &key).await;
    sink.into_response()
}

async fn store(cacher: &dyn Cacher, options: &CacheOptions, key: &CacheKey, entry: &CachedResponse) {
    let data = match entry.to_bytes() {
        Ok(data) => data,
        Err(err) => {
            warn!(cache = "response", %key, error = %err, "failed to encode response for cache");
            return;
        }
    };

    let call = cacher.set(key.as_str(), data, options.stale_ttl);
    match bounded(options.backend_timeout, "set", call).await {
        Ok(()) => debug!(cache = "response", outcome = "store", %key, "response cached"),
        Err(err) => soft_failure("set", key, &err),
    }
}

async fn purge(cacher: &dyn Cacher, options: &CacheOptions, key: &CacheKey) {
    let keys = [key.as_str().to_owned()];
    match bounded(options.backend_timeout, "del", cacher.del(&keys)).await {
        Ok(()) => debug!(cache = "response", outcome = "purge", %key, "cached response purged"),
        Err(err) => soft_failure("del", key, &err),
    }
}

/// Awaits a backend call, giving up after `limit`.
async fn bounded<T, F>(limit: Option<Duration>, op: &'static str, call: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| CacheError::Timeout { op, elapsed: limit })?,
        None => call.await,
    }
}

fn soft_failure(op: &'static str, key: &CacheKey, err: &CacheError) {
    match err {
        CacheError::NotFound { .. } | CacheError::Disabled => {
            debug!(cache = "response", op, %key, error = %err, "cache backend skipped");
        }
        _ => warn!(cache = "response", op, %key, error = %err, "cache backend call failed"),
    }
}
