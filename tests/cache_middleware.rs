//! End-to-end behavior of the response cache through the public pipeline API.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use stash::{
    Headers, Method, Request, Response, StatusCode,
    cache::{
        CACHED_RESPONSE_HEADER, CacheError, CacheKey, CacheMiddleware, CacheOptions,
        CachedResponse, Cacher, with_no_cache,
    },
    context::Context,
    middleware::{Middleware, Next, Pipeline},
};

/// An in-memory backend that records every call made against it.
#[derive(Default)]
struct FakeCacher {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    gets: AtomicUsize,
    sets: AtomicUsize,
    dels: Mutex<Vec<String>>,
}

impl FakeCacher {
    fn seed(&self, key: &str, entry: &CachedResponse) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), entry.to_bytes().unwrap());
    }

    fn seed_raw(&self, key: &str, data: &[u8]) {
        self.entries.lock().unwrap().insert(key.to_owned(), data.to_vec());
    }

    fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn stored(&self, key: &str) -> Option<CachedResponse> {
        self.raw(key)
            .map(|data| CachedResponse::from_bytes(&data).unwrap())
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn dels(&self) -> Vec<String> {
        self.dels.lock().unwrap().clone()
    }
}

#[async_trait]
impl Cacher for FakeCacher {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.raw(key).ok_or_else(|| CacheError::NotFound {
            key: key.to_owned(),
        })
    }

    async fn set(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().insert(key.to_owned(), value);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        let mut dels = self.dels.lock().unwrap();
        for key in keys {
            entries.remove(key);
            dels.push(key.clone());
        }
        Ok(())
    }
}

/// A backend whose every call fails.
struct BrokenCacher;

#[async_trait]
impl Cacher for BrokenCacher {
    async fn get(&self, _key: &str) -> Result<Vec<u8>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn del(&self, _keys: &[String]) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

/// Marks every request it sees as not cacheable.
struct SkipCache;

impl Middleware for SkipCache {
    fn handle(&self, mut ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            with_no_cache(&mut ctx);
            next.run(ctx).await
        })
    }
}

/// A handler that counts invocations and answers with a fixed status and body.
#[derive(Clone)]
struct Origin {
    calls: Arc<AtomicUsize>,
    status: StatusCode,
    body: &'static str,
}

impl Origin {
    fn new(status: StatusCode, body: &'static str) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            status,
            body,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn attach(&self, pipeline: Pipeline) -> Pipeline {
        let origin = self.clone();
        pipeline.endpoint(move |_ctx| {
            let origin = origin.clone();
            async move {
                origin.calls.fetch_add(1, Ordering::SeqCst);
                Response::new(origin.status)
                    .header("Content-Type", "text/plain")
                    .header("X-Origin", "live")
                    .body(origin.body)
            }
        })
    }
}

fn cached(cacher: Arc<dyn Cacher>, options: CacheOptions, origin: &Origin) -> Pipeline {
    origin.attach(Pipeline::new().with(CacheMiddleware::new(cacher, options)))
}

fn get(target: &str) -> Request {
    Request::new(Method::Get, target)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn entry(status: StatusCode, body: &str, expiration: i64) -> CachedResponse {
    let mut header = Headers::new();
    header.insert("Content-Type", "text/plain");
    header.insert("X-Origin", "cached");
    CachedResponse {
        header,
        body: body.as_bytes().to_vec(),
        status_code: status.as_u16(),
        expiration,
    }
}

#[tokio::test]
async fn disallowed_methods_behave_as_if_uncached() {
    let cacher = Arc::new(FakeCacher::default());
    let origin = Origin::new(StatusCode::Created, "made");
    let with_cache = cached(cacher.clone(), CacheOptions::new(), &origin);
    let without_cache = origin.attach(Pipeline::new());

    for method in [Method::Post, Method::Put, Method::Delete, Method::Patch] {
        let request = Request::new(method, "/items?x=1").with_header("Host", "example.com");
        let a = with_cache.handle(request.clone()).await;
        let b = without_cache.handle(request).await;
        assert_eq!(a.into_bytes(), b.into_bytes());
    }

    assert_eq!(cacher.gets(), 0);
    assert_eq!(cacher.sets(), 0);
    assert!(cacher.dels().is_empty());
}

#[tokio::test]
async fn no_cache_marker_skips_backend() {
    let cacher = Arc::new(FakeCacher::default());
    let origin = Origin::new(StatusCode::Ok, "ok");
    let pipeline = origin.attach(
        Pipeline::new()
            .with(SkipCache)
            .with(CacheMiddleware::new(cacher.clone(), CacheOptions::new())),
    );

    pipeline.handle(get("/x")).await;
    pipeline.handle(get("/x")).await;

    assert_eq!(origin.calls(), 2);
    assert_eq!(cacher.gets(), 0);
    assert_eq!(cacher.sets(), 0);
}

#[tokio::test]
async fn cache_false_bypasses_a_fresh_entry() {
    let cacher = Arc::new(FakeCacher::default());
    cacher.seed("/a/b", &entry(StatusCode::Ok, "cached", unix_now() + 600));
    let origin = Origin::new(StatusCode::Ok, "live");
    let pipeline = cached(cacher.clone(), CacheOptions::new(), &origin);

    let response = pipeline.handle(get("/a/b?cache=false")).await;

    assert_eq!(response.payload(), b"live");
    assert!(!response.headers().contains(CACHED_RESPONSE_HEADER));
    assert_eq!(origin.calls(), 1);
    assert_eq!(cacher.gets(), 0);
    assert_eq!(cacher.sets(), 0);
}

#[tokio::test]
async fn second_request_is_a_hit() {
    let cacher = Arc::new(FakeCacher::default());
    let origin = Origin::new(StatusCode::Ok, "ok");
    let pipeline = cached(cacher.clone(), CacheOptions::new(), &origin);

    let first = pipeline.handle(get("/x")).await;
    assert_eq!(first.status(), StatusCode::Ok);
    assert_eq!(first.payload(), b"ok");
    assert!(!first.headers().contains(CACHED_RESPONSE_HEADER));
    assert_eq!(cacher.sets(), 1);

    let second = pipeline.handle(get("/x")).await;
    assert_eq!(second.status(), StatusCode::Ok);
    assert_eq!(second.payload(), b"ok");
    assert_eq!(second.headers().get(CACHED_RESPONSE_HEADER), Some("true"));

    assert_eq!(origin.calls(), 1);
    assert_eq!(cacher.sets(), 1);
}

#[tokio::test]
async fn hit_reproduces_status_headers_and_body() {
    let cacher = Arc::new(FakeCacher::default());
    let origin = Origin::new(StatusCode::Ok, "payload");
    let options = CacheOptions::new().allowed_statuses([StatusCode::Ok]);
    let pipeline = cached(cacher.clone(), options, &origin);

    let live = pipeline.handle(get("/doc?v=2")).await;
    let replay = pipeline.handle(get("/doc?v=2")).await;

    assert_eq!(replay.status(), live.status());
    assert_eq!(replay.payload(), live.payload());
    for (name, value) in live.headers().iter() {
        assert_eq!(replay.headers().get(name), Some(value), "header {name}");
    }

    let stored = cacher.stored("/doc?v=2").unwrap();
    assert_eq!(stored.status_code, 200);
    assert_eq!(stored.body, b"payload");
    assert!(stored.is_fresh());
}

#[tokio::test]
async fn ignored_params_share_an_entry() {
    let cacher = Arc::new(FakeCacher::default());
    let origin = Origin::new(StatusCode::Ok, "ok");
    let pipeline = cached(cacher.clone(), CacheOptions::new(), &origin);

    pipeline.handle(get("/list?page=1&apiKey=alice")).await;
    let response = pipeline.handle(get("/list?apiKey=bob&page=1")).await;

    assert_eq!(origin.calls(), 1);
    assert_eq!(response.headers().get(CACHED_RESPONSE_HEADER), Some("true"));
    assert_eq!(
        CacheKey::from_request("", &get("/list?page=1&apiKey=alice")),
        CacheKey::from_request("", &get("/list?apiKey=bob&page=1")),
    );
}

#[tokio::test]
async fn retained_params_get_their_own_entries() {
    let cacher = Arc::new(FakeCacher::default());
    let origin = Origin::new(StatusCode::Ok, "ok");
    let pipeline = cached(cacher.clone(), CacheOptions::new(), &origin);

    pipeline.handle(get("/list?page=1")).await;
    pipeline.handle(get("/list?page=2")).await;
    pipeline.handle(get("/list?page=1")).await;

    assert_eq!(origin.calls(), 2);
    assert!(cacher.raw("/list?page=1").is_some());
    assert!(cacher.raw("/list?page=2").is_some());
}

#[tokio::test]
async fn expired_entry_is_not_served() {
    let cacher = Arc::new(FakeCacher::default());
    cacher.seed("/x", &entry(StatusCode::Ok, "old", unix_now() - 1));
    let origin = Origin::new(StatusCode::Ok, "new");
    let pipeline = cached(cacher.clone(), CacheOptions::new(), &origin);

    let response = pipeline.handle(get("/x")).await;

    assert_eq!(response.payload(), b"new");
    assert!(!response.headers().contains(CACHED_RESPONSE_HEADER));
    assert_eq!(origin.calls(), 1);
    assert_eq!(cacher.stored("/x").unwrap().body, b"new");
}

#[tokio::test]
async fn disallowed_status_purges_the_key() {
    let cacher = Arc::new(FakeCacher::default());
    cacher.seed("/gone", &entry(StatusCode::Ok, "old", unix_now() - 1));
    let origin = Origin::new(StatusCode::NotFound, "missing");
    let pipeline = cached(cacher.clone(), CacheOptions::new(), &origin);

    let response = pipeline.handle(get("/gone")).await;

    assert_eq!(response.status(), StatusCode::NotFound);
    assert_eq!(response.payload(), b"missing");
    assert_eq!(cacher.sets(), 0);
    assert_eq!(cacher.dels(), vec!["/gone".to_owned()]);
    assert!(cacher.raw("/gone").is_none());
}

#[tokio::test]
async fn trigger_status_without_stale_fallback_is_returned_and_purged() {
    let cacher = Arc::new(FakeCacher::default());
    cacher.seed("/x", &entry(StatusCode::Ok, "old", unix_now() - 1));
    let origin = Origin::new(StatusCode::InternalServerError, "boom");
    let pipeline = cached(cacher.clone(), CacheOptions::new(), &origin);

    let response = pipeline.handle(get("/x")).await;

    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert_eq!(response.payload(), b"boom");
    assert_eq!(cacher.dels(), vec!["/x".to_owned()]);
}

#[tokio::test]
async fn stale_entry_replaces_a_failed_response() {
    let cacher = Arc::new(FakeCacher::default());
    let seeded = entry(StatusCode::Ok, "last good", unix_now() - 60);
    cacher.seed("/report", &seeded);
    let origin = Origin::new(StatusCode::InternalServerError, "boom");
    let options = CacheOptions::new()
        .use_stale(true)
        .stale_statuses([StatusCode::InternalServerError]);
    let pipeline = cached(cacher.clone(), options, &origin);

    let response = pipeline.handle(get("/report")).await;

    assert_eq!(origin.calls(), 1);
    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(response.payload(), b"last good");
    assert_eq!(response.headers().get("x-origin"), Some("cached"));
    assert_eq!(response.headers().get(CACHED_RESPONSE_HEADER), Some("true"));
    assert_eq!(cacher.sets(), 0);
    assert_eq!(cacher.dels(), vec!["/report".to_owned()]);
    assert!(cacher.raw("/report").is_none());

    // the stale copy was purged, so the next failure has nothing to fall back to
    let again = pipeline.handle(get("/report")).await;
    assert_eq!(origin.calls(), 2);
    assert_eq!(again.status(), StatusCode::InternalServerError);
    assert_eq!(again.payload(), b"boom");
    assert!(!again.headers().contains(CACHED_RESPONSE_HEADER));
    assert_eq!(cacher.sets(), 0);
}

#[tokio::test]
async fn stale_fallback_without_candidate_returns_handler_output() {
    let cacher = Arc::new(FakeCacher::default());
    let origin = Origin::new(StatusCode::InternalServerError, "boom");
    let options = CacheOptions::new().use_stale(true);
    let pipeline = cached(cacher.clone(), options, &origin);

    let response = pipeline.handle(get("/report")).await;

    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert_eq!(response.payload(), b"boom");
    assert_eq!(response.headers().get("x-origin"), Some("live"));
    assert_eq!(cacher.sets(), 0);
}

#[tokio::test]
async fn corrupted_entry_yields_500() {
    let cacher = Arc::new(FakeCacher::default());
    cacher.seed_raw("/x", b"\x00\x01 definitely not an entry");
    let origin = Origin::new(StatusCode::Ok, "ok");
    let pipeline = cached(cacher.clone(), CacheOptions::new(), &origin);

    let response = pipeline.handle(get("/x")).await;

    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert_eq!(origin.calls(), 0);
    assert_eq!(cacher.sets(), 0);
}

#[tokio::test]
async fn broken_backend_degrades_to_pass_through() {
    let origin = Origin::new(StatusCode::Ok, "ok");
    let options = CacheOptions::new().use_stale(true);
    let pipeline = cached(Arc::new(BrokenCacher), options, &origin);

    for _ in 0..2 {
        let response = pipeline.handle(get("/x")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.payload(), b"ok");
    }
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn head_shares_the_get_entry() {
    let cacher = Arc::new(FakeCacher::default());
    let origin = Origin::new(StatusCode::Ok, "ok");
    let pipeline = cached(cacher.clone(), CacheOptions::new(), &origin);

    pipeline.handle(get("/x")).await;
    let response = pipeline.handle(Request::new(Method::Head, "/x")).await;

    assert_eq!(origin.calls(), 1);
    assert_eq!(response.headers().get(CACHED_RESPONSE_HEADER), Some("true"));
}
