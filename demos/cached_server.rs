//! A small cached server. `/flaky` fails on every other handler call; once
//! its entry has expired, failures are answered from the stale copy.
//!
//! ```sh
//! STASH__CACHE__TTL_SECS=5 RUST_LOG=debug cargo run --example cached_server
//! curl -i localhost:8080/time            # miss, then hits
//! curl -i 'localhost:8080/time?cache=false'
//! curl -i localhost:8080/flaky           # wait 5s between calls
//! ```
//!
//! Settings come from `stash.toml` and `STASH__CACHE__*` variables.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use stash::{
    Response, Server, StatusCode,
    cache::{CacheMiddleware, MemoryCacher},
    middleware::{LoggerMiddleware, Pipeline},
    write,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = stash::config::load()?;
    let options = settings.cache.to_options()?.use_stale(true);
    let cacher = Arc::new(MemoryCacher::new(settings.cache.memory_capacity()?));

    let hits = Arc::new(AtomicU64::new(0));
    let pipeline = Pipeline::new()
        .with(LoggerMiddleware::new("cached-server"))
        .with(CacheMiddleware::new(cacher, options))
        .endpoint(move |ctx| {
            let hits = Arc::clone(&hits);
            async move {
                let n = hits.fetch_add(1, Ordering::SeqCst);
                match ctx.request().path() {
                    "/time" => Response::new(StatusCode::Ok).body(format!("{}\n", unix_secs())),
                    "/flaky" if n % 2 == 1 => {
                        write::error(StatusCode::InternalServerError, "upstream unavailable")
                    }
                    "/flaky" => Response::new(StatusCode::Ok).body(format!("fresh #{n}\n")),
                    _ => write::error(StatusCode::NotFound, "no such route"),
                }
            }
        });

    let server = Server::bind("127.0.0.1:8080").await?;
    tracing::info!(address = %server.local_addr(), "press ctrl-c to stop");
    server
        .run_until(pipeline, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
