//! # stash
//!
//! Async HTTP/1.1 building blocks with a response cache middleware that can
//! fall back to stale data when the handler fails.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use stash::cache::{CacheMiddleware, CacheOptions, MemoryCacher};
//! use stash::middleware::{LoggerMiddleware, Pipeline};
//! use stash::{Response, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = CacheMiddleware::new(
//!         Arc::new(MemoryCacher::default()),
//!         CacheOptions::new().ttl(Duration::from_secs(60)).use_stale(true),
//!     );
//!
//!     let pipeline = Pipeline::new()
//!         .with(LoggerMiddleware::new("quick-start"))
//!         .with(cache)
//!         .endpoint(|_ctx| async { Response::new(StatusCode::Ok).body("Hello, World!") });
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     println!("Listening on http://127.0.0.1:8080");
//!     server.run(pipeline).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;
pub mod write;

pub use cache::{CacheMiddleware, CacheOptions, Cacher};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::Pipeline;
pub use server::{Server, ServerError};
