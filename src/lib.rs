//! # respcache
//!
//! Transparent response caching for an async HTTP/1.1 server.
//!
//! Repeated, idempotent requests are answered from a shared, memory-bounded
//! store instead of running the handler again. Keys are built from the path,
//! query string and body; only responses below `400` are stored; every
//! response carries `Cache-Control: max-age=<ttl/3>`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use respcache::{Response, Server, StatusCode};
//! use respcache::cache::{CacheFactory, tracing_reporter};
//! use respcache::config::CacheSettings;
//! use respcache::context::Context;
//! use respcache::middleware::{adapt, max_body_5mib};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = CacheFactory::new(&CacheSettings::default(), Some(tracing_reporter()))?;
//!     let handler = adapt(
//!         |_ctx: Context| async { Response::new(StatusCode::Ok).body("Hello, World!") },
//!         [max_body_5mib(), factory.layer(Duration::from_secs(300))],
//!     );
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.serve(handler).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheError, CacheFactory, CacheMiddleware};
pub use config::CacheSettings;
pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
