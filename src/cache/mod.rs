//! Response caching — key derivation, a cost-bounded store, and the middleware
//! that ties them together.
//!
//! ## Flow
//!
//! ```text
//! request ─▶ read body ─▶ build_key ─▶ store.get ──hit──────────────┐
//!                                        │                          ▼
//!                                       miss ─▶ capture(next) ─▶ replay ─▶ response
//!                                                  │ status < 400
//!                                                  ▼
//!                                           store.set_with_ttl
//! ```
//!
//! - [`build_key`] / [`CacheKey`] — request identity (path, query, body).
//! - [`CacheStore`] / [`MokaStore`] — the concurrent, cost-bounded store.
//! - [`capture`] — runs the rest of the chain once and records its response.
//! - [`CacheMiddleware`] / [`CacheFactory`] — the middleware and its shared-store factory.
//!
//! Concurrent misses for the same key are not collapsed: each one runs the
//! downstream handler and the last insert wins.

pub mod capture;
pub mod key;
pub mod layer;
pub mod store;

use std::{io, sync::Arc};

use bytes::Bytes;
use thiserror::Error;

use crate::http::{BodyError, Headers, Response, StatusCode};

pub use capture::capture;
pub use key::{CacheKey, build_key};
pub use layer::{CacheFactory, CacheMiddleware, client_max_age};
pub use store::{CacheStore, MokaStore};

/// Fixed accounting overhead charged for every stored entry.
pub const ENTRY_OVERHEAD: u64 = 40;

/// Errors raised by the response cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read request body: {0}")]
    BodyRead(#[from] BodyError),

    #[error("failed to write response: {0}")]
    ResponseWrite(#[source] io::Error),

    #[error("invalid cache capacity: {reason}")]
    InvalidCapacity { reason: String },
}

/// Receives per-request cache errors. Must not block.
pub type ErrorCallback = Arc<dyn Fn(CacheError) + Send + Sync>;

/// An [`ErrorCallback`] that logs every error at `warn` level.
pub fn tracing_reporter() -> ErrorCallback {
    Arc::new(|err: CacheError| {
        tracing::warn!(error = %err, "response cache error");
    })
}

/// Eviction cost of an entry with a body of `body_len` bytes.
///
/// An estimate used only for the store's budget, not an exact byte count.
pub fn entry_cost(body_len: usize) -> u64 {
    ENTRY_OVERHEAD.saturating_add((body_len as u64).saturating_mul(4))
}

/// A recorded response: status, headers and body.
///
/// Never mutated once stored; shared between replaying requests behind an [`Arc`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Eviction cost of this entry, see [`entry_cost`].
    pub fn cost(&self) -> u64 {
        entry_cost(self.body.len())
    }

    /// Builds a fresh [`Response`] carrying a copy of every header (all
    /// values, in order), the status and the body.
    pub fn to_response(&self) -> Response {
        Response::from_parts(self.status, self.headers.clone(), self.body.to_vec())
    }
}

impl From<Response> for CachedResponse {
    fn from(response: Response) -> Self {
        let (status, headers, body) = response.into_parts();
        Self::new(status, headers, body)
    }
}

// Rebuilds an owned io::Error so a borrowed one can be reported by value.
pub(crate) fn clone_io_error(err: &io::Error) -> io::Error {
    io::Error::new(err.kind(), err.to_string())
}
