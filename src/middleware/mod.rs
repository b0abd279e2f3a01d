//! Middleware pipeline — composable before/after request handler logic.
//!
//! This module defines the core types for building an ordered middleware stack
//! around a handler. Each middleware wraps the next layer, enabling request
//! inspection, short-circuit responses, and response decoration without
//! coupling handlers to infrastructure concerns.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] — converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`adapt`] — wraps an innermost handler with an ordered list of middleware.
//! - [`LoggerMiddleware`] — built-in request/response logger.
//! - [`MaxBodyMiddleware`] — caps how much of the request body may be read.
//!
//! ## Ordering
//!
//! ```text
//! adapt(handler, [a, b, c])
//!
//!   request  ──▶ a ──▶ b ──▶ c ──▶ handler
//!   response ◀── a ◀── b ◀── c ◀──┘
//! ```
//!
//! The first middleware in the list is the outermost wrapper: it sees the
//! request first and the response last.

mod body_limit;

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Response, context::Context};

pub use body_limit::{MaxBodyMiddleware, max_body, max_body_5mib};

/// The boxed future every handler and middleware resolves to.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and shared across
/// tasks without copying the underlying closure. [`adapt`] returns one.
pub type Handler = Arc<dyn Fn(Context) -> ResponseFuture + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the blanket impl
/// below, so [`adapt`] accepts plain async closures.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> ResponseFuture;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> ResponseFuture {
        Box::pin((self)(ctx))
    }
}

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone and lets one middleware
/// instance (and whatever state it owns) sit in several chains at once.
///
/// Construct one with [`from_middleware`] or by wrapping a closure directly:
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use respcache::{context::Context, middleware::{MiddlewareHandler, Next, ResponseFuture}};
///
/// let handler: MiddlewareHandler = Arc::new(|ctx: Context, next: Next| -> ResponseFuture {
///     Box::pin(async move { next.run(ctx).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> ResponseFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use respcache::middleware::{LoggerMiddleware, from_middleware};
///
/// let handler = from_middleware(Arc::new(LoggerMiddleware));
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps `handler` with `adapters` and returns the composed [`Handler`].
///
/// `adapters[0]` wraps `adapters[1]`, which wraps … the innermost `handler`.
/// This is the same as applying the adapters one by one in reverse order.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use respcache::{Response, StatusCode, context::Context};
/// use respcache::middleware::{LoggerMiddleware, adapt, from_middleware, max_body_5mib};
///
/// let handler = adapt(
///     |_ctx: Context| async { Response::new(StatusCode::Ok).body("pong") },
///     [from_middleware(Arc::new(LoggerMiddleware)), max_body_5mib()],
/// );
/// ```
pub fn adapt<H>(handler: H, adapters: impl IntoIterator<Item = MiddlewareHandler>) -> Handler
where
    H: IntoHandler,
{
    let handler = Arc::new(handler);
    let innermost: MiddlewareHandler =
        Arc::new(move |ctx: Context, _next: Next| handler.call(ctx));

    let chain: Arc<[MiddlewareHandler]> = adapters
        .into_iter()
        .chain(std::iter::once(innermost))
        .collect();

    Arc::new(move |ctx: Context| -> ResponseFuture {
        Box::pin(Next::new(Arc::clone(&chain)).run(ctx))
    })
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is passed to each middleware's [`Middleware::handle`] implementation.
/// Calling [`Next::run`] advances the cursor by one position and invokes the next
/// middleware (or returns a fallback `500` response when the chain is exhausted
/// without any middleware generating a response).
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use respcache::{context::Context, middleware::{Middleware, Next, ResponseFuture}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If no handler remains (i.e. the chain is exhausted without producing a
    /// response), a `500 Internal Server Error` response is returned as a safe
    /// fallback.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = Arc::clone(&self.middlewares[self.index]);
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(crate::StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — call `next.run(ctx).await` without modification.
/// - **Short-circuit** — return a [`Response`] directly without calling `next`.
/// - **Decorate** — call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because middleware is shared across
///   Tokio tasks.
/// - `handle` **must** return a pinned, `Send` future so it can be awaited across
///   `.await` points in multi-threaded runtimes.
/// - Implementations **should not** hold `&mut` references to shared state across
///   an `.await` point.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture;
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line after the downstream handler completes.
/// `LoggerMiddleware` never short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            tracing::info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request handled"
            );

            response
        })
    }
}
