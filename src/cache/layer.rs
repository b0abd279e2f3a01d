//! The response cache middleware and its factory.

use std::{sync::Arc, time::Duration};

use tracing::debug;

use super::{
    CacheError, CacheKey, CacheStore, CachedResponse, ErrorCallback, MokaStore, capture,
    clone_io_error,
};
use crate::config::CacheSettings;
use crate::context::Context;
use crate::http::{Response, StatusCode, WriteErrorHook};
use crate::middleware::{Middleware, MiddlewareHandler, Next, ResponseFuture, from_middleware};

/// Client-side lifetime used when the server-side TTL is zero.
const FALLBACK_CLIENT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The `max-age` (in seconds) sent to clients for a server-side `ttl`.
///
/// Clients are told to keep a response for a third of the server-side TTL so
/// the server refreshes its copy before they stop trusting theirs. A zero
/// TTL falls back to 24 hours, i.e. `28800`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use respcache::cache::client_max_age;
///
/// assert_eq!(client_max_age(Duration::ZERO), 28_800);
/// assert_eq!(client_max_age(Duration::from_secs(300)), 100);
/// ```
pub fn client_max_age(ttl: Duration) -> u64 {
    let ttl = if ttl.is_zero() {
        FALLBACK_CLIENT_TTL
    } else {
        ttl
    };
    ttl.as_secs() / 3
}

/// Middleware that answers repeated requests from a shared [`CacheStore`].
///
/// Per request:
///
/// 1. Read the body. If that fails, respond `500` and report
///    [`CacheError::BodyRead`]; nothing is cached.
/// 2. Build the [`CacheKey`] from path, query and body.
/// 3. On a hit, replay the stored response.
/// 4. On a miss, run the rest of the chain once via [`capture`]. Responses with
///    a status below `400` are stored with this middleware's TTL; others are
///    only used for the current request.
/// 5. Replay: every header (all values, in order), then
///    `Cache-Control: max-age=<ttl/3>` replacing any handler value, then status and body.
///
/// Write failures while sending the replayed response are reported as
/// [`CacheError::ResponseWrite`] and not retried.
///
/// Two concurrent misses for one key both run the handler and both insert;
/// the later insert wins.
///
/// The request method is not part of the key; put this middleware on
/// idempotent read routes only.
#[derive(Clone)]
pub struct CacheMiddleware {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    on_error: Option<ErrorCallback>,
}

impl CacheMiddleware {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            on_error: None,
        }
    }

    /// Sets the callback that receives per-request errors.
    #[must_use]
    pub fn on_error(mut self, on_error: ErrorCallback) -> Self {
        self.on_error = Some(on_error);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Converts this middleware into a chain entry for [`adapt`](crate::middleware::adapt).
    pub fn into_handler(self) -> MiddlewareHandler {
        from_middleware(Arc::new(self))
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, mut ctx: Context, next: Next) -> ResponseFuture {
        let store = Arc::clone(&self.store);
        let ttl = self.ttl;
        let on_error = self.on_error.clone();

        Box::pin(async move {
            let body = match capture::extract_body(&mut ctx) {
                Ok(body) => body,
                Err(err) => {
                    report(on_error.as_ref(), CacheError::BodyRead(err));
                    return Response::new(StatusCode::InternalServerError)
                        .body(StatusCode::InternalServerError.canonical_reason());
                }
            };

            let key = CacheKey::for_request(ctx.request(), &body);

            let cached = match store.get(&key) {
                Some(hit) => {
                    debug!(key = %key, outcome = "hit", "serving cached response");
                    hit
                }
                None => {
                    let captured = Arc::new(capture(ctx, next).await);
                    let status = captured.status();
                    if status.is_cacheable() {
                        let accepted = store.set_with_ttl(
                            key.clone(),
                            Arc::clone(&captured),
                            captured.cost(),
                            ttl,
                        );
                        debug!(key = %key, outcome = "miss", accepted, "stored response");
                    } else {
                        debug!(
                            key = %key,
                            outcome = "uncacheable",
                            status = status.as_u16(),
                            "response not stored"
                        );
                    }
                    captured
                }
            };

            replay(&cached, ttl, on_error)
        })
    }
}

// Copies a stored response onto a fresh one and sets the client lifetime.
fn replay(cached: &CachedResponse, ttl: Duration, on_error: Option<ErrorCallback>) -> Response {
    let mut response = cached.to_response();
    response.set_header(
        "Cache-Control",
        format!("max-age={}", client_max_age(ttl)),
    );

    if let Some(on_error) = on_error {
        response.on_write_error(WriteErrorHook::new(move |err| {
            on_error(CacheError::ResponseWrite(clone_io_error(err)));
        }));
    }

    response
}

fn report(on_error: Option<&ErrorCallback>, err: CacheError) {
    match on_error {
        Some(on_error) => on_error(err),
        None => debug!(error = %err, "response cache error dropped"),
    }
}

/// Builds [`CacheMiddleware`] instances that share one store.
///
/// Every route wrapped with a layer from the same factory draws on the same
/// entries and memory budget; only the TTL is chosen per route.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use respcache::{Response, StatusCode, context::Context};
/// use respcache::cache::{CacheFactory, tracing_reporter};
/// use respcache::config::CacheSettings;
/// use respcache::middleware::{adapt, max_body_5mib};
///
/// let factory = CacheFactory::new(&CacheSettings::default(), Some(tracing_reporter())).unwrap();
/// let handler = adapt(
///     |_ctx: Context| async { Response::new(StatusCode::Ok).body("[]") },
///     [factory.layer(Duration::from_secs(300)), max_body_5mib()],
/// );
/// ```
#[derive(Clone)]
pub struct CacheFactory {
    store: Arc<dyn CacheStore>,
    on_error: Option<ErrorCallback>,
}

impl CacheFactory {
    /// Creates a factory backed by a [`MokaStore`] sized from `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidCapacity`] when the memory budget is zero.
    pub fn new(
        settings: &CacheSettings,
        on_error: Option<ErrorCallback>,
    ) -> Result<Self, CacheError> {
        let store = MokaStore::new(settings.max_cost())?;
        Ok(Self::with_store(Arc::new(store), on_error))
    }

    /// Creates a factory around an existing store.
    pub fn with_store(store: Arc<dyn CacheStore>, on_error: Option<ErrorCallback>) -> Self {
        Self { store, on_error }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Returns a middleware with the given TTL on the shared store.
    pub fn middleware(&self, ttl: Duration) -> CacheMiddleware {
        let middleware = CacheMiddleware::new(Arc::clone(&self.store), ttl);
        match &self.on_error {
            Some(on_error) => middleware.on_error(Arc::clone(on_error)),
            None => middleware,
        }
    }

    /// Returns a chain entry with the given TTL on the shared store.
    pub fn layer(&self, ttl: Duration) -> MiddlewareHandler {
        self.middleware(ttl).into_handler()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::middleware::{Handler, adapt, max_body};
    use crate::{Request, StatusCode};

    type ErrorLog = Arc<Mutex<Vec<CacheError>>>;

    fn get(path: &str) -> Context {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req)
    }

    fn post(path: &str, body: Vec<u8>) -> Context {
        let mut ctx = get(path);
        ctx.request_mut().set_body(body);
        ctx
    }

    fn factory() -> CacheFactory {
        CacheFactory::new(&CacheSettings::default(), None).unwrap()
    }

    fn recording_factory() -> (CacheFactory, ErrorLog) {
        let errors: ErrorLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let on_error: ErrorCallback =
            Arc::new(move |err: CacheError| sink.lock().unwrap().push(err));
        let factory = CacheFactory::new(&CacheSettings::default(), Some(on_error)).unwrap();
        (factory, errors)
    }

    // A handler that counts its calls and answers with `status`.
    fn counting(status: StatusCode, calls: Arc<AtomicUsize>) -> impl Fn(Context) -> ResponseFuture + Send + Sync + 'static {
        move |ctx: Context| -> ResponseFuture {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                let body = ctx.request().body().read().unwrap_or_default();
                Response::new(status)
                    .header("X-Call", n.to_string())
                    .body_bytes(body.to_vec())
            })
        }
    }

    fn cached_route(factory: &CacheFactory, ttl: Duration, status: StatusCode) -> (Handler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = adapt(counting(status, Arc::clone(&calls)), [factory.layer(ttl)]);
        (handler, calls)
    }

    #[tokio::test]
    async fn identical_requests_are_served_from_cache() {
        let (handler, calls) = cached_route(&factory(), Duration::from_secs(300), StatusCode::Ok);

        const REQUESTS: usize = 100;
        for _ in 0..REQUESTS {
            let res = handler(get("/someRoute/1")).await;
            assert_eq!(res.status(), StatusCode::Ok);
        }

        assert!(calls.load(Ordering::SeqCst) < REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_paths_never_share_entries() {
        let (handler, calls) = cached_route(&factory(), Duration::from_secs(300), StatusCode::Ok);

        for i in 0..100 {
            handler(get(&format!("/item/{i}"))).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn hit_replays_the_first_response() {
        let (handler, _calls) = cached_route(&factory(), Duration::from_secs(60), StatusCode::Ok);

        let first = handler(get("/a")).await;
        let second = handler(get("/a")).await;
        assert_eq!(first.headers().get("x-call"), Some("1"));
        assert_eq!(second.headers().get("x-call"), Some("1"));
    }

    #[tokio::test]
    async fn error_responses_are_never_cached() {
        for status in [StatusCode::BadRequest, StatusCode::NotFound, StatusCode::InternalServerError] {
            let (handler, calls) = cached_route(&factory(), Duration::from_secs(300), status);
            for _ in 0..5 {
                let res = handler(get("/broken")).await;
                assert_eq!(res.status(), status);
                assert!(res.headers().contains("cache-control"));
            }
            assert_eq!(calls.load(Ordering::SeqCst), 5);
        }
    }

    #[tokio::test]
    async fn redirects_are_cached() {
        let (handler, calls) =
            cached_route(&factory(), Duration::from_secs(300), StatusCode::Found);
        handler(get("/old")).await;
        handler(get("/old")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multi_valued_headers_survive_a_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler = adapt(
            move |_ctx: Context| {
                seen.fetch_add(1, Ordering::SeqCst);
                async {
                    Response::new(StatusCode::Ok)
                        .header("Set-Cookie", "session=abc")
                        .header("X-Between", "1")
                        .header("Set-Cookie", "theme=dark")
                }
            },
            [factory().layer(Duration::from_secs(60))],
        );

        handler(get("/profile")).await;
        let hit = handler(get("/profile")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let cookies: Vec<_> = hit.headers().get_all("set-cookie").collect();
        assert_eq!(cookies, vec!["session=abc", "theme=dark"]);
    }

    #[tokio::test]
    async fn cache_control_is_a_third_of_the_ttl() {
        let (handler, _) = cached_route(&factory(), Duration::from_secs(300), StatusCode::Ok);
        let miss = handler(get("/x")).await;
        let hit = handler(get("/x")).await;
        assert_eq!(miss.headers().get("cache-control"), Some("max-age=100"));
        assert_eq!(hit.headers().get("cache-control"), Some("max-age=100"));
    }

    #[tokio::test]
    async fn zero_ttl_uses_the_day_fallback() {
        let (handler, _) = cached_route(&factory(), Duration::ZERO, StatusCode::Ok);
        let res = handler(get("/x")).await;
        assert_eq!(res.headers().get("cache-control"), Some("max-age=28800"));
    }

    #[tokio::test]
    async fn handler_cache_control_is_replaced() {
        let handler = adapt(
            |_ctx: Context| async {
                Response::new(StatusCode::Ok).header("Cache-Control", "no-store")
            },
            [factory().layer(Duration::from_secs(30))],
        );
        let res = handler(get("/x")).await;
        let values: Vec<_> = res.headers().get_all("cache-control").collect();
        assert_eq!(values, vec!["max-age=10"]);
    }

    #[tokio::test]
    async fn empty_body_is_cacheable() {
        let (handler, calls) = cached_route(&factory(), Duration::from_secs(60), StatusCode::Ok);
        handler(get("/empty")).await;
        handler(post("/empty", Vec::new())).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn body_is_part_of_the_key_and_reaches_the_handler() {
        let (handler, calls) = cached_route(&factory(), Duration::from_secs(60), StatusCode::Ok);

        let a = handler(post("/search", b"{\"q\":\"a\"}".to_vec())).await;
        let b = handler(post("/search", b"{\"q\":\"b\"}".to_vec())).await;
        let a_again = handler(post("/search", b"{\"q\":\"a\"}".to_vec())).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.body_ref(), b"{\"q\":\"a\"}");
        assert_eq!(b.body_ref(), b"{\"q\":\"b\"}");
        assert_eq!(a_again.body_ref(), b"{\"q\":\"a\"}");
    }

    #[tokio::test]
    async fn query_order_makes_distinct_entries() {
        let (handler, calls) = cached_route(&factory(), Duration::from_secs(60), StatusCode::Ok);
        handler(get("/list?a=1&b=2")).await;
        handler(get("/list?b=2&a=1")).await;
        handler(get("/list?a=1&b=2")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn oversized_body_fails_before_the_handler() {
        let (factory, errors) = recording_factory();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = adapt(
            counting(StatusCode::Ok, Arc::clone(&calls)),
            [max_body(1), factory.layer(Duration::from_secs(60))],
        );

        let res = handler(post("/upload", vec![b'1'; 2 * 1024 * 1024])).await;

        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert!(!res.headers().contains("cache-control"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], CacheError::BodyRead(_)));
    }

    #[tokio::test]
    async fn limit_inside_the_cache_does_not_block_its_read() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = adapt(
            counting(StatusCode::Ok, Arc::clone(&calls)),
            [factory().layer(Duration::from_secs(60)), max_body(1)],
        );

        let res = handler(post("/upload", vec![b'1'; 2 * 1024 * 1024])).await;

        // the cache read the whole body before the limit was applied, and the
        // handler then hit the limit itself
        assert_eq!(res.status(), StatusCode::Ok);
        assert!(res.body_ref().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn routes_from_one_factory_share_the_store() {
        let store = Arc::new(MokaStore::new(1024 * 1024).unwrap());
        let factory = CacheFactory::with_store(store.clone(), None);

        let (users, users_calls) = cached_route(&factory, Duration::from_secs(60), StatusCode::Ok);
        let (posts, posts_calls) = cached_route(&factory, Duration::from_secs(5), StatusCode::Ok);

        users(get("/users/1")).await;
        posts(get("/posts/1")).await;
        // same path through the other route: the key ignores which route stored it
        posts(get("/users/1")).await;

        store.run_pending_tasks();
        assert_eq!(store.entry_count(), 2);
        assert_eq!(users_calls.load(Ordering::SeqCst), 1);
        assert_eq!(posts_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_entries_are_still_served() {
        let store = Arc::new(MokaStore::new(64).unwrap());
        let factory = CacheFactory::with_store(store, None);
        let (handler, calls) = cached_route(&factory, Duration::from_secs(60), StatusCode::Ok);

        // 40 + 4 * 100 exceeds the 64 budget
        let body = vec![b'x'; 100];
        let first = handler(post("/big", body.clone())).await;
        let second = handler(post("/big", body)).await;

        assert_eq!(first.body_ref().len(), 100);
        assert_eq!(second.body_ref().len(), 100);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_recomputed() {
        let (handler, calls) =
            cached_route(&factory(), Duration::from_millis(50), StatusCode::Ok);
        handler(get("/short")).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        handler(get("/short")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_misses_each_run_the_handler() {
        // Both requests must be inside the handler at once to pass the
        // barrier, so neither can have found the other's entry.
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let calls = Arc::new(AtomicUsize::new(0));
        let (gate, seen) = (Arc::clone(&barrier), Arc::clone(&calls));
        let handler = adapt(
            move |_ctx: Context| {
                let (gate, seen) = (Arc::clone(&gate), Arc::clone(&seen));
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    gate.wait().await;
                    Response::new(StatusCode::Ok)
                }
            },
            [factory().layer(Duration::from_secs(60))],
        );

        let first = tokio::spawn({
            let handler = Arc::clone(&handler);
            async move { handler(get("/same")).await }
        });
        let second = tokio::spawn({
            let handler = Arc::clone(&handler);
            async move { handler(get("/same")).await }
        });

        let both = tokio::time::timeout(Duration::from_secs(5), async {
            (first.await.unwrap(), second.await.unwrap())
        })
        .await
        .expect("concurrent misses were serialized");

        assert_eq!(both.0.status(), StatusCode::Ok);
        assert_eq!(both.1.status(), StatusCode::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // the key is warm afterwards
        handler(get("/same")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn write_failures_are_reported() {
        let (factory, errors) = recording_factory();
        let handler = adapt(
            |_ctx: Context| async { Response::new(StatusCode::Ok).body("ok") },
            [factory.layer(Duration::from_secs(60))],
        );

        let mut res = handler(get("/x")).await;
        let hook = res.take_write_error_hook().expect("hook attached");
        hook.call(&io::Error::from(io::ErrorKind::BrokenPipe));

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            CacheError::ResponseWrite(err) => assert_eq!(err.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected ResponseWrite, got {other:?}"),
        }
    }

    #[test]
    fn zero_budget_fails_construction() {
        let settings = CacheSettings {
            ttl_secs: 60,
            memory_budget_mib: 0,
        };
        assert!(matches!(
            CacheFactory::new(&settings, None),
            Err(CacheError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn client_max_age_values() {
        assert_eq!(client_max_age(Duration::ZERO), 86_400 / 3);
        assert_eq!(client_max_age(Duration::from_secs(300)), 100);
        assert_eq!(client_max_age(Duration::from_secs(1)), 0);
    }
}
