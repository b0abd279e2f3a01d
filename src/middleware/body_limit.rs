//! Request body size limiting.

use std::sync::Arc;

use super::{Middleware, MiddlewareHandler, Next, ResponseFuture, from_middleware};
use crate::context::Context;

const MIB: u64 = 1024 * 1024;

/// Limits how many bytes downstream layers may read from the request body.
///
/// The limit is applied lazily: the request passes through untouched and only
/// a later [`Body::read`](crate::http::Body::read) of an oversized body fails.
/// A layer that reads the body therefore has to sit *inside* this middleware
/// in the chain to be affected by it.
#[derive(Debug, Clone, Copy)]
pub struct MaxBodyMiddleware {
    max_bytes: usize,
}

impl MaxBodyMiddleware {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Middleware for MaxBodyMiddleware {
    fn handle(&self, mut ctx: Context, next: Next) -> ResponseFuture {
        let max_bytes = self.max_bytes;
        Box::pin(async move {
            let body = std::mem::take(ctx.request_mut().body_mut());
            ctx.request_mut().set_body(body.limit(max_bytes));
            next.run(ctx).await
        })
    }
}

/// Limits the readable request body to `size_mib` MiB.
pub fn max_body(size_mib: u64) -> MiddlewareHandler {
    let max_bytes = usize::try_from(size_mib.saturating_mul(MIB)).unwrap_or(usize::MAX);
    from_middleware(Arc::new(MaxBodyMiddleware::new(max_bytes)))
}

/// Limits the readable request body to 5 MiB.
pub fn max_body_5mib() -> MiddlewareHandler {
    max_body(5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::adapt;
    use crate::{Request, Response, StatusCode};

    fn request_with_body(len: usize) -> Context {
        let (mut req, _) = Request::parse(b"POST /upload HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        req.set_body(vec![b'1'; len]);
        Context::new(req)
    }

    // Responds 200 when the body could be read and 413 when it could not.
    async fn read_body(ctx: Context) -> Response {
        match ctx.request().body().read() {
            Ok(_) => Response::new(StatusCode::Ok),
            Err(_) => Response::new(StatusCode::PayloadTooLarge),
        }
    }

    #[tokio::test]
    async fn body_over_limit_cannot_be_read() {
        let handler = adapt(read_body, [max_body(1)]);
        let res = handler(request_with_body(2 * 1024 * 1024)).await;
        assert_eq!(res.status(), StatusCode::PayloadTooLarge);
    }

    #[tokio::test]
    async fn body_under_limit_is_readable() {
        let handler = adapt(read_body, [max_body(3)]);
        let res = handler(request_with_body(2 * 1024 * 1024)).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn five_mib_preset() {
        let handler = adapt(read_body, [max_body_5mib()]);
        assert_eq!(
            handler(request_with_body(6 * 1024 * 1024)).await.status(),
            StatusCode::PayloadTooLarge
        );
        assert_eq!(
            handler(request_with_body(4 * 1024 * 1024)).await.status(),
            StatusCode::Ok
        );
    }

    #[tokio::test]
    async fn nested_limits_keep_the_tighter_one() {
        let handler = adapt(read_body, [max_body(3), max_body(1)]);
        let res = handler(request_with_body(2 * 1024 * 1024)).await;
        assert_eq!(res.status(), StatusCode::PayloadTooLarge);
    }
}
