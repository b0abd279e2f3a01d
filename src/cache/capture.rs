//! Recording a downstream response without sending it.
//!
//! Handlers in this crate return their [`Response`](crate::Response) as a
//! value, so nothing reaches the client until the outermost layer hands the
//! response back to the server. Capturing is therefore a matter of running the
//! rest of the chain once and taking the response apart into an owned
//! [`CachedResponse`].
//!
//! Reading the request body is part of the same step: the cache has to see the
//! body to build its key, and the handler must still find the full body on the
//! request afterwards.

use bytes::Bytes;

use super::CachedResponse;
use crate::context::Context;
use crate::http::{Body, BodyError};
use crate::middleware::Next;

/// Reads the request body and puts the read bytes back on the request.
///
/// The restored body carries no read limit, so layers further down see
/// exactly the bytes this function returned.
///
/// # Errors
///
/// Returns [`BodyError`] when the body cannot be read (e.g. it exceeds a limit
/// set by [`MaxBodyMiddleware`](crate::middleware::MaxBodyMiddleware)). The
/// request is left unchanged in that case.
pub fn extract_body(ctx: &mut Context) -> Result<Bytes, BodyError> {
    let bytes = ctx.request().body().read()?;
    ctx.request_mut().set_body(Body::from(bytes.clone()));
    Ok(bytes)
}

/// Runs the remainder of the chain exactly once and records its response.
///
/// The returned value owns its headers and body; nothing refers back to the
/// handler's response.
pub async fn capture(ctx: Context, next: Next) -> CachedResponse {
    let response = next.run(ctx).await;
    CachedResponse::from(response)
}
