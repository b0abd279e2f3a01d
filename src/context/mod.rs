//! Per-request context passed through the middleware pipeline.

use crate::Request;

/// Per-request context.
///
/// Middleware receives the context by value and hands it on to [`Next`](crate::middleware::Next),
/// so any change made through [`request_mut`](Self::request_mut) is visible to
/// every layer further down the chain.
#[derive(Debug)]
pub struct Context {
    request: Request,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    /// Deserializes the request body as JSON.
    ///
    /// A body that cannot be read (see [`Body::read`](crate::http::Body::read))
    /// is reported as a JSON error.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self
            .request
            .body()
            .read()
            .map_err(<serde_json::Error as serde::de::Error>::custom)?;
        serde_json::from_slice(&body)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    fn context_with_body(body: &'static str) -> Context {
        let (mut request, _) = Request::parse(b"POST /items HTTP/1.1\r\n\r\n").unwrap();
        request.set_body(body);
        Context::new(request)
    }

    #[test]
    fn json_reads_body() {
        let ctx = context_with_body(r#"{"id":7}"#);
        assert_eq!(ctx.json::<Item>().unwrap(), Item { id: 7 });
    }

    #[test]
    fn json_reports_limited_body() {
        let mut ctx = context_with_body(r#"{"id":7}"#);
        let limited = ctx.request().body().clone().limit(2);
        ctx.request_mut().set_body(limited);
        assert!(ctx.json::<Item>().is_err());
    }
}
