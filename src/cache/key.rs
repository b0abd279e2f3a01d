//! Cache key derivation.

use std::fmt;

use crate::Request;

const SEPARATOR: u8 = b'|';

/// Identity of a cacheable request.
///
/// Built from the raw bytes of `path|query[|body]`. The key is the literal
/// concatenation rather than a hash, so distinct inputs only collide when
/// the separator itself makes two concatenations equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// Builds the key for `request` with an already-read `body`.
    ///
    /// A missing query string is treated as an empty one. The method is not
    /// part of the key.
    pub fn for_request(request: &Request, body: &[u8]) -> Self {
        build_key(request.path(), request.query_string().unwrap_or(""), body)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Derives the cache key for a request.
///
/// The key is `path + "|" + query`, followed by `"|" + body` only when the
/// body is non-empty. Query parameters are used as received: `a=1&b=2` and
/// `b=2&a=1` are different keys.
///
/// # Examples
///
/// ```
/// use respcache::cache::build_key;
///
/// assert_eq!(build_key("/items", "page=2", b"").as_bytes(), b"/items|page=2");
/// assert_eq!(build_key("/items", "", b"{}").as_bytes(), b"/items||{}");
/// ```
pub fn build_key(path: &str, query: &str, body: &[u8]) -> CacheKey {
    let mut key = Vec::with_capacity(path.len() + query.len() + body.len() + 2);
    key.extend_from_slice(path.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(query.as_bytes());
    if !body.is_empty() {
        key.push(SEPARATOR);
        key.extend_from_slice(body);
    }
    CacheKey(key)
}
