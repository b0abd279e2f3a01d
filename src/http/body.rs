//! Buffered request bodies with an optional read limit.
//!
//! The server receives the whole `Content-Length` payload before dispatching,
//! so a [`Body`] always holds its bytes in memory. What it adds on top of a
//! plain [`Bytes`] is a read limit: middleware can cap how much of the body a
//! downstream layer is allowed to read, and reading an oversized body fails
//! with [`BodyError::TooLarge`] instead of returning the data.

use bytes::Bytes;
use thiserror::Error;

/// Errors produced when reading a request body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("request body exceeds the read limit of {limit} bytes")]
    TooLarge { limit: usize },
}

/// An HTTP request body.
///
/// An absent body and an empty body are the same value.
///
/// # Examples
///
/// ```
/// use respcache::http::{Body, BodyError};
///
/// let body = Body::from("hello");
/// assert_eq!(body.read().unwrap().as_ref(), b"hello");
///
/// let limited = Body::from("hello").limit(3);
/// assert_eq!(limited.read(), Err(BodyError::TooLarge { limit: 3 }));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Body {
    data: Bytes,
    limit: Option<usize>,
}

impl Body {
    /// Creates an empty body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Caps the number of bytes that may be read from this body.
    ///
    /// Applying a second limit keeps the tighter of the two.
    #[must_use]
    pub fn limit(mut self, max_bytes: usize) -> Self {
        self.limit = Some(match self.limit {
            Some(current) => current.min(max_bytes),
            None => max_bytes,
        });
        self
    }

    /// Returns the read limit, if one is set.
    pub fn read_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Reads the full body.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::TooLarge`] when the body is longer than the read limit.
    pub fn read(&self) -> Result<Bytes, BodyError> {
        match self.limit {
            Some(limit) if self.data.len() > limit => Err(BodyError::TooLarge { limit }),
            _ => Ok(self.data.clone()),
        }
    }

    /// Returns the number of buffered bytes, ignoring the read limit.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the body carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self { data, limit: None }
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Bytes::from(data).into()
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Bytes::from_static(data.as_bytes()).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(data: &'static [u8]) -> Self {
        Bytes::from_static(data).into()
    }
}
