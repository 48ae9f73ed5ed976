use std::{fmt, pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use url::Url;

use crate::{
    error::NetError,
    timeout::TimeoutNet,
    types::{Headers, Request},
};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, NetError>> + Send>>;

/// Response head plus the body stream.
///
/// Dropping the response (or its body) cancels the transfer.
pub struct Response {
    pub status: u16,
    /// Final URL after redirects.
    pub url: Url,
    pub headers: Headers,
    pub body: ByteStream,
}

impl Response {
    /// Value of `Content-Length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Net: Send + Sync {
    /// Send `request` and return once response headers arrive.
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    async fn open(&self, request: Request) -> Result<Response, NetError>;
}

#[async_trait]
impl<N: Net + ?Sized> Net for std::sync::Arc<N> {
    async fn open(&self, request: Request) -> Result<Response, NetError> {
        (**self).open(request).await
    }
}

pub trait NetExt: Net + Sized {
    /// Add timeout layer
    fn with_timeout(self, timeout: Duration) -> TimeoutNet<Self> {
        TimeoutNet::new(self, timeout)
    }
}

impl<T: Net> NetExt for T {}
