use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::NetError,
    traits::{Net, Response},
    types::Request,
};

/// Timeout decorator for Net implementations
///
/// Bounds the request/response phase only; the body stream is not timed.
pub struct TimeoutNet<N> {
    inner: N,
    timeout: Duration,
}

impl<N: Net> TimeoutNet<N> {
    pub fn new(inner: N, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<N: Net> Net for TimeoutNet<N> {
    async fn open(&self, request: Request) -> Result<Response, NetError> {
        tokio::time::timeout(self.timeout, self.inner.open(request))
            .await
            .map_err(|_| NetError::timeout())?
    }
}
