use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use tracing::debug;

use crate::{
    error::{NetError, NetResult},
    traits::{Net, Response},
    types::{Headers, NetOptions, Request},
};

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns [`NetError`] if the underlying `reqwest::Client` cannot be built.
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .connect_timeout(options.request_timeout)
            .build()
            .map_err(NetError::from)?;
        Ok(Self { inner, options })
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: &Headers,
    ) -> reqwest::RequestBuilder {
        for (k, v) in headers.iter() {
            req = req.header(k, v);
        }
        req
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn open(&self, request: Request) -> Result<Response, NetError> {
        let headers = request.wire_headers(&self.options.default_headers);
        let req = Self::apply_headers(self.inner.get(request.url.clone()), &headers);
        // Only the wait for the response head is timed; the body is not.
        let resp = tokio::time::timeout(self.options.request_timeout, req.send())
            .await
            .map_err(|_| NetError::timeout())?
            .map_err(NetError::from)?;
        let status = resp.status().as_u16();
        let url = resp.url().clone();

        let mut out = Headers::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                out.insert(name.as_str(), v);
            }
        }

        debug!(%url, status, range = ?request.range, "response headers received");

        let body = resp.bytes_stream().map_err(NetError::from);
        Ok(Response {
            status,
            url,
            headers: out,
            body: Box::pin(body),
        })
    }
}
