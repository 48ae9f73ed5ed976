//! Scripted fake transport.
//!
//! `ScriptedNet` answers `open()` from a queue of scripted responses, falling
//! back to a closure once the queue is empty. Every request is recorded so
//! tests can count transfer attempts and inspect their ranges.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use plektron_net::{ByteStream, Headers, Net, NetError, Request, Response};
use tokio::sync::mpsc;
use url::Url;

type Fallback = Arc<dyn Fn(&Request) -> ScriptedResponse + Send + Sync>;

/// Body of a scripted response.
pub enum ScriptedBody {
    /// Fixed chunks, delivered as fast as the reader polls.
    Chunks(Vec<Result<Bytes, NetError>>),
    /// Chunks pushed by the test through a [`BodySender`]; the body ends when
    /// the sender is dropped.
    Channel(mpsc::UnboundedReceiver<Result<Bytes, NetError>>),
}

impl ScriptedBody {
    fn into_stream(self) -> ByteStream {
        match self {
            Self::Chunks(chunks) => Box::pin(futures::stream::iter(chunks)),
            Self::Channel(rx) => Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })),
        }
    }
}

/// Test-side handle feeding a [`ScriptedBody::Channel`].
#[derive(Clone)]
pub struct BodySender {
    tx: mpsc::UnboundedSender<Result<Bytes, NetError>>,
}

impl BodySender {
    pub fn send(&self, bytes: impl Into<Bytes>) {
        let _ = self.tx.send(Ok(bytes.into()));
    }

    pub fn fail(&self, error: NetError) {
        let _ = self.tx.send(Err(error));
    }
}

/// One scripted answer to `open()`.
pub enum ScriptedResponse {
    Fail(NetError),
    Respond {
        status: u16,
        url: Option<Url>,
        headers: Headers,
        body: ScriptedBody,
    },
}

impl ScriptedResponse {
    /// `206` for `[first, last]` of a `total`-byte resource, body from `data`.
    #[must_use]
    pub fn partial(data: &[u8], first: u64, last: u64, total: Option<u64>) -> Self {
        let mut headers = Headers::new();
        let total_str = total.map_or_else(|| "*".to_string(), |t| t.to_string());
        headers.insert("content-range", format!("bytes {first}-{last}/{total_str}"));
        headers.insert("content-length", (last - first + 1).to_string());
        headers.insert("accept-ranges", "bytes");
        let slice = Bytes::copy_from_slice(&data[first as usize..=last as usize]);
        Self::Respond {
            status: 206,
            url: None,
            headers,
            body: ScriptedBody::Chunks(vec![Ok(slice)]),
        }
    }

    /// `200` carrying all of `data`.
    #[must_use]
    pub fn full(data: &[u8]) -> Self {
        let mut headers = Headers::new();
        headers.insert("content-length", data.len().to_string());
        Self::Respond {
            status: 200,
            url: None,
            headers,
            body: ScriptedBody::Chunks(vec![Ok(Bytes::copy_from_slice(data))]),
        }
    }

    /// Response head with a body the test drives through the returned sender.
    #[must_use]
    pub fn streaming(status: u16, headers: Headers) -> (Self, BodySender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let response = Self::Respond {
            status,
            url: None,
            headers,
            body: ScriptedBody::Channel(rx),
        };
        (response, BodySender { tx })
    }

    /// Override the final URL reported by the response.
    #[must_use]
    pub fn from_url(mut self, final_url: Url) -> Self {
        if let Self::Respond { url, .. } = &mut self {
            *url = Some(final_url);
        }
        self
    }
}

/// Fake [`Net`] answering from a script.
pub struct ScriptedNet {
    script: Mutex<VecDeque<ScriptedResponse>>,
    fallback: Fallback,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedNet {
    /// Script-only transport; once the queue drains every request fails.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fallback(|_| ScriptedResponse::Fail(NetError::http("script exhausted")))
    }

    pub fn with_fallback<F>(fallback: F) -> Self
    where
        F: Fn(&Request) -> ScriptedResponse + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Arc::new(fallback),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Transport that fails every request.
    #[must_use]
    pub fn always_failing() -> Self {
        Self::with_fallback(|_| ScriptedResponse::Fail(NetError::http("connection reset")))
    }

    /// Range-aware transport over `data`: honors `Range` with `206`, answers
    /// unranged requests with `200`.
    #[must_use]
    pub fn serving(data: Vec<u8>) -> Self {
        Self::with_fallback(move |request| {
            let total = data.len() as u64;
            match &request.range {
                Some(range) if range.start < total => {
                    let last = range.end.unwrap_or(total - 1).min(total - 1);
                    ScriptedResponse::partial(&data, range.start, last, Some(total))
                }
                Some(_) => ScriptedResponse::Respond {
                    status: 416,
                    url: None,
                    headers: Headers::new(),
                    body: ScriptedBody::Chunks(Vec::new()),
                },
                None => ScriptedResponse::full(&data),
            }
        })
    }

    #[must_use]
    pub fn push(self, response: ScriptedResponse) -> Self {
        self.script.lock().push_back(response);
        self
    }

    pub fn enqueue(&self, response: ScriptedResponse) {
        self.script.lock().push_back(response);
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Number of `open()` calls so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for ScriptedNet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Net for ScriptedNet {
    async fn open(&self, request: Request) -> Result<Response, NetError> {
        self.requests.lock().push(request.clone());
        let scripted = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| (self.fallback)(&request));

        match scripted {
            ScriptedResponse::Fail(error) => Err(error),
            ScriptedResponse::Respond {
                status,
                url,
                headers,
                body,
            } => Ok(Response {
                status,
                url: url.unwrap_or(request.url),
                headers,
                body: body.into_stream(),
            }),
        }
    }
}
