//! Shared async HTTP test server helpers.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use url::Url;

/// Lightweight HTTP test server wrapper.
pub struct TestHttpServer {
    base_url: Url,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestHttpServer {
    /// Spawn `router` on a random localhost port.
    pub async fn new(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test HTTP listener");
        let addr = listener
            .local_addr()
            .expect("read test listener local addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        tokio::spawn(async move {
            server.await.expect("run test HTTP server");
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}")).expect("parse base URL"),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Join path to server base URL.
    #[must_use]
    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).expect("join server URL path")
    }

    /// Base URL of this server.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// A byte resource served with optional `Range` support.
///
/// Records the `Range` header of every request so tests can assert which
/// transfers a source issued.
#[derive(Clone)]
pub struct MediaRoute {
    data: Bytes,
    honor_range: bool,
    chunk_size: usize,
    extra_headers: Vec<(String, String)>,
    requests: Arc<Mutex<Vec<Option<String>>>>,
}

impl MediaRoute {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            honor_range: true,
            chunk_size: 16 * 1024,
            extra_headers: Vec::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serve full 200 responses regardless of `Range`.
    #[must_use]
    pub fn ignoring_ranges(mut self) -> Self {
        self.honor_range = false;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }

    /// `Range` header values seen so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<Option<String>> {
        self.requests.lock().clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Router serving this resource at `path`.
    pub fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, get(serve_media))
            .with_state(self.clone())
    }

    fn body(&self, slice: Bytes) -> Body {
        let chunk_size = self.chunk_size;
        let chunks: Vec<Result<Bytes, std::io::Error>> = (0..slice.len())
            .step_by(chunk_size)
            .map(|start| Ok(slice.slice(start..(start + chunk_size).min(slice.len()))))
            .collect();
        Body::from_stream(futures::stream::iter(chunks))
    }
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = if end.trim().is_empty() {
        None
    } else {
        Some(end.trim().parse::<u64>().ok()?)
    };
    Some((start, end))
}

async fn serve_media(State(route): State<MediaRoute>, headers: HeaderMap) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    route.requests.lock().push(range.clone());

    let total = route.data.len() as u64;
    let mut out = HeaderMap::new();
    for (name, value) in &route.extra_headers {
        out.insert(
            header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }

    let parsed = range.as_deref().and_then(parse_range);
    match parsed {
        Some((start, end)) if route.honor_range => {
            if start >= total {
                out.insert(
                    header::CONTENT_RANGE,
                    HeaderValue::from_str(&format!("bytes */{total}")).unwrap(),
                );
                return (StatusCode::RANGE_NOT_SATISFIABLE, out).into_response();
            }
            let last = end.unwrap_or(total - 1).min(total - 1);
            let slice = route.data.slice(start as usize..=last as usize);
            out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            out.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{last}/{total}")).unwrap(),
            );
            out.insert(header::CONTENT_LENGTH, slice.len().into());
            (StatusCode::PARTIAL_CONTENT, out, route.body(slice)).into_response()
        }
        _ => {
            out.insert(header::CONTENT_LENGTH, route.data.len().into());
            (StatusCode::OK, out, route.body(route.data.clone())).into_response()
        }
    }
}
