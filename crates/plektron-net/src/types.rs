use std::{collections::HashMap, time::Duration};

use url::Url;

/// Header names the loader never wants sent for anonymous CORS requests.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "cookie"];

/// HTTP header map with case-insensitive names.
///
/// Names are stored lowercased; lookups lowercase the key first.
#[derive(Clone, Debug, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert<K: AsRef<str>, V: Into<String>>(&mut self, key: K, value: V) {
        self.inner
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.inner.remove(&key.to_ascii_lowercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(&key.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for Headers {
    fn default() -> Self {
        Self::new()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        let mut headers = Self::new();
        for (k, v) in map {
            headers.insert(k, v);
        }
        headers
    }
}

/// Inclusive byte range `bytes=start-[end]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn to_header_value(&self) -> String {
        if let Some(end) = self.end {
            format!("bytes={}-{}", self.start, end)
        } else {
            format!("bytes={}-", self.start)
        }
    }
}

/// Credentials policy applied to a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CorsMode {
    #[default]
    Unspecified,
    Anonymous,
    UseCredentials,
}

impl CorsMode {
    pub fn sends_credentials(self) -> bool {
        !matches!(self, CorsMode::Anonymous)
    }
}

/// A single transfer request.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub url: Url,
    /// `None` omits the `Range` header entirely.
    pub range: Option<RangeSpec>,
    pub cors_mode: CorsMode,
    pub headers: Headers,
}

impl Request {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            range: None,
            cors_mode: CorsMode::default(),
            headers: Headers::new(),
        }
    }

    #[must_use]
    pub fn with_range(mut self, range: Option<RangeSpec>) -> Self {
        self.range = range;
        self
    }

    #[must_use]
    pub fn with_cors_mode(mut self, cors_mode: CorsMode) -> Self {
        self.cors_mode = cors_mode;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Final header set sent on the wire.
    ///
    /// `defaults` come first, request headers override them, credential
    /// headers are stripped for anonymous requests, and `Range` and
    /// `Accept-Encoding: identity` always win.
    pub fn wire_headers(&self, defaults: &Headers) -> Headers {
        let mut out = defaults.clone();
        for (k, v) in self.headers.iter() {
            out.insert(k, v);
        }

        if !self.cors_mode.sends_credentials() {
            for name in CREDENTIAL_HEADERS {
                out.remove(name);
            }
        }

        // Compressed bodies would break byte offsets.
        out.insert("accept-encoding", "identity");

        match &self.range {
            Some(range) => out.insert("range", range.to_header_value()),
            None => {
                out.remove("range");
            }
        }

        out
    }
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Bound on the request/response phase; body streaming is unbounded.
    pub request_timeout: Duration,
    /// Max idle connections per host. Set to 0 to disable pooling and reduce memory.
    pub pool_max_idle_per_host: usize,
    /// Headers added to every request.
    pub default_headers: Headers,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 0, // Disable pooling for lower memory
            default_headers: Headers::new(),
        }
    }
}

impl NetOptions {
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_default_headers(mut self, headers: Headers) -> Self {
        self.default_headers = headers;
        self
    }
}
