use std::time::Duration;

use plektron_buffer::{DEFAULT_EVICT_THRESHOLD, DEFAULT_PACKET_MAX};
use plektron_events::EventBus;
use plektron_loader::LoaderOptions;
use plektron_net::CorsMode;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How much the host wants loaded before playback starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Preload {
    None,
    /// Load enough to read the container headers, then release the connection.
    Metadata,
    #[default]
    Auto,
}

/// Configuration for [`StreamingSource`](crate::StreamingSource).
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub url: Url,
    pub cors_mode: CorsMode,
    pub preload: Preload,
    /// Loader restarts allowed for one read before it fails.
    pub max_retries: u32,
    /// Pause before restarting after a transport failure.
    pub retry_delay: Duration,
    /// Bits per second; `0` when unknown.
    pub bitrate: u64,
    pub playback_rate: f64,
    pub loader: LoaderOptions,
    /// Event bus (optional - if not provided, one is created internally).
    pub bus: Option<EventBus>,
    /// Event bus channel capacity (used when `bus` is not provided).
    pub event_channel_capacity: usize,
    /// Cancellation token for graceful shutdown.
    pub cancel: Option<CancellationToken>,
}

impl SourceConfig {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            cors_mode: CorsMode::default(),
            preload: Preload::default(),
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
            bitrate: 0,
            playback_rate: 1.0,
            loader: LoaderOptions::default(),
            bus: None,
            event_channel_capacity: 64,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cors_mode(mut self, cors_mode: CorsMode) -> Self {
        self.cors_mode = cors_mode;
        self
    }

    #[must_use]
    pub fn with_preload(mut self, preload: Preload) -> Self {
        self.preload = preload;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    #[must_use]
    pub fn with_playback_rate(mut self, playback_rate: f64) -> Self {
        self.playback_rate = playback_rate;
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: LoaderOptions) -> Self {
        self.loader = loader;
        self
    }

    /// Set event bus for subscribing to source events.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Configuration for [`PrefetchSource`](crate::PrefetchSource).
#[derive(Clone, Debug)]
pub struct PrefetchConfig {
    pub url: Url,
    pub cors_mode: CorsMode,
    /// Inclusive last byte of the initial prefetch.
    pub guess_bound: u64,
    /// A miss of `size` bytes fetches `over_fetch * size` bytes.
    pub over_fetch: u64,
    /// Reads larger than this fail without touching the network.
    pub max_read_size: usize,
    pub packet_max: usize,
    pub evict_threshold: usize,
    pub bus: Option<EventBus>,
    pub event_channel_capacity: usize,
    pub cancel: Option<CancellationToken>,
}

impl PrefetchConfig {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            cors_mode: CorsMode::default(),
            guess_bound: 3_200_000,
            over_fetch: 5,
            max_read_size: 20 * 1024 * 1024,
            packet_max: DEFAULT_PACKET_MAX,
            evict_threshold: DEFAULT_EVICT_THRESHOLD,
            bus: None,
            event_channel_capacity: 64,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cors_mode(mut self, cors_mode: CorsMode) -> Self {
        self.cors_mode = cors_mode;
        self
    }

    #[must_use]
    pub fn with_guess_bound(mut self, guess_bound: u64) -> Self {
        self.guess_bound = guess_bound;
        self
    }

    /// Clamped to at least `1`.
    #[must_use]
    pub fn with_over_fetch(mut self, factor: u64) -> Self {
        self.over_fetch = factor.max(1);
        self
    }

    #[must_use]
    pub fn with_max_read_size(mut self, max_read_size: usize) -> Self {
        self.max_read_size = max_read_size;
        self
    }

    #[must_use]
    pub fn with_packet_limits(mut self, packet_max: usize, evict_threshold: usize) -> Self {
        self.packet_max = packet_max;
        self.evict_threshold = evict_threshold;
        self
    }

    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_url() -> Url {
        Url::parse("http://example.com/track.webm").unwrap()
    }

    #[test]
    fn source_defaults() {
        let config = SourceConfig::new(test_url());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.preload, Preload::Auto);
        assert!(config.bus.is_none());
        assert!(config.cancel.is_none());
    }

    #[test]
    fn source_builder_chain() {
        let cancel = CancellationToken::new();
        let config = SourceConfig::new(test_url())
            .with_preload(Preload::Metadata)
            .with_max_retries(1)
            .with_retry_delay(Duration::ZERO)
            .with_cors_mode(CorsMode::Anonymous)
            .with_events(EventBus::new(8))
            .with_cancel(cancel);

        assert_eq!(config.preload, Preload::Metadata);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay, Duration::ZERO);
        assert_eq!(config.cors_mode, CorsMode::Anonymous);
        assert!(config.bus.is_some());
        assert!(config.cancel.is_some());
    }

    #[test]
    fn prefetch_defaults() {
        let config = PrefetchConfig::new(test_url());
        assert_eq!(config.guess_bound, 3_200_000);
        assert_eq!(config.over_fetch, 5);
        assert_eq!(config.max_read_size, 20 * 1024 * 1024);
        assert_eq!(config.packet_max, 3 * 1024 * 1024);
        assert_eq!(config.evict_threshold, 3);
    }

    #[test]
    fn over_fetch_is_at_least_one() {
        let config = PrefetchConfig::new(test_url()).with_over_fetch(0);
        assert_eq!(config.over_fetch, 1);
    }
}
