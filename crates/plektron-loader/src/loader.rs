#![forbid(unsafe_code)]

//! Byte-range loader session.
//!
//! A [`RangeLoader`] owns at most one transfer and the [`ByteRangeCache`] it
//! fills. It is driven from a single control task: public methods mutate
//! state synchronously, and [`RangeLoader::next_notice`] folds transfer
//! events into the session and yields [`LoaderNotice`]s for the owner.
//!
//! Offsets: `offset` is the absolute stream position of the cache cursor.
//! A read at `position` sits at `first_offset = position - offset` relative
//! to the cursor; negative values lie in the backward window.

use std::collections::VecDeque;

use bytes::Bytes;
use plektron_buffer::ByteRangeCache;
use plektron_events::LoadingState;
use plektron_net::{CorsMode, RangeSpec, Request};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::{Origin, Url};

use crate::{
    cacheability::uncacheable_reasons,
    content_range::parse_content_range,
    defer::DeferStrategy,
    error::{LoadStatus, LoaderError},
    options::LoaderOptions,
    transfer::{ResponseHead, SharedNet, Transfer, TransferEvent},
    window::buffer_window,
};

const EVENT_CHANNEL_CAPACITY: usize = 8;

/// What to fetch and how.
#[derive(Clone, Debug)]
pub struct LoaderParams {
    pub url: Url,
    pub cors_mode: CorsMode,
    /// `None` sends no `Range` header.
    pub first_byte: Option<u64>,
    /// Inclusive; `None` leaves the range open-ended.
    pub last_byte: Option<u64>,
    pub strategy: DeferStrategy,
    /// Bits per second; `0` when unknown.
    pub bitrate: u64,
    pub playback_rate: f64,
    /// Responses from any other origin fail the transfer.
    pub expected_origin: Option<Origin>,
}

impl LoaderParams {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            cors_mode: CorsMode::default(),
            first_byte: None,
            last_byte: None,
            strategy: DeferStrategy::default(),
            bitrate: 0,
            playback_rate: 1.0,
            expected_origin: None,
        }
    }

    #[must_use]
    pub fn with_range(mut self, first_byte: Option<u64>, last_byte: Option<u64>) -> Self {
        self.first_byte = first_byte;
        self.last_byte = last_byte;
        self
    }

    #[must_use]
    pub fn with_cors_mode(mut self, cors_mode: CorsMode) -> Self {
        self.cors_mode = cors_mode;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: DeferStrategy) -> Self {
        self.strategy = strategy;
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
    pub fn with_expected_origin(mut self, origin: Option<Origin>) -> Self {
        self.expected_origin = origin;
        self
    }
}

/// Result of a completed read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadResult {
    pub status: LoadStatus,
    /// Empty unless `status` is [`LoadStatus::Ok`]; empty `Ok` means EOF.
    pub data: Bytes,
}

impl ReadResult {
    fn ok(data: Bytes) -> Self {
        Self {
            status: LoadStatus::Ok,
            data,
        }
    }

    fn status(status: LoadStatus) -> Self {
        Self {
            status,
            data: Bytes::new(),
        }
    }
}

/// Immediate answer to [`RangeLoader::read`].
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Complete(ReadResult),
    /// Completes later through [`LoaderNotice::ReadDone`].
    Pending,
}

/// Asynchronous output of a loader.
#[derive(Debug, PartialEq, Eq)]
pub enum LoaderNotice {
    /// Answer to [`RangeLoader::start`]; sent once.
    Started(LoadStatus),
    ReadDone(ReadResult),
    LoadingState(LoadingState),
    /// Exclusive end of the buffered bytes of this session.
    Progress(u64),
}

#[derive(Clone, Copy, Debug)]
struct PendingRead {
    position: u64,
    size: usize,
}

/// One network transfer session feeding a sliding byte window.
pub struct RangeLoader {
    net: SharedNet,
    options: LoaderOptions,
    url: Url,
    cors_mode: CorsMode,
    first_byte: Option<u64>,
    last_byte: Option<u64>,
    defer_strategy: DeferStrategy,
    bitrate: u64,
    playback_rate: f64,
    expected_origin: Option<Origin>,

    cache: ByteRangeCache,
    offset: u64,
    saved_forward_capacity: Option<usize>,

    transfer: Option<Transfer>,
    started: bool,
    start_pending: bool,
    deferred: bool,
    cancel_upon_deferral: bool,
    failed: bool,
    error: Option<LoaderError>,
    pending_read: Option<PendingRead>,

    content_length: Option<u64>,
    instance_size: Option<u64>,
    range_supported: bool,
    might_be_reused_from_cache: bool,
    single_origin: bool,
    response_origin: Option<Origin>,

    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: mpsc::Receiver<TransferEvent>,
    notices: VecDeque<LoaderNotice>,
    cancel: CancellationToken,
}

impl RangeLoader {
    /// Create an idle loader. Transfers run under children of `cancel`.
    pub fn new(
        net: SharedNet,
        params: LoaderParams,
        options: LoaderOptions,
        cancel: &CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let window = buffer_window(params.bitrate, params.playback_rate, &options);

        Self {
            net,
            url: params.url,
            cors_mode: params.cors_mode,
            first_byte: params.first_byte,
            last_byte: params.last_byte,
            defer_strategy: params.strategy,
            bitrate: params.bitrate,
            playback_rate: params.playback_rate,
            expected_origin: params.expected_origin,

            cache: ByteRangeCache::new(window.backward, window.forward),
            offset: params.first_byte.unwrap_or(0),
            saved_forward_capacity: None,

            transfer: None,
            started: false,
            start_pending: false,
            deferred: false,
            cancel_upon_deferral: false,
            failed: false,
            error: None,
            pending_read: None,

            content_length: None,
            instance_size: None,
            range_supported: false,
            might_be_reused_from_cache: true,
            single_origin: true,
            response_origin: None,

            events_tx,
            events_rx,
            notices: VecDeque::new(),
            cancel: cancel.clone(),
            options,
        }
    }

    /// Issue the request. The answer arrives as [`LoaderNotice::Started`].
    pub fn start(&mut self) {
        if self.started {
            warn!(url = %self.url, "loader already started");
            return;
        }
        self.started = true;
        self.start_pending = true;

        let range = self
            .first_byte
            .map(|first| RangeSpec::new(first, self.last_byte));
        let request = Request::new(self.url.clone())
            .with_range(range)
            .with_cors_mode(self.cors_mode);

        debug!(
            url = %self.url,
            first_byte = ?self.first_byte,
            last_byte = ?self.last_byte,
            strategy = %self.defer_strategy,
            "starting range transfer"
        );
        self.transfer = Some(Transfer::spawn(
            self.net.clone(),
            request,
            self.events_tx.clone(),
            &self.cancel,
        ));
        self.deferred = false;
        self.notices
            .push_back(LoaderNotice::LoadingState(LoadingState::Loading));
    }

    /// Cancel the transfer and drop buffered bytes.
    ///
    /// A pending read completes with [`LoadStatus::Failed`]; no other notice
    /// follows.
    pub fn stop(&mut self) {
        debug!(url = %self.url, "stopping loader");
        self.transfer = None;
        self.start_pending = false;
        self.cache.clear();
        self.notices.clear();
        if self.pending_read.is_some() {
            let result = self.done_read(LoadStatus::Failed);
            self.notices.push_back(LoaderNotice::ReadDone(result));
        }
    }

    /// Read `size` bytes at absolute `position`.
    ///
    /// Serves from the window when possible, waits for the active transfer
    /// when the bytes are close enough ahead, and reports a cache miss
    /// otherwise.
    pub fn read(&mut self, position: u64, size: usize) -> ReadOutcome {
        if self.pending_read.is_some() {
            warn!(position, size, "read issued while another is pending");
            return ReadOutcome::Complete(ReadResult::status(LoadStatus::Failed));
        }
        if self.failed {
            return ReadOutcome::Complete(ReadResult::status(LoadStatus::Failed));
        }
        if self.instance_size.is_some_and(|total| total <= position) {
            return ReadOutcome::Complete(ReadResult::ok(Bytes::new()));
        }
        if size > self.options.max_capacity {
            warn!(
                error = %LoaderError::ReadTooLarge { size },
                "rejecting read"
            );
            return ReadOutcome::Complete(ReadResult::status(LoadStatus::Failed));
        }

        let read = PendingRead { position, size };
        let Some((first, last)) = self.offsets(read) else {
            return ReadOutcome::Complete(ReadResult::status(LoadStatus::CacheMiss));
        };
        self.pending_read = Some(read);

        if self.can_fulfill(first, last) {
            let result = self.read_internal(first, size);
            self.update_defer_behavior();
            return ReadOutcome::Complete(result);
        }

        if self.will_fulfill(first) {
            // Advance as far as possible to make room ahead.
            let advance = first.min(self.cache.forward_bytes() as i64);
            if self.cache.seek(advance) {
                self.offset = self.offset.saturating_add_signed(advance);
            }
            let last = last - advance;
            if last > self.cache.forward_capacity() as i64 {
                self.saved_forward_capacity = Some(self.cache.forward_capacity());
                self.cache.set_forward_capacity(last as usize);
            }
            trace!(position, size, offset = self.offset, "read waits for transfer");
            self.update_defer_behavior();
            return ReadOutcome::Pending;
        }

        ReadOutcome::Complete(self.done_read(LoadStatus::CacheMiss))
    }

    /// Wait for the next notice, folding transfer events into the session.
    ///
    /// Cancel-safe: no event is lost when the future is dropped.
    pub async fn next_notice(&mut self) -> LoaderNotice {
        loop {
            if let Some(notice) = self.notices.pop_front() {
                return notice;
            }
            match self.events_rx.recv().await {
                Some(event) => self.handle_event(event),
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Queued notice, if any, without waiting.
    pub fn try_notice(&mut self) -> Option<LoaderNotice> {
        self.notices.pop_front()
    }

    /// Switch strategy. `NeverDefer` becomes `CapacityDefer` when the
    /// response cannot be reused from an HTTP cache.
    pub fn update_defer_strategy(&mut self, strategy: DeferStrategy) {
        let strategy = if !self.might_be_reused_from_cache && strategy == DeferStrategy::NeverDefer
        {
            DeferStrategy::CapacityDefer
        } else {
            strategy
        };
        if strategy != self.defer_strategy {
            debug!(from = %self.defer_strategy, to = %strategy, "defer strategy changed");
        }
        self.defer_strategy = strategy;
        self.update_defer_behavior();
    }

    /// Tear the transfer down the next time it defers.
    pub fn cancel_upon_deferral(&mut self) {
        self.cancel_upon_deferral = true;
        if self.transfer.is_some() && self.deferred {
            debug!(url = %self.url, "cancelling deferred transfer");
            self.transfer = None;
        }
    }

    pub fn set_bitrate(&mut self, bitrate: u64) {
        self.bitrate = bitrate;
        self.update_buffer_window();
    }

    pub fn set_playback_rate(&mut self, playback_rate: f64) {
        self.playback_rate = playback_rate;
        self.update_buffer_window();
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn first_byte_position(&self) -> Option<u64> {
        self.first_byte
    }

    /// Total resource length, once known.
    pub fn instance_size(&self) -> Option<u64> {
        self.instance_size
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn range_supported(&self) -> bool {
        self.range_supported
    }

    pub fn defer_strategy(&self) -> DeferStrategy {
        self.defer_strategy
    }

    pub fn might_be_reused_from_cache(&self) -> bool {
        self.might_be_reused_from_cache
    }

    /// Whether every response so far came from the request's origin.
    pub fn has_single_origin(&self) -> bool {
        self.single_origin
    }

    /// Origin of the response, once headers arrived.
    pub fn response_origin(&self) -> Option<&Origin> {
        self.response_origin.as_ref()
    }

    /// Whether a transfer is running and not deferred.
    pub fn is_downloading_data(&self) -> bool {
        self.transfer.is_some() && !self.deferred
    }

    pub fn is_active(&self) -> bool {
        self.transfer.is_some()
    }

    pub fn has_pending_read(&self) -> bool {
        self.pending_read.is_some()
    }

    /// Failure that ended the session, if any.
    pub fn error(&self) -> Option<&LoaderError> {
        self.error.as_ref()
    }

    /// Exclusive end of the buffered bytes.
    pub fn buffered_end(&self) -> u64 {
        self.offset + self.cache.forward_bytes() as u64
    }

    pub fn forward_capacity(&self) -> usize {
        self.cache.forward_capacity()
    }

    pub fn backward_capacity(&self) -> usize {
        self.cache.backward_capacity()
    }

    fn handle_event(&mut self, event: TransferEvent) {
        if self.transfer.is_none() {
            trace!("dropping event of inactive transfer");
            return;
        }
        match event {
            TransferEvent::Headers(head) => self.on_response(head),
            TransferEvent::Data(bytes) => self.on_data(bytes),
            TransferEvent::Finished => self.on_finished(),
            TransferEvent::Failed(e) => self.on_failed(LoaderError::Net(e)),
        }
    }

    fn on_response(&mut self, head: ResponseHead) {
        let reasons = uncacheable_reasons(head.status, &head.headers);
        self.might_be_reused_from_cache = reasons.is_empty();
        if !reasons.is_empty() {
            debug!(?reasons, "response not reusable from cache");
        }

        self.content_length = head.content_length;

        let origin = head.url.origin();
        self.single_origin = origin == self.url.origin();
        if let Some(expected) = &self.expected_origin
            && *expected != origin
        {
            let error = LoaderError::CrossOrigin {
                expected: expected.ascii_serialization(),
                actual: origin.ascii_serialization(),
            };
            self.on_failed(error);
            return;
        }
        self.response_origin = Some(origin);

        if let Err(error) = self.validate_response(&head) {
            self.on_failed(error);
            return;
        }

        debug!(
            status = head.status,
            first_byte = ?self.first_byte,
            instance_size = ?self.instance_size,
            range_supported = self.range_supported,
            single_origin = self.single_origin,
            "response validated"
        );

        self.start_pending = false;
        self.notices.push_back(LoaderNotice::Started(LoadStatus::Ok));
        self.update_defer_strategy(self.defer_strategy);
    }

    fn validate_response(&mut self, head: &ResponseHead) -> Result<(), LoaderError> {
        let is_http = matches!(self.url.scheme(), "http" | "https");
        if !is_http {
            if let Some(len) = self.content_length {
                match (self.first_byte, self.last_byte) {
                    (None, _) => self.instance_size = Some(len),
                    (Some(first), None) => self.instance_size = Some(len + first),
                    _ => {}
                }
            }
            return Ok(());
        }

        let partial = head.status == 206;
        let ok = head.status == 200;

        let Some(first_byte) = self.first_byte else {
            self.instance_size = self.content_length;
            if !ok {
                return Err(LoaderError::UnexpectedStatus {
                    status: head.status,
                    ranged: false,
                });
            }
            self.range_supported = accepts_byte_ranges(head);
            return Ok(());
        };

        self.range_supported = accepts_byte_ranges(head);
        if partial {
            let value = head.headers.get("content-range").unwrap_or_default();
            let range = parse_content_range(value)?;
            if let Some(size) = range.instance_size {
                self.instance_size = Some(size);
            }
            if range.first != first_byte {
                return Err(LoaderError::RangeMismatch {
                    requested: first_byte,
                    received: range.first,
                });
            }
            self.range_supported = true;
            Ok(())
        } else if ok && first_byte == 0 && self.last_byte.is_none() {
            // Plain 200 to `bytes=0-`: trust Accept-Ranges.
            self.instance_size = self.content_length;
            Ok(())
        } else {
            Err(LoaderError::UnexpectedStatus {
                status: head.status,
                ranged: true,
            })
        }
    }

    fn on_data(&mut self, bytes: Bytes) {
        let len = bytes.len();
        self.cache.append(bytes);
        self.notices
            .push_back(LoaderNotice::Progress(self.buffered_end()));

        if let Some(read) = self.pending_read
            && let Some((first, last)) = self.offsets(read)
            && self.can_fulfill(first, last)
        {
            let result = self.read_internal(first, read.size);
            self.notices.push_back(LoaderNotice::ReadDone(result));
        }

        self.update_defer_behavior();

        let forward = self.cache.forward_bytes();
        let capacity = self.cache.forward_capacity();
        if forward > capacity {
            let excess = forward - capacity;
            if self.cache.seek(excess as i64) {
                self.offset += excess as u64;
            }
        }

        trace!(
            len,
            offset = self.offset,
            forward = self.cache.forward_bytes(),
            backward = self.cache.backward_bytes(),
            "buffered"
        );
    }

    fn on_finished(&mut self) {
        self.transfer = None;
        self.deferred = false;
        self.notices
            .push_back(LoaderNotice::LoadingState(LoadingState::Finished));

        if self.instance_size.is_none() {
            self.instance_size = Some(self.buffered_end());
        }
        debug!(url = %self.url, instance_size = ?self.instance_size, "transfer finished");

        if let Some(read) = self.pending_read {
            let result = match self.offsets(read) {
                Some((first, last)) if self.can_fulfill(first, last) => {
                    self.read_internal(first, read.size)
                }
                _ => self.done_read(LoadStatus::CacheMiss),
            };
            self.notices.push_back(LoaderNotice::ReadDone(result));
        }
    }

    fn on_failed(&mut self, error: LoaderError) {
        warn!(url = %self.url, %error, "range transfer failed");
        self.transfer = None;
        self.failed = true;
        self.error = Some(error);
        self.notices
            .push_back(LoaderNotice::LoadingState(LoadingState::Failed));

        if self.start_pending {
            self.start_pending = false;
            self.notices
                .push_back(LoaderNotice::Started(LoadStatus::Failed));
        } else if self.pending_read.is_some() {
            let result = self.done_read(LoadStatus::Failed);
            self.notices.push_back(LoaderNotice::ReadDone(result));
        }
    }

    /// `(first_offset, last_offset)` of `read` relative to the cursor.
    fn offsets(&self, read: PendingRead) -> Option<(i64, i64)> {
        let position = i64::try_from(read.position).ok()?;
        let offset = i64::try_from(self.offset).ok()?;
        let first = position.checked_sub(offset)?;
        let last = first.checked_add(i64::try_from(read.size).ok()?)?;
        Some((first, last))
    }

    fn too_far_back(&self, first: i64) -> bool {
        first < 0 && first + (self.cache.backward_bytes() as i64) < 0
    }

    fn can_fulfill(&self, first: i64, last: i64) -> bool {
        let forward = self.cache.forward_bytes() as i64;
        if self.too_far_back(first) || first >= forward {
            return false;
        }
        // A finished transfer serves whatever it has.
        self.transfer.is_none() || last <= forward
    }

    fn will_fulfill(&self, first: i64) -> bool {
        if self.too_far_back(first) {
            return false;
        }
        let ahead = first - self.cache.forward_bytes() as i64;
        if ahead >= self.options.forward_wait_threshold as i64 {
            return false;
        }
        self.transfer.is_some()
    }

    fn read_internal(&mut self, first: i64, size: usize) -> ReadResult {
        if !self.cache.seek(first) {
            return self.done_read(LoadStatus::CacheMiss);
        }
        let mut buf = vec![0u8; size];
        let n = self.cache.read(&mut buf);
        buf.truncate(n);
        self.offset = self.offset.saturating_add_signed(first) + n as u64;

        let mut result = self.done_read(LoadStatus::Ok);
        result.data = Bytes::from(buf);
        result
    }

    fn done_read(&mut self, status: LoadStatus) -> ReadResult {
        if let Some(capacity) = self.saved_forward_capacity.take() {
            self.cache.set_forward_capacity(capacity);
        }
        self.pending_read = None;
        ReadResult::status(status)
    }

    fn should_defer(&self) -> bool {
        match self.defer_strategy {
            DeferStrategy::NeverDefer => false,
            DeferStrategy::ReadThenDefer => self.pending_read.is_none(),
            DeferStrategy::CapacityDefer => {
                self.cache.forward_bytes() >= self.cache.forward_capacity()
            }
        }
    }

    fn update_defer_behavior(&mut self) {
        if self.transfer.is_none() {
            return;
        }
        self.set_deferred(self.should_defer());
    }

    fn set_deferred(&mut self, deferred: bool) {
        if self.deferred == deferred {
            return;
        }
        self.deferred = deferred;
        if let Some(transfer) = &self.transfer {
            transfer.set_deferred(deferred);
        }
        let state = if deferred {
            LoadingState::Deferred
        } else {
            LoadingState::Loading
        };
        self.notices.push_back(LoaderNotice::LoadingState(state));

        if deferred && self.cancel_upon_deferral {
            debug!(url = %self.url, "cancelling deferred transfer");
            self.transfer = None;
        }
    }

    fn update_buffer_window(&mut self) {
        let window = buffer_window(self.bitrate, self.playback_rate, &self.options);
        self.cache.set_backward_capacity(window.backward);
        match self.saved_forward_capacity.as_mut() {
            // A waiting read keeps its grown capacity until it completes.
            Some(saved) => *saved = window.forward,
            None => self.cache.set_forward_capacity(window.forward),
        }
        debug!(
            bitrate = self.bitrate,
            playback_rate = self.playback_rate,
            backward = window.backward,
            forward = window.forward,
            "buffer window updated"
        );
    }
}

fn accepts_byte_ranges(head: &ResponseHead) -> bool {
    head.headers
        .get("accept-ranges")
        .is_some_and(|v| v.to_ascii_lowercase().contains("bytes"))
}
