//! Prefetching source backed by a packet cache.
//!
//! Initialization downloads a fixed-size head of the resource. A read the
//! cache cannot serve fetches a window several times the read size, so that
//! nearby reads that follow are served from memory.

use std::{future::pending, sync::Arc};

use bytes::Bytes;
use plektron_buffer::IntervalCache;
use plektron_core::{Guarded, OwnerId, Registration, SharedGuard};
use plektron_events::{EventBus, SourceEvent};
use plektron_loader::{
    LoaderError, RangeFetch, ResponseHead, SharedNet, TransferEvent, parse_content_range,
};
use plektron_net::{CorsMode, RangeSpec, Request};
use rangemap::RangeSet;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{
    config::PrefetchConfig,
    error::{InitError, ReadError, SourceResult},
    shared::Shared,
};

type InitReply = oneshot::Sender<Result<(), InitError>>;

#[derive(Debug)]
enum Command {
    Initialize(InitReply),
    Read { position: u64, size: usize },
    Stop,
}

/// Byte source that over-fetches into an [`IntervalCache`].
pub struct PrefetchSource {
    url: Url,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    registration: Registration,
}

impl PrefetchSource {
    /// Spawn the actor. Must be called inside a tokio runtime.
    pub fn new(config: PrefetchConfig, net: SharedNet, guard: SharedGuard) -> Self {
        let registration = Registration::new(guard);
        let bus = config
            .bus
            .clone()
            .unwrap_or_else(|| EventBus::new(config.event_channel_capacity));
        let cancel = config
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let shared = Arc::new(Shared::new(bus));
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let url = config.url.clone();
        let actor = PrefetchActor {
            url: config.url,
            cors_mode: config.cors_mode,
            guess_bound: config.guess_bound,
            over_fetch: config.over_fetch.max(1),
            max_read_size: config.max_read_size,
            net,
            guard: Arc::clone(registration.guard()),
            owner: registration.id(),
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
            commands: commands_rx,
            cache: IntervalCache::with_limits(config.packet_max, config.evict_threshold),
            fetch: None,
            init: None,
            initialized: false,
            read: None,
            last_read_begin: 0,
            total: None,
        };
        tokio::spawn(actor.run());

        Self {
            url,
            commands,
            shared,
            cancel,
            registration,
        }
    }

    /// Download the head of the resource.
    pub async fn initialize(&self) -> Result<(), InitError> {
        if self.shared.is_stopped() {
            return Err(InitError::Stopped);
        }
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Initialize(tx)).is_err() {
            return Err(InitError::Stopped);
        }
        rx.await.unwrap_or(Err(InitError::Stopped))
    }

    /// Read up to `size` bytes at `position`; clamped to the resource length.
    pub async fn read(&self, position: u64, size: usize) -> SourceResult<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.shared.begin_read(tx)?;
        if self
            .commands
            .send(Command::Read { position, size })
            .is_err()
        {
            self.shared.complete_read(Err(ReadError::Stopped));
        }
        rx.await.unwrap_or(Err(ReadError::Stopped))
    }

    pub fn stop(&self) {
        if self.shared.signal_stop() {
            let _ = self.commands.send(Command::Stop);
        }
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.shared.total_bytes()
    }

    pub fn buffered_ranges(&self) -> RangeSet<u64> {
        self.shared.buffered()
    }

    pub fn events(&self) -> broadcast::Receiver<SourceEvent> {
        self.shared.bus().subscribe()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn owner_id(&self) -> OwnerId {
        self.registration.id()
    }
}

impl Drop for PrefetchSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone, Copy, Debug)]
struct PendingRead {
    position: u64,
    size: usize,
}

impl PendingRead {
    fn end(self) -> u64 {
        self.position + self.size as u64
    }
}

struct ActiveFetch {
    fetch: RangeFetch,
    /// Absolute offset of the next body byte.
    write_pos: u64,
    first: u64,
    last: u64,
    initial: bool,
}

impl ActiveFetch {
    fn covers(&self, read: PendingRead) -> bool {
        self.first <= read.position && self.last >= read.end() - 1
    }
}

struct PrefetchActor {
    url: Url,
    cors_mode: CorsMode,
    guess_bound: u64,
    over_fetch: u64,
    max_read_size: usize,
    net: SharedNet,
    guard: SharedGuard,
    owner: OwnerId,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedReceiver<Command>,

    cache: IntervalCache,
    fetch: Option<ActiveFetch>,
    init: Option<InitReply>,
    initialized: bool,
    read: Option<PendingRead>,
    last_read_begin: u64,
    total: Option<u64>,
}

impl PrefetchActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(Command::Initialize(reply)) => self.initialize(reply),
                    Some(Command::Read { position, size }) => self.begin_read(position, size),
                    Some(Command::Stop) | None => break,
                },
                event = next_event(&mut self.fetch) => {
                    let terminal = !matches!(
                        event,
                        Some(TransferEvent::Headers(_) | TransferEvent::Data(_))
                    );
                    let guard = Arc::clone(&self.guard);
                    let owner = self.owner;
                    Guarded::new(guard, owner, || self.on_event(event)).run();
                    // A closed fetch must not be polled again.
                    if terminal {
                        self.fetch = None;
                    }
                }
            }
        }
        self.fetch = None;
        debug!(owner = %self.owner, "prefetch actor exited");
    }

    fn initialize(&mut self, reply: InitReply) {
        if self.initialized || self.init.is_some() {
            let _ = reply.send(Err(InitError::AlreadyInitialized));
            return;
        }
        info!(owner = %self.owner, url = %self.url, bound = self.guess_bound, "prefetching head");
        self.init = Some(reply);
        self.start_fetch(0, self.guess_bound, true);
    }

    fn start_fetch(&mut self, first: u64, last: u64, initial: bool) {
        let request = Request::new(self.url.clone())
            .with_range(Some(RangeSpec::new(first, Some(last))))
            .with_cors_mode(self.cors_mode);
        debug!(first, last, initial, "starting prefetch transfer");
        if let Some(old) = self.fetch.take() {
            self.shared.publish(SourceEvent::Downloading(false));
            if old.initial {
                // The head bytes received so far stay cached.
                debug!(bytes = old.write_pos, "head prefetch displaced by a read");
                self.answer_init(Ok(()));
            }
        }
        self.fetch = Some(ActiveFetch {
            fetch: RangeFetch::start(Arc::clone(&self.net), request, &self.cancel),
            write_pos: first,
            first,
            last,
            initial,
        });
        self.shared.publish(SourceEvent::Downloading(true));
    }

    fn begin_read(&mut self, position: u64, size: usize) {
        if self.shared.is_stopped() {
            return;
        }
        self.last_read_begin = position;

        let size = match self.total {
            Some(total) if position >= total => 0,
            Some(total) => usize::try_from(total - position).map_or(size, |left| size.min(left)),
            None => size,
        };
        if size == 0 {
            self.shared.complete_read(Ok(Bytes::new()));
            return;
        }
        if size > self.max_read_size {
            let reason = LoaderError::ReadTooLarge { size }.to_string();
            warn!(position, %reason, "rejecting read");
            self.fail_read(PendingRead { position, size }, &reason);
            return;
        }

        let read = PendingRead { position, size };
        if let Some(data) = self.copy(read) {
            trace!(position, size, "prefetch cache hit");
            self.shared.complete_read(Ok(data));
            return;
        }
        self.read = Some(read);

        if self.fetch.as_ref().is_some_and(|f| f.covers(read)) {
            trace!(position, size, "waiting on in-flight transfer");
            return;
        }
        let span = (size as u64).saturating_mul(self.over_fetch);
        let mut last = position.saturating_add(span);
        if let Some(total) = self.total {
            last = last.min(total - 1);
        }
        self.start_fetch(position, last, false);
    }

    fn copy(&self, read: PendingRead) -> Option<Bytes> {
        if !self.cache.contains(read.position, read.size as u64) {
            return None;
        }
        let mut buf = vec![0u8; read.size];
        self.cache.read(read.position, &mut buf).then(|| Bytes::from(buf))
    }

    fn on_event(&mut self, event: Option<TransferEvent>) {
        match event {
            Some(TransferEvent::Headers(head)) => self.on_headers(&head),
            Some(TransferEvent::Data(data)) => self.on_data(&data),
            Some(TransferEvent::Finished) => self.on_finished(),
            Some(TransferEvent::Failed(e)) => self.fail(&e.to_string()),
            // Task exited without a terminal event.
            None => self.fail("transfer ended unexpectedly"),
        }
    }

    fn on_headers(&mut self, head: &ResponseHead) {
        let Some(fetch) = self.fetch.as_mut() else {
            return;
        };
        let total = match head.status {
            206 => {
                let parsed = head
                    .headers
                    .get("content-range")
                    .map(|value| (value, parse_content_range(value)));
                match parsed {
                    Some((_, Ok(range))) if range.first == fetch.first => {
                        fetch.write_pos = range.first;
                        range.instance_size
                    }
                    Some((value, _)) => {
                        let reason = format!("unexpected Content-Range {value:?}");
                        self.fail(&reason);
                        return;
                    }
                    None => {
                        self.fail("206 response without Content-Range");
                        return;
                    }
                }
            }
            // Range ignored: the body is the whole resource.
            200 => {
                fetch.write_pos = 0;
                fetch.first = 0;
                fetch.last = u64::MAX;
                head.content_length
            }
            status => {
                self.fail(&format!("unexpected HTTP status {status}"));
                return;
            }
        };

        if self.total.is_none()
            && let Some(total) = total
        {
            self.total = Some(total);
            self.shared.set_total_bytes(total);
        }
    }

    fn on_data(&mut self, data: &[u8]) {
        let Some(fetch) = self.fetch.as_mut() else {
            return;
        };
        let start = fetch.write_pos;
        self.cache.append(start, data);
        fetch.write_pos += data.len() as u64;
        let reached_bound = fetch.initial && fetch.write_pos > self.guess_bound;
        self.shared.add_buffered(start, start + data.len() as u64);

        self.try_complete_read();
        if reached_bound {
            debug!(bytes = start + data.len() as u64, "prefetch reached its bound");
            self.on_finished();
        }
    }

    fn on_finished(&mut self) {
        let Some(fetch) = self.fetch.take() else {
            return;
        };
        self.shared.publish(SourceEvent::Downloading(false));
        if fetch.initial {
            self.answer_init(Ok(()));
        }

        self.try_complete_read();
        if let Some(read) = self.read.take() {
            self.fail_read(read, "transfer finished before the read was covered");
        }
        self.cache.evict(self.last_read_begin);
        trace!(
            packets = self.cache.packets().len(),
            cached = self.cache.len(),
            "prefetch transfer finished"
        );
    }

    fn fail(&mut self, reason: &str) {
        warn!(owner = %self.owner, %reason, "prefetch transfer failed");
        if self.fetch.take().is_some() {
            self.shared.publish(SourceEvent::Downloading(false));
        }
        self.answer_init(Err(InitError::Failed(reason.to_owned())));
        if let Some(read) = self.read.take() {
            self.fail_read(read, reason);
        }
    }

    fn answer_init(&mut self, result: Result<(), InitError>) {
        if let Some(reply) = self.init.take() {
            self.initialized = result.is_ok();
            let _ = reply.send(result);
        }
    }

    fn try_complete_read(&mut self) {
        let Some(read) = self.read else {
            return;
        };
        if let Some(data) = self.copy(read) {
            self.read = None;
            self.shared.complete_read(Ok(data));
        }
    }

    fn fail_read(&self, read: PendingRead, reason: &str) {
        self.shared.publish(SourceEvent::ReadFailed {
            position: read.position,
            error: reason.to_owned(),
        });
        self.shared.complete_read(Err(ReadError::Failed {
            position: read.position,
            reason: reason.to_owned(),
        }));
    }
}

async fn next_event(fetch: &mut Option<ActiveFetch>) -> Option<TransferEvent> {
    match fetch {
        Some(active) => active.fetch.next_event().await,
        None => pending().await,
    }
}
