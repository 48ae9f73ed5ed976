//! Range-request source that restarts its loader on cache misses.
//!
//! [`StreamingSource`] is a thin handle. An actor task owns the
//! [`RangeLoader`] and processes handle commands, loader notices and the
//! retry timer one at a time. Notices and timer expiry are continuations:
//! they run only while the owner is still registered with the guard.

use std::{future::pending, pin::Pin, sync::Arc, time::Duration};

use bytes::Bytes;
use plektron_core::{Guarded, OwnerId, Registration, SharedGuard};
use plektron_events::{EventBus, LoadingState, SourceEvent};
use plektron_loader::{
    DeferStrategy, LoadStatus, LoaderNotice, LoaderOptions, LoaderParams, RangeLoader,
    ReadOutcome, ReadResult, SharedNet,
};
use plektron_net::CorsMode;
use rangemap::RangeSet;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::Sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::{Origin, Url};

use crate::{
    config::{Preload, SourceConfig},
    error::{InitError, ReadError, SourceResult},
    shared::Shared,
};

type InitReply = oneshot::Sender<Result<(), InitError>>;

#[derive(Debug)]
enum Command {
    Initialize(InitReply),
    Read { position: u64, size: usize },
    Stop,
    SetPreload(Preload),
    SetBitrate(u64),
    PlaybackRateChanged(f64),
    MediaIsPlaying,
    MediaIsPaused,
    BufferingHaveEnough,
}

/// Byte source over a single URL for a media demuxer.
///
/// Network URLs start with an open-ended probe from byte 0. A `200` reply
/// (or an unknown length) puts the source into streaming mode. Reads the
/// current loader cannot serve restart it at the read position, up to
/// `max_retries` times per read.
///
/// Dropping the handle unregisters the owner and shuts the actor down.
pub struct StreamingSource {
    url: Url,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    registration: Registration,
}

impl StreamingSource {
    /// Spawn the actor. Must be called inside a tokio runtime.
    pub fn new(config: SourceConfig, net: SharedNet, guard: SharedGuard) -> Self {
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
        let actor = StreamingActor::new(
            config,
            net,
            Arc::clone(registration.guard()),
            registration.id(),
            Arc::clone(&shared),
            cancel.clone(),
            commands_rx,
        );
        tokio::spawn(actor.run());
        debug!(owner = %registration.id(), %url, "streaming source created");

        Self {
            url,
            commands,
            shared,
            cancel,
            registration,
        }
    }

    /// Issue the initial request and wait for its headers.
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

    /// Read up to `size` bytes at `position`.
    ///
    /// An empty buffer means end of stream. Only one read may be pending.
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

    /// Fail any pending read and tear the loader down.
    pub fn stop(&self) {
        if self.shared.signal_stop() {
            debug!(owner = %self.registration.id(), "stop signalled");
            let _ = self.commands.send(Command::Stop);
        }
    }

    pub fn abort(&self) {
        self.stop();
    }

    /// Applies to loaders created from now on.
    pub fn set_preload(&self, preload: Preload) {
        self.send(Command::SetPreload(preload));
    }

    pub fn set_bitrate(&self, bitrate: u64) {
        self.send(Command::SetBitrate(bitrate));
    }

    pub fn playback_rate_changed(&self, playback_rate: f64) {
        self.send(Command::PlaybackRateChanged(playback_rate));
    }

    pub fn media_is_playing(&self) {
        self.send(Command::MediaIsPlaying);
    }

    pub fn media_is_paused(&self) {
        self.send(Command::MediaIsPaused);
    }

    /// The demuxer has buffered enough to start playback.
    pub fn on_buffering_have_enough(&self) {
        self.send(Command::BufferingHaveEnough);
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.shared.total_bytes()
    }

    /// Whether seeking requires restarting from the current position only.
    pub fn is_streaming(&self) -> bool {
        self.shared.is_streaming()
    }

    pub fn has_single_origin(&self) -> bool {
        self.shared.has_single_origin()
    }

    /// Union of every range reported buffered so far.
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

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            trace!(owner = %self.registration.id(), "command after actor exit");
        }
    }
}

impl Drop for StreamingSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone, Copy, Debug)]
struct ReadOp {
    position: u64,
    size: usize,
    retries: u32,
}

struct StreamingActor {
    url: Url,
    cors_mode: CorsMode,
    preload: Preload,
    max_retries: u32,
    retry_delay: Duration,
    bitrate: u64,
    playback_rate: f64,
    options: LoaderOptions,

    net: SharedNet,
    guard: SharedGuard,
    owner: OwnerId,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedReceiver<Command>,

    loader: Option<RangeLoader>,
    init: Option<InitReply>,
    read: Option<ReadOp>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    assume_fully_buffered: bool,
    media_has_played: bool,
    pinned_origin: Option<Origin>,
}

impl StreamingActor {
    fn new(
        config: SourceConfig,
        net: SharedNet,
        guard: SharedGuard,
        owner: OwnerId,
        shared: Arc<Shared>,
        cancel: CancellationToken,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            url: config.url,
            cors_mode: config.cors_mode,
            preload: config.preload,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            bitrate: config.bitrate,
            playback_rate: config.playback_rate,
            options: config.loader,
            net,
            guard,
            owner,
            shared,
            cancel,
            commands,
            loader: None,
            init: None,
            read: None,
            retry_timer: None,
            assume_fully_buffered: false,
            media_has_played: false,
            pinned_origin: None,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                () = retry_elapsed(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.guarded(Self::reissue);
                }
                notice = next_notice(&mut self.loader) => {
                    self.guarded(|actor| actor.on_notice(notice));
                }
            }
        }

        if let Some(loader) = self.loader.as_mut() {
            loader.stop();
        }
        debug!(owner = %self.owner, "streaming actor exited");
    }

    /// Run a continuation only while the owner is registered.
    fn guarded(&mut self, f: impl FnOnce(&mut Self)) {
        let guard = Arc::clone(&self.guard);
        let owner = self.owner;
        Guarded::new(guard, owner, || f(self)).run();
    }

    /// Returns `false` when the actor should exit.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Initialize(reply) => self.initialize(reply),
            Command::Read { position, size } => self.begin_read(position, size),
            Command::Stop => {
                self.read = None;
                self.retry_timer = None;
                return false;
            }
            Command::SetPreload(preload) => self.preload = preload,
            Command::SetBitrate(bitrate) => {
                self.bitrate = bitrate;
                if let Some(loader) = self.loader.as_mut() {
                    loader.set_bitrate(bitrate);
                }
            }
            Command::PlaybackRateChanged(rate) => self.playback_rate_changed(rate),
            Command::MediaIsPlaying => {
                self.media_has_played = true;
                self.update_defer_strategy(false);
            }
            Command::MediaIsPaused => self.update_defer_strategy(true),
            Command::BufferingHaveEnough => self.on_buffering_have_enough(),
        }
        true
    }

    fn initialize(&mut self, reply: InitReply) {
        if self.loader.is_some() {
            let _ = reply.send(Err(InitError::AlreadyInitialized));
            return;
        }

        let network = matches!(self.url.scheme(), "http" | "https");
        let mut loader = if network {
            self.create_loader(Some(0))
        } else {
            // No headers to learn the length from; fetch the whole resource.
            self.assume_fully_buffered = true;
            self.create_loader(None)
        };
        info!(owner = %self.owner, url = %self.url, network, "initializing source");
        loader.start();
        self.loader = Some(loader);
        self.init = Some(reply);
    }

    fn create_loader(&self, first_byte: Option<u64>) -> RangeLoader {
        let strategy = if self.preload == Preload::Metadata {
            DeferStrategy::ReadThenDefer
        } else {
            DeferStrategy::CapacityDefer
        };
        let params = LoaderParams::new(self.url.clone())
            .with_range(first_byte, None)
            .with_cors_mode(self.cors_mode)
            .with_strategy(strategy)
            .with_bitrate(self.bitrate)
            .with_playback_rate(self.playback_rate)
            .with_expected_origin(self.pinned_origin.clone());
        RangeLoader::new(
            Arc::clone(&self.net),
            params,
            self.options.clone(),
            &self.cancel,
        )
    }

    fn on_notice(&mut self, notice: LoaderNotice) {
        match notice {
            LoaderNotice::Started(status) if self.init.is_some() => self.on_initial_start(status),
            LoaderNotice::Started(status) => self.on_restart(status),
            LoaderNotice::ReadDone(result) => self.on_read_done(result),
            LoaderNotice::LoadingState(state) => self.on_loading_state(state),
            LoaderNotice::Progress(end) => self.on_progress(end),
        }
    }

    fn on_initial_start(&mut self, status: LoadStatus) {
        let Some(reply) = self.init.take() else {
            return;
        };
        let Some(loader) = self.loader.as_mut() else {
            return;
        };

        let total = loader.instance_size();
        let result = if !status.is_ok() {
            Err(InitError::Failed(failure_reason(loader, status)))
        } else if self.assume_fully_buffered && total.is_none() {
            Err(InitError::UnknownSize)
        } else {
            Ok(())
        };

        match &result {
            Ok(()) => {
                let streaming =
                    !self.assume_fully_buffered && (total.is_none() || !loader.range_supported());
                self.pinned_origin = loader.response_origin().cloned();
                self.shared.set_streaming(streaming);
                self.shared.set_single_origin(loader.has_single_origin());
                info!(
                    owner = %self.owner,
                    total_bytes = ?total,
                    streaming,
                    range_supported = loader.range_supported(),
                    "source initialized"
                );
            }
            Err(e) => {
                warn!(owner = %self.owner, error = %e, "source initialization failed");
                loader.stop();
            }
        }

        if self.shared.is_stopped() {
            return;
        }
        if result.is_ok()
            && let Some(total) = total
        {
            self.shared.set_total_bytes(total);
            if self.assume_fully_buffered {
                self.shared.add_buffered(0, total);
            }
        }
        let _ = reply.send(result);
    }

    /// Answer to the start of a loader created for a pending read.
    fn on_restart(&mut self, status: LoadStatus) {
        if self.read.is_none() {
            return;
        }
        if status.is_ok() {
            if let Some(loader) = self.loader.as_ref() {
                self.shared.set_single_origin(loader.has_single_origin());
            }
            self.read_internal();
        } else {
            self.recover(status);
        }
    }

    fn begin_read(&mut self, position: u64, size: usize) {
        if self.shared.is_stopped() {
            return;
        }
        if self.loader.is_none() {
            self.shared.complete_read(Err(ReadError::Failed {
                position,
                reason: "source is not initialized".to_owned(),
            }));
            return;
        }
        trace!(position, size, "read");
        self.read = Some(ReadOp {
            position,
            size,
            retries: 0,
        });
        self.read_internal();
    }

    fn read_internal(&mut self) {
        let Some(op) = self.read else {
            return;
        };
        if self.shared.is_stopped() {
            return;
        }
        let Some(loader) = self.loader.as_mut() else {
            return;
        };
        match loader.read(op.position, op.size) {
            ReadOutcome::Complete(result) => self.on_read_done(result),
            ReadOutcome::Pending => {}
        }
    }

    fn on_read_done(&mut self, result: ReadResult) {
        let Some(op) = self.read else {
            return;
        };
        if self.shared.is_stopped() {
            return;
        }
        if !result.status.is_ok() {
            self.recover(result.status);
            return;
        }

        if result.data.is_empty()
            && self.shared.total_bytes().is_none()
            && let Some(loader) = self.loader.as_ref()
            && let Some(total) = loader.instance_size()
        {
            // End of a resource whose length was unknown until now.
            self.shared.set_total_bytes(total);
            self.shared
                .add_buffered(loader.first_byte_position().unwrap_or(0), total);
        }

        trace!(position = op.position, len = result.data.len(), "read complete");
        self.read = None;
        self.shared.complete_read(Ok(result.data));
    }

    /// Restart the loader at the pending read, or fail the read when its
    /// retries are used up.
    fn recover(&mut self, status: LoadStatus) {
        let Some(mut op) = self.read else {
            return;
        };
        let reason = self
            .loader
            .as_ref()
            .map_or_else(|| status_reason(status), |l| failure_reason(l, status));
        if let Some(loader) = self.loader.as_mut() {
            loader.stop();
        }

        if op.retries >= self.max_retries {
            warn!(
                owner = %self.owner,
                position = op.position,
                retries = op.retries,
                %reason,
                "read failed"
            );
            self.read = None;
            self.shared.publish(SourceEvent::ReadFailed {
                position: op.position,
                error: reason.clone(),
            });
            let error = if op.retries == 0 {
                ReadError::Failed {
                    position: op.position,
                    reason,
                }
            } else {
                ReadError::RetriesExhausted {
                    position: op.position,
                    retries: op.retries,
                }
            };
            self.shared.complete_read(Err(error));
            return;
        }

        op.retries += 1;
        self.read = Some(op);
        self.shared.publish(SourceEvent::Retrying {
            position: op.position,
            attempt: op.retries,
        });

        if status == LoadStatus::Failed && !self.retry_delay.is_zero() {
            debug!(
                position = op.position,
                attempt = op.retries,
                delay_ms = self.retry_delay.as_millis(),
                %reason,
                "transfer failed, retrying after delay"
            );
            self.retry_timer = Some(Box::pin(tokio::time::sleep(self.retry_delay)));
        } else {
            debug!(position = op.position, attempt = op.retries, %reason, "restarting loader");
            self.reissue();
        }
    }

    /// Replace the loader with one starting at the pending read.
    fn reissue(&mut self) {
        let Some(op) = self.read else {
            return;
        };
        if self.shared.is_stopped() {
            return;
        }
        let mut loader = self.create_loader(Some(op.position));
        loader.start();
        self.loader = Some(loader);
    }

    fn on_loading_state(&mut self, state: LoadingState) {
        if self.assume_fully_buffered {
            return;
        }
        self.shared.publish(SourceEvent::LoadingState(state));
        // Failures surface through reads, not the downloading signal.
        let downloading = match state {
            LoadingState::Loading => true,
            LoadingState::Deferred | LoadingState::Finished => false,
            LoadingState::Failed => return,
        };
        self.shared.publish(SourceEvent::Downloading(downloading));
    }

    fn on_progress(&mut self, end: u64) {
        if self.assume_fully_buffered {
            return;
        }
        let start = self
            .loader
            .as_ref()
            .and_then(RangeLoader::first_byte_position)
            .unwrap_or(0);
        self.shared.add_buffered(start, end);
    }

    fn playback_rate_changed(&mut self, rate: f64) {
        if rate != 0.0 {
            self.media_has_played = true;
        }
        self.playback_rate = rate;
        if let Some(loader) = self.loader.as_mut() {
            loader.set_playback_rate(rate);
        }
        self.update_defer_strategy(rate == 0.0);
    }

    fn update_defer_strategy(&mut self, paused: bool) {
        let assume_fully_buffered = self.assume_fully_buffered;
        let media_has_played = self.media_has_played;
        let Some(loader) = self.loader.as_mut() else {
            return;
        };
        // Idle and seekable: take as much as the server gives.
        let strategy =
            if !assume_fully_buffered && media_has_played && paused && loader.range_supported() {
                DeferStrategy::NeverDefer
            } else {
                DeferStrategy::CapacityDefer
            };
        loader.update_defer_strategy(strategy);
    }

    fn on_buffering_have_enough(&mut self) {
        if self.preload != Preload::Metadata || self.media_has_played || self.shared.is_streaming()
        {
            return;
        }
        if let Some(loader) = self.loader.as_mut() {
            debug!(owner = %self.owner, "metadata loaded, releasing connection on deferral");
            loader.cancel_upon_deferral();
        }
    }
}

async fn next_notice(loader: &mut Option<RangeLoader>) -> LoaderNotice {
    match loader {
        Some(loader) => loader.next_notice().await,
        None => pending().await,
    }
}

async fn retry_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

fn failure_reason(loader: &RangeLoader, status: LoadStatus) -> String {
    loader
        .error()
        .map_or_else(|| status_reason(status), ToString::to_string)
}

fn status_reason(status: LoadStatus) -> String {
    match status {
        LoadStatus::Ok => "ok",
        LoadStatus::CacheMiss => "requested bytes are not buffered",
        LoadStatus::Failed => "transfer failed",
    }
    .to_owned()
}
