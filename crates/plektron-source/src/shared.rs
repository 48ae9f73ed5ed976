//! State shared between a facade handle and its actor.

use bytes::Bytes;
use parking_lot::Mutex;
use plektron_events::{EventBus, SourceEvent};
use rangemap::RangeSet;
use tokio::sync::oneshot;

use crate::error::ReadError;

pub(crate) type ReadReply = oneshot::Sender<Result<Bytes, ReadError>>;

struct State {
    stopped: bool,
    pending_read: Option<ReadReply>,
    total_bytes: Option<u64>,
    streaming: bool,
    single_origin: bool,
    buffered: RangeSet<u64>,
}

/// Stop flag, pending-read slot, and what the host has been told.
///
/// The lock is never held across a call that could take it again.
pub(crate) struct Shared {
    state: Mutex<State>,
    bus: EventBus,
}

impl Shared {
    pub(crate) fn new(bus: EventBus) -> Self {
        Self {
            state: Mutex::new(State {
                stopped: false,
                pending_read: None,
                total_bytes: None,
                streaming: false,
                single_origin: true,
                buffered: RangeSet::new(),
            }),
            bus,
        }
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Park `reply` as the pending read.
    pub(crate) fn begin_read(&self, reply: ReadReply) -> Result<(), ReadError> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(ReadError::Stopped);
        }
        if state.pending_read.is_some() {
            return Err(ReadError::ReadInProgress);
        }
        state.pending_read = Some(reply);
        Ok(())
    }

    /// Answer the pending read, if the stop path has not already.
    pub(crate) fn complete_read(&self, result: Result<Bytes, ReadError>) {
        let reply = self.state.lock().pending_read.take();
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    /// Raise the stop flag and fail the pending read.
    ///
    /// Returns `false` when the flag was already set.
    pub(crate) fn signal_stop(&self) -> bool {
        let reply = {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.stopped = true;
            state.pending_read.take()
        };
        if let Some(reply) = reply {
            let _ = reply.send(Err(ReadError::Stopped));
        }
        true
    }

    /// Record and announce the resource length. No-op once stopped.
    pub(crate) fn set_total_bytes(&self, total: u64) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.total_bytes = Some(total);
        }
        self.bus.publish(SourceEvent::TotalBytes(total));
    }

    /// Record and announce a buffered range. No-op once stopped.
    pub(crate) fn add_buffered(&self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.buffered.insert(start..end);
        }
        self.bus.publish(SourceEvent::BufferedRange { start, end });
    }

    pub(crate) fn set_streaming(&self, streaming: bool) {
        self.state.lock().streaming = streaming;
    }

    pub(crate) fn set_single_origin(&self, single_origin: bool) {
        self.state.lock().single_origin = single_origin;
    }

    pub(crate) fn publish(&self, event: SourceEvent) {
        self.bus.publish(event);
    }

    pub(crate) fn total_bytes(&self) -> Option<u64> {
        self.state.lock().total_bytes
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    pub(crate) fn has_single_origin(&self) -> bool {
        self.state.lock().single_origin
    }

    pub(crate) fn buffered(&self) -> RangeSet<u64> {
        self.state.lock().buffered.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Shared {
        Shared::new(EventBus::new(16))
    }

    #[tokio::test]
    async fn stop_fails_pending_read() {
        let shared = shared();
        let (tx, rx) = oneshot::channel();
        shared.begin_read(tx).unwrap();

        assert!(shared.signal_stop());
        assert_eq!(rx.await.unwrap(), Err(ReadError::Stopped));
        assert!(!shared.signal_stop());
    }

    #[test]
    fn second_read_is_rejected() {
        let shared = shared();
        let (tx, _rx) = oneshot::channel();
        shared.begin_read(tx).unwrap();
        let (tx, _rx2) = oneshot::channel();
        assert_eq!(shared.begin_read(tx), Err(ReadError::ReadInProgress));
    }

    #[test]
    fn read_after_stop_is_rejected() {
        let shared = shared();
        shared.signal_stop();
        let (tx, _rx) = oneshot::channel();
        assert_eq!(shared.begin_read(tx), Err(ReadError::Stopped));
    }

    #[test]
    fn buffered_ranges_merge() {
        let shared = shared();
        let mut events = shared.bus().subscribe();
        shared.add_buffered(0, 10);
        shared.add_buffered(10, 20);
        shared.add_buffered(30, 30);
        shared.add_buffered(40, 50);

        let ranges: Vec<_> = shared.buffered().iter().cloned().collect();
        assert_eq!(ranges, vec![0..20, 40..50]);
        assert_eq!(
            events.try_recv().unwrap(),
            SourceEvent::BufferedRange { start: 0, end: 10 }
        );
    }

    #[test]
    fn reports_are_muted_after_stop() {
        let shared = shared();
        let mut events = shared.bus().subscribe();
        shared.signal_stop();
        shared.set_total_bytes(100);
        shared.add_buffered(0, 100);

        assert!(events.try_recv().is_err());
        assert_eq!(shared.total_bytes(), None);
        assert!(shared.buffered().is_empty());
    }
}
