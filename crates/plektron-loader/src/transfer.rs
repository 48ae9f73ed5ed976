//! Background task driving one network transfer.
//!
//! The task only posts [`TransferEvent`]s; all state lives in the loader that
//! owns the receiving end. Dropping [`Transfer`] cancels the task.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use plektron_net::{Headers, Net, NetError, RangeSpec, Request};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

/// Transport shared by every loader of a source.
pub type SharedNet = Arc<dyn Net>;

/// Status line and headers of a response.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: u16,
    pub url: Url,
    pub headers: Headers,
    pub content_length: Option<u64>,
}

/// Output of a transfer task, in arrival order.
#[derive(Debug)]
pub enum TransferEvent {
    Headers(ResponseHead),
    Data(Bytes),
    Finished,
    Failed(NetError),
}

/// Handle to a running transfer task.
pub(crate) struct Transfer {
    cancel: CancellationToken,
    deferred: watch::Sender<bool>,
}

impl Transfer {
    pub(crate) fn spawn(
        net: SharedNet,
        request: Request,
        events: mpsc::Sender<TransferEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (deferred, deferred_rx) = watch::channel(false);
        tokio::spawn(run(net, request, events, deferred_rx, cancel.clone()));
        Self { cancel, deferred }
    }

    /// Pause or resume body consumption.
    pub(crate) fn set_deferred(&self, deferred: bool) {
        self.deferred.send_replace(deferred);
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A transfer whose events the caller consumes directly.
///
/// Used by owners that manage their own storage instead of a
/// [`RangeLoader`](crate::RangeLoader). Dropping it cancels the transfer.
pub struct RangeFetch {
    transfer: Transfer,
    events: mpsc::Receiver<TransferEvent>,
    range: Option<RangeSpec>,
}

impl RangeFetch {
    pub fn start(net: SharedNet, request: Request, parent: &CancellationToken) -> Self {
        let (tx, events) = mpsc::channel(FETCH_CHANNEL_CAPACITY);
        let range = request.range.clone();
        let transfer = Transfer::spawn(net, request, tx, parent);
        Self {
            transfer,
            events,
            range,
        }
    }

    /// Range the request asked for.
    pub fn range(&self) -> Option<&RangeSpec> {
        self.range.as_ref()
    }

    /// Next event; `None` once the task has exited.
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    pub fn set_deferred(&self, deferred: bool) {
        self.transfer.set_deferred(deferred);
    }
}

const FETCH_CHANNEL_CAPACITY: usize = 8;

async fn run(
    net: SharedNet,
    request: Request,
    events: mpsc::Sender<TransferEvent>,
    mut deferred: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let url = request.url.clone();
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(%url, "transfer cancelled before response");
            return;
        }
        opened = net.open(request) => opened,
    };

    let response = match opened {
        Ok(response) => response,
        Err(e) => {
            let _ = send(&events, TransferEvent::Failed(e), &cancel).await;
            return;
        }
    };

    let head = ResponseHead {
        content_length: response.content_length(),
        status: response.status,
        url: response.url,
        headers: response.headers,
    };
    if !send(&events, TransferEvent::Headers(head), &cancel).await {
        return;
    }

    let mut body = response.body;
    loop {
        // Backpressure: hold the body while the loader defers.
        loop {
            let paused = *deferred.borrow_and_update();
            if !paused {
                break;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = deferred.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(%url, "transfer cancelled");
                return;
            }
            next = body.next() => next,
        };

        let event = match next {
            Some(Ok(chunk)) => {
                trace!(%url, len = chunk.len(), "transfer chunk");
                TransferEvent::Data(chunk)
            }
            Some(Err(e)) => TransferEvent::Failed(e),
            None => TransferEvent::Finished,
        };
        let terminal = !matches!(event, TransferEvent::Data(_));
        if !send(&events, event, &cancel).await || terminal {
            return;
        }
    }
}

/// Post `event`; `false` when cancelled or the loader is gone.
async fn send(
    events: &mpsc::Sender<TransferEvent>,
    event: TransferEvent,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}
