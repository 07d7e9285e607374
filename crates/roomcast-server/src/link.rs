//! `WebSocket` transport as seen by the hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use roomcast_core::{ReadyState, Transport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CONNECTING: u8 = 0;
const READY: u8 = 1;
const CLOSED: u8 = 2;

/// Outbound half of one socket.
///
/// `send` enqueues onto the socket's writer channel and never blocks. The
/// link reports `Connecting` until its writer task starts, `Ready` while the
/// writer runs, and `Closed` afterwards or once terminated.
#[derive(Debug)]
pub struct WsLink {
    state: AtomicU8,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    dropped: AtomicU64,
}

impl WsLink {
    /// New link with an outbound queue of `capacity` frames.
    pub fn new(capacity: usize, cancel: CancellationToken) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let link = Arc::new(Self {
            state: AtomicU8::new(CONNECTING),
            tx,
            cancel,
            dropped: AtomicU64::new(0),
        });
        (link, rx)
    }

    /// Writer task is running. No effect once closed.
    pub fn mark_ready(&self) {
        let _ = self
            .state
            .compare_exchange(CONNECTING, READY, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Writer task has stopped.
    pub fn mark_closed(&self) {
        self.state.store(CLOSED, Ordering::Release);
    }

    /// Cancelled by [`Transport::terminate`] or server shutdown.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Frames refused because the queue was full or gone.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Transport for WsLink {
    fn ready_state(&self) -> ReadyState {
        if self.cancel.is_cancelled() {
            return ReadyState::Closed;
        }
        match self.state.load(Ordering::Acquire) {
            CONNECTING => ReadyState::Connecting,
            READY => ReadyState::Ready,
            _ => ReadyState::Closed,
        }
    }

    fn send(&self, text: &str) -> bool {
        if self.ready_state() != ReadyState::Ready {
            return false;
        }
        if self.tx.try_send(text.to_string()).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::metrics::WS_SEND_DROPS_TOTAL).increment(1);
            false
        }
    }

    fn terminate(&self) {
        self.cancel.cancel();
    }
}
