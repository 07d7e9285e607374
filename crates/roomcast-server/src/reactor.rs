//! The single task that owns the hub.
//!
//! Socket tasks never touch the hub directly. They push [`HubInput`]s onto
//! one channel; the reactor applies them in arrival order, runs the liveness
//! sweep and retries deferred deliveries. Hub state therefore needs no lock.

use std::time::Duration;

use roomcast_core::{ConnectionHandle, Hub, HubStats};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Capacity of the input channel shared by all sockets.
const INPUT_CAPACITY: usize = 1024;

/// Connection event forwarded from a socket task.
#[derive(Debug)]
pub enum HubInput {
    /// Socket upgraded.
    Opened(ConnectionHandle),
    /// Text frame received.
    Message(ConnectionHandle, String),
    /// Socket closed.
    Closed(ConnectionHandle),
}

/// Event loop around a [`Hub`].
pub struct Reactor {
    hub: Hub,
    inputs: mpsc::Receiver<HubInput>,
    stats: watch::Sender<HubStats>,
    keepalive: Duration,
    shutdown: CancellationToken,
}

impl Reactor {
    /// Wrap `hub`. Returns the reactor, the input sender for sockets, and a
    /// receiver of the stats published after every event.
    pub fn new(
        hub: Hub,
        keepalive: Duration,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Sender<HubInput>, watch::Receiver<HubStats>) {
        let (tx, inputs) = mpsc::channel(INPUT_CAPACITY);
        let (stats, stats_rx) = watch::channel(hub.stats());
        let reactor = Self {
            hub,
            inputs,
            stats,
            keepalive,
            shutdown,
        };
        (reactor, tx, stats_rx)
    }

    /// Run until shutdown or until every input sender is gone, then close
    /// all remaining connections.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.keepalive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        info!(keepalive_ms = self.keepalive.as_millis(), "hub reactor started");
        loop {
            let retry_at = self.hub.next_retry();
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                input = self.inputs.recv() => match input {
                    Some(input) => self.apply(input),
                    None => break,
                },
                _ = ticker.tick() => {
                    let _ = self.hub.sweep();
                }
                () = sleep_until(retry_at) => {
                    let _ = self.hub.poll_retries(Instant::now());
                }
            }
            self.publish();
        }

        self.hub.terminate_all();
        self.publish();
        info!("hub reactor stopped");
    }

    fn apply(&mut self, input: HubInput) {
        match input {
            HubInput::Opened(handle) => self.hub.on_open(&handle),
            HubInput::Message(handle, text) => self.hub.on_message(&handle, &text),
            HubInput::Closed(handle) => self.hub.on_close(&handle),
        }
    }

    fn publish(&self) {
        let stats = self.hub.stats();
        #[allow(clippy::cast_precision_loss)]
        let sessions = stats.connections as f64;
        metrics::gauge!(crate::metrics::HUB_SESSIONS).set(sessions);
        let changed = self.stats.send_if_modified(|current| {
            if *current == stats {
                return false;
            }
            *current = stats;
            true
        });
        if changed {
            debug!(?stats, "hub stats updated");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use roomcast_core::{ConnectionMeta, ReadyState, Transport};
    use roomcast_settings::{HubSettings, NodeSpec, ValidationFallback};

    #[derive(Default)]
    struct Recorder {
        state: Mutex<Option<ReadyState>>,
        sent: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn set(&self, state: ReadyState) {
            *self.state.lock() = Some(state);
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    impl Transport for Recorder {
        fn ready_state(&self) -> ReadyState {
            self.state.lock().unwrap_or(ReadyState::Ready)
        }

        fn send(&self, text: &str) -> bool {
            if self.ready_state() != ReadyState::Ready {
                return false;
            }
            self.sent.lock().push(text.to_string());
            true
        }

        fn terminate(&self) {
            self.set(ReadyState::Closed);
        }
    }

    fn handle(uid: &str) -> (ConnectionHandle, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let meta = ConnectionMeta {
            request_id: Some(uid.to_string()),
            ..ConnectionMeta::default()
        };
        (ConnectionHandle::new(meta, recorder.clone()), recorder)
    }

    fn hub() -> Hub {
        let mut settings = HubSettings::default();
        settings.auth.fallback = ValidationFallback::Accept;
        settings.topology.groups = vec![NodeSpec::new("lobby")];
        Hub::new(&settings)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn applies_inputs_and_publishes_stats() {
        let token = CancellationToken::new();
        let (reactor, tx, mut stats) = Reactor::new(hub(), Duration::from_secs(40), token.clone());
        let task = tokio::spawn(reactor.run());

        let (h, rec) = handle("u1");
        tx.send(HubInput::Opened(h.clone())).await.unwrap();
        tx.send(HubInput::Message(h.clone(), r#"{"request":"join:lobby"}"#.into()))
            .await
            .unwrap();
        stats.changed().await.unwrap();
        assert_eq!(stats.borrow().connections, 1);
        settle().await;
        assert_eq!(rec.sent().len(), 2);

        tx.send(HubInput::Closed(h)).await.unwrap();
        stats.changed().await.unwrap();
        assert_eq!(stats.borrow().connections, 0);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_ticks() {
        let token = CancellationToken::new();
        let (reactor, tx, _stats) = Reactor::new(hub(), Duration::from_millis(500), token.clone());
        let task = tokio::spawn(reactor.run());

        let (h, rec) = handle("u1");
        tx.send(HubInput::Message(h, r#"{"request":"get:uid"}"#.into()))
            .await
            .unwrap();
        settle().await;
        let before = rec.sent().len();

        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;
        let sent = rec.sent();
        assert_eq!(sent.len(), before + 1);
        assert_eq!(sent.last().map(String::as_str), Some("[KeepAlive]"));

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retries_deferred_deliveries() {
        let token = CancellationToken::new();
        let (reactor, tx, _stats) = Reactor::new(hub(), Duration::from_secs(40), token.clone());
        let task = tokio::spawn(reactor.run());

        let (a, rec_a) = handle("a");
        let (b, _) = handle("b");
        for (h, raw) in [(&a, r#"{"request":"join:lobby"}"#), (&b, r#"{"request":"join:lobby"}"#)] {
            tx.send(HubInput::Message(h.clone(), raw.into())).await.unwrap();
        }
        settle().await;
        rec_a.set(ReadyState::Connecting);
        let before = rec_a.sent().len();

        tx.send(HubInput::Message(b, r#"{"request":"emit","n":1}"#.into()))
            .await
            .unwrap();
        settle().await;
        assert_eq!(rec_a.sent().len(), before);

        rec_a.set(ReadyState::Ready);
        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        let sent = rec_a.sent();
        assert_eq!(sent.len(), before + 1);
        let last: serde_json::Value = serde_json::from_str(sent.last().unwrap()).unwrap();
        assert_eq!(last["from"], "b");

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_terminates_connections() {
        let token = CancellationToken::new();
        let (reactor, tx, stats) = Reactor::new(hub(), Duration::from_secs(40), token.clone());
        let task = tokio::spawn(reactor.run());

        let (h, rec) = handle("u1");
        tx.send(HubInput::Message(h, r#"{"request":"get:uid"}"#.into()))
            .await
            .unwrap();
        settle().await;

        token.cancel();
        task.await.unwrap();
        assert_eq!(rec.ready_state(), ReadyState::Closed);
        assert_eq!(stats.borrow().connections, 0);
    }

    #[tokio::test]
    async fn stops_when_senders_dropped() {
        let (reactor, tx, _stats) =
            Reactor::new(hub(), Duration::from_secs(40), CancellationToken::new());
        drop(tx);
        reactor.run().await;
    }
}
