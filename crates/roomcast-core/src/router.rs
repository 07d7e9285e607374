//! Outbound delivery with bounded retry for connections still connecting.
//!
//! The router never sleeps. Frames for a connecting transport go into a
//! retry queue; the owner calls [`Router::poll`] when the deadline returned
//! by [`Router::next_deadline`] passes.
//!
//! Ordering per connection is preserved: once a connection has a queued
//! frame, later frames for it queue behind that one. The attempt cap is per
//! connection: when the oldest frame of a connection runs out of attempts,
//! every frame queued for that connection is dropped with it.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, warn};

use roomcast_settings::DeliverySettings;

use crate::connection::{ConnectionHandle, ReadyState};

const DEFAULT_MAX_QUEUED: usize = 256;

/// Outbound payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Sent as-is, unframed.
    Text(String),
    /// `{event, message}` envelope, or the bare event name when there is no
    /// message.
    Event {
        /// Event name.
        event: String,
        /// Event data.
        message: Option<Value>,
    },
    /// Arbitrary JSON document.
    Json(Value),
}

impl Frame {
    /// Raw text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Event frame carrying `message`.
    pub fn event(event: impl Into<String>, message: Value) -> Self {
        Self::Event {
            event: event.into(),
            message: Some(message),
        }
    }

    /// Event frame without data, sent as the bare event name.
    pub fn bare(event: impl Into<String>) -> Self {
        Self::Event {
            event: event.into(),
            message: None,
        }
    }

    /// Wire text of this frame.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Event {
                event,
                message: None,
            } => event.clone(),
            Self::Event {
                event,
                message: Some(message),
            } => json!({ "event": event, "message": message }).to_string(),
            Self::Json(value) => value.to_string(),
        }
    }
}

impl From<Value> for Frame {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Outcome of handing one frame to one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the transport.
    Sent,
    /// Queued for retry.
    Deferred,
    /// Discarded: the connection is closed or refused the frame.
    Dropped,
}

#[derive(Debug)]
struct Pending {
    handle: ConnectionHandle,
    text: String,
    attempts: u32,
    due: Instant,
}

/// Delivers frames and owns the retry queue.
#[derive(Debug)]
pub struct Router {
    retry_delay: Duration,
    max_attempts: u32,
    max_queued: usize,
    pending: VecDeque<Pending>,
}

impl Router {
    /// Router with the given retry policy.
    pub fn new(retry_delay: Duration, max_attempts: u32) -> Self {
        Self {
            retry_delay,
            max_attempts: max_attempts.max(1),
            max_queued: DEFAULT_MAX_QUEUED,
            pending: VecDeque::new(),
        }
    }

    /// Router configured from settings.
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self::new(settings.retry_delay(), settings.max_attempts).with_max_queued(settings.max_queued)
    }

    /// Cap on frames queued for one connection. Frames beyond it are dropped.
    #[must_use]
    pub fn with_max_queued(mut self, max_queued: usize) -> Self {
        self.max_queued = max_queued.max(1);
        self
    }

    /// Deliver one frame to one connection.
    pub fn deliver(&mut self, handle: &ConnectionHandle, frame: &Frame) -> Delivery {
        self.deliver_text(handle, frame.render())
    }

    /// Deliver pre-rendered text to one connection.
    pub fn deliver_text(&mut self, handle: &ConnectionHandle, text: String) -> Delivery {
        let queued = self.queued_for(handle);
        if queued >= self.max_queued {
            warn!(uid = %handle.uid(), queued, "retry queue full, dropping frame");
            metrics::counter!("hub_deliveries_dropped_total").increment(1);
            return Delivery::Dropped;
        }
        if queued > 0 {
            self.defer(handle, text, 0);
            return Delivery::Deferred;
        }
        match handle.ready_state() {
            ReadyState::Ready => {
                if handle.send(&text) {
                    Delivery::Sent
                } else {
                    debug!(uid = %handle.uid(), "transport refused frame");
                    Delivery::Dropped
                }
            }
            ReadyState::Connecting => {
                self.defer(handle, text, 1);
                Delivery::Deferred
            }
            ReadyState::Closed => Delivery::Dropped,
        }
    }

    /// Deliver one frame to every target, rendering it once.
    ///
    /// Returns the number of targets that were sent to or queued.
    pub fn emit(&mut self, targets: &[ConnectionHandle], frame: &Frame) -> usize {
        let text = frame.render();
        targets
            .iter()
            .filter(|handle| self.deliver_text(handle, text.clone()) != Delivery::Dropped)
            .count()
    }

    /// Retry every queued frame that is due at `now`.
    ///
    /// Frames for closed connections are dropped silently. When a
    /// connection's oldest frame reaches the attempt cap, it and everything
    /// queued behind it are dropped with a warning. Returns the next deadline.
    pub fn poll(&mut self, now: Instant) -> Option<Instant> {
        let mut blocked: Vec<ConnectionHandle> = Vec::new();
        let mut exhausted: Vec<ConnectionHandle> = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        let mut dropped = 0_u64;

        while let Some(mut entry) = self.pending.pop_front() {
            if exhausted.iter().any(|h| h.same_connection(&entry.handle)) {
                dropped += 1;
                continue;
            }
            if blocked.iter().any(|h| h.same_connection(&entry.handle)) {
                kept.push_back(entry);
                continue;
            }
            if entry.due > now {
                blocked.push(entry.handle.clone());
                kept.push_back(entry);
                continue;
            }
            match entry.handle.ready_state() {
                ReadyState::Ready => {
                    if !entry.handle.send(&entry.text) {
                        debug!(uid = %entry.handle.uid(), "transport refused queued frame");
                    }
                }
                ReadyState::Closed => {
                    debug!(uid = %entry.handle.uid(), "dropping frame for closed connection");
                }
                ReadyState::Connecting => {
                    entry.attempts += 1;
                    if entry.attempts >= self.max_attempts {
                        warn!(
                            uid = %entry.handle.uid(),
                            attempts = entry.attempts,
                            "connection never became ready, dropping its queued frames"
                        );
                        dropped += 1;
                        exhausted.push(entry.handle);
                        continue;
                    }
                    entry.due = now + self.retry_delay;
                    blocked.push(entry.handle.clone());
                    kept.push_back(entry);
                }
            }
        }

        if dropped > 0 {
            metrics::counter!("hub_deliveries_dropped_total").increment(dropped);
        }
        self.pending = kept;
        self.next_deadline()
    }

    /// Earliest time a queued frame is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|entry| entry.due).min()
    }

    /// Number of queued frames.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn queued_for(&self, handle: &ConnectionHandle) -> usize {
        self.pending
            .iter()
            .filter(|entry| entry.handle.same_connection(handle))
            .count()
    }

    fn defer(&mut self, handle: &ConnectionHandle, text: String, attempts: u32) {
        self.pending.push_back(Pending {
            handle: handle.clone(),
            text,
            attempts,
            due: Instant::now() + self.retry_delay,
        });
    }
}
