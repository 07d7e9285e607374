//! In-memory transport for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::connection::{ConnectionHandle, ConnectionMeta, ReadyState, Transport};

/// Records every frame it is given.
pub(crate) struct MockTransport {
    state: Mutex<ReadyState>,
    sent: Mutex<Vec<String>>,
    terminated: Mutex<bool>,
}

impl MockTransport {
    pub(crate) fn new(state: ReadyState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            sent: Mutex::new(Vec::new()),
            terminated: Mutex::new(false),
        })
    }

    /// Ready handle whose uid is `uid`.
    pub(crate) fn handle(uid: &str) -> (ConnectionHandle, Arc<Self>) {
        Self::handle_with(meta(uid), ReadyState::Ready)
    }

    pub(crate) fn handle_with(
        meta: ConnectionMeta,
        state: ReadyState,
    ) -> (ConnectionHandle, Arc<Self>) {
        let transport = Self::new(state);
        let handle = ConnectionHandle::new(meta, transport.clone());
        (handle, transport)
    }

    pub(crate) fn set_state(&self, state: ReadyState) {
        *self.state.lock() = state;
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Sent frames that parse as JSON.
    pub(crate) fn json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().clear();
    }

    pub(crate) fn is_terminated(&self) -> bool {
        *self.terminated.lock()
    }
}

impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }

    fn send(&self, text: &str) -> bool {
        if *self.state.lock() != ReadyState::Ready {
            return false;
        }
        self.sent.lock().push(text.to_string());
        true
    }

    fn terminate(&self) {
        *self.terminated.lock() = true;
        *self.state.lock() = ReadyState::Closed;
    }
}

/// Metadata carrying `uid` as the request id.
pub(crate) fn meta(uid: &str) -> ConnectionMeta {
    ConnectionMeta {
        request_id: Some(uid.to_string()),
        ..ConnectionMeta::default()
    }
}
