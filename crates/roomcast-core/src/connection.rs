//! Connection handles and the transport seam.
//!
//! The hub never touches sockets. A transport adapter implements
//! [`Transport`] for each live connection and wraps it in a
//! [`ConnectionHandle`] together with the handshake metadata.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of an admitted connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Wrap an existing identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh identifier for connections that carried no usable header.
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Transport-reported connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    /// Opened but not yet able to carry frames.
    Connecting,
    /// Frames can be sent.
    Ready,
    /// Closed or closing; nothing more will be delivered.
    Closed,
}

/// Outbound side of one transport connection.
///
/// Implementations must not block: `send` enqueues and returns.
pub trait Transport: Send + Sync {
    /// Current state of the connection.
    fn ready_state(&self) -> ReadyState;

    /// Enqueue a text frame. Returns `false` when the frame was not accepted.
    fn send(&self, text: &str) -> bool;

    /// Close the connection. Frames already accepted by `send` are flushed
    /// first when the transport can.
    fn terminate(&self);
}

/// Handshake metadata captured when the transport opened the connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionMeta {
    /// `x-request-id` header.
    pub request_id: Option<String>,
    /// `sec-websocket-key` header.
    pub socket_key: Option<String>,
    /// `host` header.
    pub host: Option<String>,
    /// `origin` header.
    pub origin: Option<String>,
    /// `user-agent` header.
    pub user_agent: Option<String>,
    /// Originating address: `x-forwarded-for` when present, else the peer.
    pub address: Option<String>,
}

impl ConnectionMeta {
    /// Build metadata from header name/value pairs and the peer address.
    ///
    /// Header names are matched case-insensitively. Empty values are ignored.
    pub fn from_headers<'a, I>(headers: I, peer: Option<SocketAddr>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut meta = Self {
            address: peer.map(|addr| addr.ip().to_string()),
            ..Self::default()
        };
        for (name, value) in headers {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match name.to_ascii_lowercase().as_str() {
                "x-request-id" => &mut meta.request_id,
                "sec-websocket-key" => &mut meta.socket_key,
                "host" => &mut meta.host,
                "origin" => &mut meta.origin,
                "user-agent" => &mut meta.user_agent,
                "x-forwarded-for" => {
                    let first = value.split(',').next().unwrap_or(value).trim();
                    meta.address = Some(first.to_string());
                    continue;
                }
                _ => continue,
            };
            *slot = Some(value.to_string());
        }
        meta
    }

    /// Derive the connection's uid: request id, then socket key, then a
    /// generated one.
    pub fn derive_uid(&self) -> Uid {
        self.request_id
            .as_deref()
            .or(self.socket_key.as_deref())
            .map_or_else(Uid::generate, Uid::new)
    }
}

struct HandleInner {
    uid: Uid,
    meta: ConnectionMeta,
    transport: Arc<dyn Transport>,
}

/// Cheaply clonable handle to one transport connection.
///
/// Clones refer to the same connection; two handles built from different
/// transports are different connections even if their uids collide.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    /// Wrap a transport, deriving the uid from `meta`.
    pub fn new(meta: ConnectionMeta, transport: Arc<dyn Transport>) -> Self {
        let uid = meta.derive_uid();
        Self {
            inner: Arc::new(HandleInner {
                uid,
                meta,
                transport,
            }),
        }
    }

    /// The connection's uid.
    pub fn uid(&self) -> &Uid {
        &self.inner.uid
    }

    /// Handshake metadata.
    pub fn meta(&self) -> &ConnectionMeta {
        &self.inner.meta
    }

    /// Transport state.
    pub fn ready_state(&self) -> ReadyState {
        self.inner.transport.ready_state()
    }

    /// Send a text frame straight to the transport, bypassing retries.
    pub fn send(&self, text: &str) -> bool {
        self.inner.transport.send(text)
    }

    /// Close the underlying connection.
    pub fn terminate(&self) {
        self.inner.transport.terminate();
    }

    /// Whether both handles wrap the same transport connection.
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("uid", &self.inner.uid)
            .field("state", &self.ready_state())
            .finish_non_exhaustive()
    }
}
