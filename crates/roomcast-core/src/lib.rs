//! # roomcast-core
//!
//! Connection registry and broadcast routing, independent of any concrete
//! transport.
//!
//! - **Connections**: [`ConnectionHandle`] wraps a [`Transport`] and derives
//!   a stable [`Uid`] from handshake metadata
//! - **Tree**: arena-backed groups and rooms ([`Tree`], [`NodeId`]) with
//!   members and membership listeners
//! - **Registry**: one [`Session`] per admitted connection
//! - **Validation**: whitelist, shared key, then a pluggable
//!   [`CustomValidator`] or the configured fallback
//! - **Routing**: [`Router`] delivers frames, retrying while a connection is
//!   still connecting
//! - **Dispatch**: closed set of [`Command`]s decoded from client payloads
//! - **Hub**: the service object owning all of the above; every mutation
//!   goes through `&mut Hub`, so callers drive it from a single task

#![deny(unsafe_code)]

pub mod commands;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod hub;
pub mod logging;
pub mod registry;
pub mod router;
pub mod tree;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use commands::{Command, CommandKind, ListenTarget, Request};
pub use connection::{ConnectionHandle, ConnectionMeta, ReadyState, Transport, Uid};
pub use errors::DispatchError;
pub use events::{HubEvent, MembershipKind};
pub use hub::{Ack, Hub, HubBuilder, HubStats, Target};
pub use registry::{Registry, Session};
pub use router::{Delivery, Frame, Router};
pub use tree::{Node, NodeId, Subscription, Tree};
pub use validator::{AcceptReason, CustomValidator, Validator, Verdict};
