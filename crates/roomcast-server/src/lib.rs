//! # roomcast-server
//!
//! Axum HTTP + `WebSocket` gateway for the roomcast hub.
//!
//! - `GET /ws`: upgrade; each socket becomes a [`link::WsLink`] transport
//! - One reactor task owns the [`roomcast_core::Hub`] and serializes every
//!   connection event, liveness tick, and delivery retry
//! - `GET /health` and `GET /metrics` for operators
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod link;
pub mod metrics;
pub mod reactor;
pub mod server;
pub mod session;
pub mod shutdown;

pub use errors::{MetricsError, ServerError};
pub use reactor::{HubInput, Reactor};
pub use server::{RoomcastServer, ServerHandle};
