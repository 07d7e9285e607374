//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::MetricsError;

/// Install the Prometheus metrics recorder (global).
///
/// Call once at startup, before anything is recorded. A second install
/// fails.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names shared by the gateway and the hub.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Frames refused by a full outbound queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Connections admitted by validation (counter).
pub const HUB_ACCEPTED_TOTAL: &str = "hub_accepted_total";
/// Connections rejected by validation (counter).
pub const HUB_REJECTED_TOTAL: &str = "hub_rejected_total";
/// Deferred frames dropped after the retry cap (counter).
pub const HUB_DELIVERIES_DROPPED_TOTAL: &str = "hub_deliveries_dropped_total";
/// Admitted sessions (gauge).
pub const HUB_SESSIONS: &str = "hub_sessions";
