//! `/health` endpoint.

use std::time::Instant;

use roomcast_core::HubStats;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"draining"` once shutdown started.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Admitted connections.
    pub connections: usize,
    /// Open groups and rooms.
    pub groups: usize,
    /// Frames waiting for a connecting transport.
    pub pending_deliveries: usize,
}

/// Build a health response from the latest hub counters.
pub fn health_check(start_time: Instant, stats: HubStats, draining: bool) -> HealthResponse {
    HealthResponse {
        status: if draining { "draining" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connections,
        groups: stats.groups,
        pending_deliveries: stats.pending_deliveries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), HubStats::default(), false);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn draining_status() {
        let resp = health_check(Instant::now(), HubStats::default(), true);
        assert_eq!(resp.status, "draining");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, HubStats::default(), false);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let stats = HubStats {
            connections: 2,
            groups: 3,
            pending_deliveries: 1,
        };
        let json = serde_json::to_value(health_check(Instant::now(), stats, false)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 2);
        assert_eq!(json["groups"], 3);
        assert_eq!(json["pending_deliveries"], 1);
        assert!(json["uptime_secs"].is_number());
    }
}
