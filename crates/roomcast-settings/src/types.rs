//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial: missing fields get their default value during
//! deserialization.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the hub.
///
/// ```json
/// {
///   "auth": { "environment": "production", "whitelist": { "production": ["app.example.com"] } },
///   "topology": { "groups": [{ "path": "lobby", "limit": 10 }] }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Network listener settings.
    pub server: ServerSettings,
    /// First-contact validation settings.
    pub auth: AuthSettings,
    /// Keep-alive sweep settings.
    pub liveness: LivenessSettings,
    /// Outbound delivery retry policy.
    pub delivery: DeliverySettings,
    /// Acknowledgment message text.
    pub messages: MessageSettings,
    /// Groups and rooms opened at startup.
    pub topology: TopologySettings,
}

impl HubSettings {
    /// Check values that deserialize fine but make no sense at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.liveness.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "liveness.intervalMs must be greater than zero".into(),
            ));
        }
        if self.delivery.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "delivery.maxAttempts must be greater than zero".into(),
            ));
        }
        if self.delivery.max_queued == 0 {
            return Err(SettingsError::InvalidValue(
                "delivery.maxQueued must be greater than zero".into(),
            ));
        }
        for spec in self.topology.groups.iter().chain(&self.topology.rooms) {
            if spec.path.trim().is_empty() {
                return Err(SettingsError::InvalidValue("empty topology path".into()));
            }
            if spec.limit == Some(0) {
                return Err(SettingsError::InvalidValue(format!(
                    "topology path '{}' has a limit of zero",
                    spec.path
                )));
            }
        }
        Ok(())
    }
}

/// Network listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Capacity of each connection's outbound queue.
    pub send_queue: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9400,
            send_queue: 256,
            max_message_size: 1024 * 1024,
        }
    }
}

/// What to do with a first-contact payload that neither the whitelist, the
/// shared key, nor a custom validator accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationFallback {
    /// Reject the connection.
    #[default]
    Reject,
    /// Accept the connection.
    Accept,
}

/// First-contact validation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Shared secret that, when present anywhere in the first payload,
    /// admits the connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,
    /// Current deployment environment label (e.g. `local`, `production`).
    pub environment: String,
    /// Allowed client origins per environment label.
    pub whitelist: HashMap<String, Vec<String>>,
    /// Verdict when nothing else decided.
    pub fallback: ValidationFallback,
}

impl AuthSettings {
    /// Whitelist entries for the current environment.
    pub fn allowed_hosts(&self) -> &[String] {
        self.whitelist
            .get(&self.environment)
            .map_or(&[], Vec::as_slice)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            external_key: None,
            environment: "local".to_string(),
            whitelist: HashMap::new(),
            fallback: ValidationFallback::Reject,
        }
    }
}

/// Keep-alive sweep settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    /// Sweep interval in milliseconds.
    pub interval_ms: u64,
    /// Raw text sent to every connection on each sweep.
    pub probe: String,
}

impl LivenessSettings {
    /// Sweep interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            interval_ms: 40_000,
            probe: "[KeepAlive]".to_string(),
        }
    }
}

/// Retry policy for deliveries to connections that are still connecting.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    /// Delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Attempts (including the first) before a connection's queued payloads
    /// are dropped.
    pub max_attempts: u32,
    /// Payloads queued per connection before new ones are dropped.
    pub max_queued: usize,
}

impl DeliverySettings {
    /// Retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            retry_delay_ms: 100,
            max_attempts: 50,
            max_queued: 256,
        }
    }
}

/// Acknowledgment message text.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageSettings {
    /// Sent with a successful connect acknowledgment.
    pub accept: String,
    /// Sent with a rejection before the connection is terminated.
    pub reject: String,
    /// Prefix of the message sent when a join hits a group limit.
    pub group_full: String,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            accept: "[Connection Established]".to_string(),
            reject: "[Connection Rejected] Invalid credentials.".to_string(),
            group_full: "[Connection Rejected] Reached limit".to_string(),
        }
    }
}

/// A group or room opened at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Hyphen- or slash-delimited path below the groups/rooms root.
    pub path: String,
    /// Maximum number of members, unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl NodeSpec {
    /// Unlimited node at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            limit: None,
        }
    }

    /// Node at `path` capped at `limit` members.
    pub fn limited(path: impl Into<String>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: Some(limit),
        }
    }
}

/// Groups and rooms opened at startup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopologySettings {
    /// Paths below the `groups` root.
    pub groups: Vec<NodeSpec>,
    /// Paths below the `rooms` root (first segment is the room).
    pub rooms: Vec<NodeSpec>,
}
