//! Typed hub events.
//!
//! The hub publishes these on a `tokio::sync::broadcast` channel. Observers
//! subscribe with [`Hub::subscribe`](crate::Hub::subscribe); a lagging
//! observer misses events but never blocks the hub.

use serde::Serialize;
use serde_json::Value;

use crate::connection::Uid;

/// Direction of a membership change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipKind {
    /// A member joined.
    Added,
    /// A member left or disconnected.
    Removed,
}

impl MembershipKind {
    /// Wire name used as `eventType`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
        }
    }
}

/// Something observable happened inside the hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// A connection passed validation and was admitted.
    Accepted {
        /// Assigned uid.
        uid: Uid,
    },
    /// A connection failed validation and was terminated.
    Rejected {
        /// Uid the connection would have had.
        uid: Uid,
    },
    /// An admitted connection closed and its session was torn down.
    Closed {
        /// Uid of the closed session.
        uid: Uid,
    },
    /// Group membership changed.
    Membership {
        /// Path of the affected node.
        path: String,
        /// Member that joined or left.
        uid: Uid,
        /// Direction of the change.
        kind: MembershipKind,
        /// Member count after the change.
        total: usize,
        /// Configured member limit.
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    /// An admitted connection sent a well-formed command.
    Message {
        /// Sender.
        uid: Uid,
        /// Group the sender belonged to when the command arrived.
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        /// The decoded payload, `request` included.
        payload: Value,
    },
    /// A liveness sweep ran.
    KeepAlive {
        /// Number of sessions probed.
        recipients: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_serializes_tagged() {
        let event = HubEvent::Membership {
            path: "lobby".into(),
            uid: Uid::new("u1"),
            kind: MembershipKind::Added,
            total: 1,
            limit: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "membership");
        assert_eq!(json["kind"], "added");
        assert_eq!(json["total"], 1);
        assert!(json.get("limit").is_none());
    }

    #[test]
    fn message_carries_payload() {
        let event = HubEvent::Message {
            uid: Uid::new("u1"),
            path: None,
            payload: serde_json::json!({"request": "emit", "n": 1}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["payload"]["n"], 1);
        assert!(json.get("path").is_none());
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(MembershipKind::Added.as_str(), "added");
        assert_eq!(MembershipKind::Removed.as_str(), "removed");
    }
}
