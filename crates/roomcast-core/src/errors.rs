//! Dispatch error codes and error type.
//!
//! None of these are fatal. Protocol violations and addressing failures are
//! logged and dropped; policy refusals turn into a `success: false`
//! acknowledgment for the sender.

// ── Error code constants ────────────────────────────────────────────

/// Payload is not a JSON object with a string `request` field.
pub const MALFORMED: &str = "MALFORMED";
/// `request` names no known command.
pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
/// Addressing path resolved to nothing.
pub const PATH_NOT_FOUND: &str = "PATH_NOT_FOUND";
/// Target uid is not registered.
pub const UID_NOT_FOUND: &str = "UID_NOT_FOUND";
/// Command needs a group but the session has none.
pub const NO_GROUP: &str = "NO_GROUP";
/// Session already belongs to a different group.
pub const ALREADY_JOINED: &str = "ALREADY_JOINED";
/// Leave without a current group.
pub const NOT_JOINED: &str = "NOT_JOINED";
/// Group member limit reached.
pub const GROUP_FULL: &str = "GROUP_FULL";

/// Error produced while decoding or executing one command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Payload could not be decoded into a request.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Request string matched no command form.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Addressing path did not resolve.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Direct target is not connected.
    #[error("uid not found: {0}")]
    UidNotFound(String),

    /// Group-scoped command from a session without a group.
    #[error("session has no group")]
    NoGroup,

    /// Join while already in another group.
    #[error("already joined {current}")]
    AlreadyJoined {
        /// Path of the group currently held.
        current: String,
    },

    /// Leave without a group.
    #[error("not in a group")]
    NotJoined,

    /// Join refused by the group's member limit.
    #[error("{message}")]
    GroupFull {
        /// Configured limit.
        limit: usize,
        /// Acknowledgment text sent back to the client.
        message: String,
    },
}

impl DispatchError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => MALFORMED,
            Self::UnknownCommand(_) => UNKNOWN_COMMAND,
            Self::PathNotFound(_) => PATH_NOT_FOUND,
            Self::UidNotFound(_) => UID_NOT_FOUND,
            Self::NoGroup => NO_GROUP,
            Self::AlreadyJoined { .. } => ALREADY_JOINED,
            Self::NotJoined => NOT_JOINED,
            Self::GroupFull { .. } => GROUP_FULL,
        }
    }

    /// Whether the sender gets a `success: false` acknowledgment.
    ///
    /// Everything else degrades to a silent no-op.
    pub fn is_acknowledged(&self) -> bool {
        matches!(
            self,
            Self::AlreadyJoined { .. } | Self::NotJoined | Self::GroupFull { .. }
        )
    }

    /// Text carried in the failure acknowledgment, if any.
    pub fn ack_message(&self) -> Option<String> {
        match self {
            Self::GroupFull { message, .. } => Some(message.clone()),
            Self::AlreadyJoined { .. } | Self::NotJoined => Some(self.to_string()),
            _ => None,
        }
    }
}
