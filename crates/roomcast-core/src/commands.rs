//! Command decoding.
//!
//! Every post-accept payload is a JSON object whose `request` string selects
//! one [`Command`]. The remaining fields travel with emitted messages.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::connection::Uid;
use crate::errors::DispatchError;

/// Whose membership a listen/unlisten targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenTarget {
    /// Room root owning the sender's current group.
    Room,
    /// Node at an explicit path.
    Path(String),
}

/// A decoded client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `join:<path>`
    Join(String),
    /// `leave`
    Leave,
    /// `get:uid`
    GetUid,
    /// `open:<path>` or `open:room:<path>`
    Open {
        /// Create under the rooms root instead of the groups root.
        room: bool,
        /// Path to create.
        path: String,
    },
    /// `listen:connections:room` or `listen:connections:<path>`
    Listen(ListenTarget),
    /// `unlisten:connections:room` or `unlisten:connections:<path>`
    Unlisten(ListenTarget),
    /// `emit:room`
    EmitRoom,
    /// `emit`
    EmitGroup,
    /// `emit:<path>`
    EmitPath(String),
    /// `to:<uid>`
    To(Uid),
}

/// Data-free discriminant of [`Command`], used to pick a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// See [`Command::Join`].
    Join,
    /// See [`Command::Leave`].
    Leave,
    /// See [`Command::GetUid`].
    GetUid,
    /// See [`Command::Open`].
    Open,
    /// See [`Command::Listen`].
    Listen,
    /// See [`Command::Unlisten`].
    Unlisten,
    /// See [`Command::EmitRoom`].
    EmitRoom,
    /// See [`Command::EmitGroup`].
    EmitGroup,
    /// See [`Command::EmitPath`].
    EmitPath,
    /// See [`Command::To`].
    To,
}

impl CommandKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Join,
        Self::Leave,
        Self::GetUid,
        Self::Open,
        Self::Listen,
        Self::Unlisten,
        Self::EmitRoom,
        Self::EmitGroup,
        Self::EmitPath,
        Self::To,
    ];

    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::GetUid => "get_uid",
            Self::Open => "open",
            Self::Listen => "listen",
            Self::Unlisten => "unlisten",
            Self::EmitRoom => "emit_room",
            Self::EmitGroup => "emit_group",
            Self::EmitPath => "emit_path",
            Self::To => "to",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Command {
    /// Discriminant of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Join(_) => CommandKind::Join,
            Self::Leave => CommandKind::Leave,
            Self::GetUid => CommandKind::GetUid,
            Self::Open { .. } => CommandKind::Open,
            Self::Listen(_) => CommandKind::Listen,
            Self::Unlisten(_) => CommandKind::Unlisten,
            Self::EmitRoom => CommandKind::EmitRoom,
            Self::EmitGroup => CommandKind::EmitGroup,
            Self::EmitPath(_) => CommandKind::EmitPath,
            Self::To(_) => CommandKind::To,
        }
    }
}

fn non_empty(rest: &str) -> Option<String> {
    let rest = rest.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

fn listen_target(rest: &str) -> Option<ListenTarget> {
    let rest = rest.strip_prefix("connections:")?;
    if rest == "room" {
        return Some(ListenTarget::Room);
    }
    non_empty(rest).map(ListenTarget::Path)
}

impl FromStr for Command {
    type Err = DispatchError;

    fn from_str(request: &str) -> Result<Self, Self::Err> {
        let unknown = || DispatchError::UnknownCommand(request.to_string());
        let (verb, rest) = request.split_once(':').unwrap_or((request, ""));

        let command = match (verb, rest) {
            ("leave", "") => Self::Leave,
            ("emit", "") => Self::EmitGroup,
            ("emit", "room") => Self::EmitRoom,
            ("emit", path) => Self::EmitPath(non_empty(path).ok_or_else(unknown)?),
            ("get", "uid") => Self::GetUid,
            ("join", path) => Self::Join(non_empty(path).ok_or_else(unknown)?),
            ("open", path) => match path.strip_prefix("room:") {
                Some(room_path) => Self::Open {
                    room: true,
                    path: non_empty(room_path).ok_or_else(unknown)?,
                },
                None => Self::Open {
                    room: false,
                    path: non_empty(path).ok_or_else(unknown)?,
                },
            },
            ("listen", target) => Self::Listen(listen_target(target).ok_or_else(unknown)?),
            ("unlisten", target) => Self::Unlisten(listen_target(target).ok_or_else(unknown)?),
            ("to", uid) => Self::To(Uid::new(non_empty(uid).ok_or_else(unknown)?)),
            _ => return Err(unknown()),
        };
        Ok(command)
    }
}

/// A parsed client payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    command: Command,
    request: String,
    body: Map<String, Value>,
}

impl Request {
    /// Decode a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| DispatchError::Malformed(e.to_string()))?;
        let Value::Object(mut body) = value else {
            return Err(DispatchError::Malformed("payload is not an object".into()));
        };
        let request = match body.remove("request") {
            Some(Value::String(request)) => request,
            Some(_) => return Err(DispatchError::Malformed("`request` is not a string".into())),
            None => return Err(DispatchError::Malformed("missing `request`".into())),
        };
        let command = request.parse()?;
        Ok(Self {
            command,
            request,
            body,
        })
    }

    /// Decoded command.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// The original `request` string, echoed in acknowledgments.
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Every field except `request`.
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Message routed to other connections: the body stamped with `from`.
    pub fn emission(&self, from: &Uid) -> Value {
        let mut out = self.body.clone();
        let _ = out.insert("from".into(), Value::String(from.to_string()));
        Value::Object(out)
    }
}
