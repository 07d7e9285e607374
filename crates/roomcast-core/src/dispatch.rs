//! Command handlers.
//!
//! [`handler_for`] maps each [`CommandKind`] to one plain function. Handlers
//! run with exclusive access to the hub and either return an acknowledgment,
//! return nothing (routing commands), or fail with a [`DispatchError`].

use crate::commands::{Command, CommandKind, ListenTarget, Request};
use crate::connection::ConnectionHandle;
use crate::errors::DispatchError;
use crate::hub::{Ack, Hub, Target};
use crate::router::Frame;
use crate::tree::NodeId;

/// Signature shared by every command handler.
pub type Handler = fn(&mut Hub, &ConnectionHandle, &Request) -> Result<Option<Ack>, DispatchError>;

/// Handler for a command kind.
pub fn handler_for(kind: CommandKind) -> Handler {
    match kind {
        CommandKind::Join => join,
        CommandKind::Leave => leave,
        CommandKind::GetUid => get_uid,
        CommandKind::Open => open,
        CommandKind::Listen => listen,
        CommandKind::Unlisten => unlisten,
        CommandKind::EmitRoom => emit_room,
        CommandKind::EmitGroup => emit_group,
        CommandKind::EmitPath => emit_path,
        CommandKind::To => to,
    }
}

fn mismatch(req: &Request) -> DispatchError {
    DispatchError::Malformed(format!("handler mismatch for `{}`", req.request()))
}

fn current_group(hub: &Hub, handle: &ConnectionHandle) -> Option<NodeId> {
    hub.registry().get(handle.uid()).and_then(|s| s.group)
}

fn lookup(hub: &Hub, path: &str) -> Result<NodeId, DispatchError> {
    hub.tree()
        .lookup(path)
        .ok_or_else(|| DispatchError::PathNotFound(path.to_string()))
}

fn join(hub: &mut Hub, handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    let Command::Join(path) = req.command() else {
        return Err(mismatch(req));
    };
    let node = lookup(hub, path)?;
    let ack = Ack::ok(req.request()).with_uid(handle.uid().clone());

    match current_group(hub, handle) {
        Some(current) if current == node => return Ok(Some(ack)),
        Some(current) => {
            return Err(DispatchError::AlreadyJoined {
                current: hub.tree().path_of(current),
            });
        }
        None => {}
    }

    let target = hub.tree().node(node);
    if !target.has_capacity() {
        let limit = target.limit().unwrap_or_default();
        return Err(DispatchError::GroupFull {
            limit,
            message: format!("{}({limit}) for: {path}", hub.messages().group_full),
        });
    }

    let _ = hub.add_member(node, handle);
    Ok(Some(ack))
}

fn leave(hub: &mut Hub, handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    let group = current_group(hub, handle).ok_or(DispatchError::NotJoined)?;
    let _ = hub.remove_member(group, handle.uid());
    Ok(Some(Ack::ok(req.request()).with_uid(handle.uid().clone())))
}

#[allow(clippy::unnecessary_wraps)]
fn get_uid(_hub: &mut Hub, handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    Ok(Some(Ack::ok(req.request()).with_uid(handle.uid().clone())))
}

fn open(hub: &mut Hub, _handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    let Command::Open { room, path } = req.command() else {
        return Err(mismatch(req));
    };
    let _ = hub
        .open(*room, path)
        .ok_or_else(|| DispatchError::PathNotFound(path.clone()))?;
    Ok(Some(Ack::ok(req.request())))
}

fn listen_node(
    hub: &Hub,
    handle: &ConnectionHandle,
    target: &ListenTarget,
) -> Result<(NodeId, String), DispatchError> {
    match target {
        ListenTarget::Room => {
            let group = current_group(hub, handle).ok_or(DispatchError::NoGroup)?;
            Ok((hub.tree().owning_room_root(group), "room".to_string()))
        }
        ListenTarget::Path(path) => Ok((lookup(hub, path)?, path.clone())),
    }
}

fn listen(hub: &mut Hub, handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    let Command::Listen(target) = req.command() else {
        return Err(mismatch(req));
    };
    let (node, label) = listen_node(hub, handle, target)?;
    let _ = hub.add_listener(node, handle, label);
    Ok(Some(Ack::ok(req.request())))
}

fn unlisten(hub: &mut Hub, handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    let Command::Unlisten(target) = req.command() else {
        return Err(mismatch(req));
    };
    let (node, _) = listen_node(hub, handle, target)?;
    let removed = hub.remove_listener(node, handle.uid());
    Ok(Some(Ack::new(req.request(), removed)))
}

fn emit_room(hub: &mut Hub, handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    let group = current_group(hub, handle).ok_or(DispatchError::NoGroup)?;
    let frame = Frame::Json(req.emission(handle.uid()));
    let _ = hub.emit_except(&Target::Room(group), &frame, handle.uid());
    Ok(None)
}

fn emit_group(hub: &mut Hub, handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    let group = current_group(hub, handle).ok_or(DispatchError::NoGroup)?;
    let frame = Frame::Json(req.emission(handle.uid()));
    let _ = hub.emit_except(&Target::Node(group), &frame, handle.uid());
    Ok(None)
}

fn emit_path(hub: &mut Hub, handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    let Command::EmitPath(path) = req.command() else {
        return Err(mismatch(req));
    };
    let node = lookup(hub, path)?;
    let frame = Frame::Json(req.emission(handle.uid()));
    let _ = hub.emit_except(&Target::Node(node), &frame, handle.uid());
    Ok(None)
}

fn to(hub: &mut Hub, handle: &ConnectionHandle, req: &Request) -> Result<Option<Ack>, DispatchError> {
    let Command::To(uid) = req.command() else {
        return Err(mismatch(req));
    };
    if hub.registry().get(uid).is_none() {
        return Err(DispatchError::UidNotFound(uid.to_string()));
    }
    let frame = Frame::Json(req.emission(handle.uid()));
    let _ = hub.emit(&Target::Uid(uid.clone()), &frame);
    Ok(None)
}
