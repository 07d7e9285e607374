//! Session registry: one [`Session`] per admitted connection, keyed by uid.

use indexmap::IndexMap;
use tracing::warn;

use crate::connection::{ConnectionHandle, Uid};
use crate::tree::NodeId;

/// State kept for one admitted connection.
#[derive(Clone, Debug)]
pub struct Session {
    /// Connection uid.
    pub uid: Uid,
    /// The admitted connection.
    pub handle: ConnectionHandle,
    /// Group currently joined.
    pub group: Option<NodeId>,
    /// Nodes this session listens on, in subscription order.
    pub listening_to: Vec<NodeId>,
}

/// Uid-keyed map of live sessions, in admission order.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: IndexMap<Uid, Session>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh session for `handle`.
    ///
    /// Returns `None` without touching the existing entry when the uid is
    /// already registered.
    pub fn admit(&mut self, handle: &ConnectionHandle) -> Option<Uid> {
        let uid = handle.uid().clone();
        if self.sessions.contains_key(&uid) {
            warn!(uid = %uid, "duplicate admission ignored");
            return None;
        }
        let _ = self.sessions.insert(
            uid.clone(),
            Session {
                uid: uid.clone(),
                handle: handle.clone(),
                group: None,
                listening_to: Vec::new(),
            },
        );
        Some(uid)
    }

    /// Session by uid.
    pub fn get(&self, uid: &Uid) -> Option<&Session> {
        self.sessions.get(uid)
    }

    /// Mutable session by uid.
    pub fn get_mut(&mut self, uid: &Uid) -> Option<&mut Session> {
        self.sessions.get_mut(uid)
    }

    /// Whether `handle` is the connection registered under its uid.
    pub fn is_registered(&self, handle: &ConnectionHandle) -> bool {
        self.sessions
            .get(handle.uid())
            .is_some_and(|session| session.handle.same_connection(handle))
    }

    /// Remove and return the session of `handle`.
    ///
    /// A different connection sharing the uid leaves the entry in place.
    pub fn take(&mut self, handle: &ConnectionHandle) -> Option<Session> {
        if !self.is_registered(handle) {
            return None;
        }
        self.sessions.shift_remove(handle.uid())
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Handles of every session, in admission order.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.sessions.values().map(|s| s.handle.clone()).collect()
    }
}
