//! Arena-backed group/room tree.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. Ownership
//! flows parent to child through `children`; `parent` is a plain index, so
//! there are no reference cycles. Nodes are never removed.
//!
//! Two top-level roots exist: `groups` and `rooms`. The `groups` root is a
//! room root itself; under `rooms` every direct child is a room root.
//!
//! The tree only stores state. Listener notification happens in the hub,
//! which owns both the tree and the router.

use indexmap::IndexMap;

use crate::connection::{ConnectionHandle, Uid};

/// Name of the groups root.
pub const GROUPS_ROOT: &str = "groups";
/// Name of the rooms root.
pub const ROOMS_ROOT: &str = "rooms";

/// Index of a node in its [`Tree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A membership listener registered on a node.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// Listening connection's uid.
    pub uid: Uid,
    /// Listening connection.
    pub handle: ConnectionHandle,
    /// Label echoed back in `connections:<label>` notifications.
    pub label: String,
}

/// A named group or room.
#[derive(Debug)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    children: IndexMap<String, NodeId>,
    members: IndexMap<Uid, ConnectionHandle>,
    listeners: IndexMap<Uid, Subscription>,
    is_room_root: bool,
    limit: Option<usize>,
}

impl Node {
    fn new(name: &str, parent: Option<NodeId>, is_room_root: bool) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: IndexMap::new(),
            members: IndexMap::new(),
            listeners: IndexMap::new(),
            is_room_root,
            limit: None,
        }
    }

    /// Node name (unique among its siblings).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent node, `None` for the two roots.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Whether this node scopes room-wide addressing.
    pub fn is_room_root(&self) -> bool {
        self.is_room_root
    }

    /// Member cap, if any.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Direct child by name.
    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }

    /// Direct children in creation order.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    /// Whether `uid` is a direct member.
    pub fn has_member(&self, uid: &Uid) -> bool {
        self.members.contains_key(uid)
    }

    /// Direct member uids in join order.
    pub fn member_uids(&self) -> Vec<Uid> {
        self.members.keys().cloned().collect()
    }

    /// Direct member handles in join order.
    pub fn members(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.members.values()
    }

    /// Number of direct members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether another member fits under the limit.
    pub fn has_capacity(&self) -> bool {
        self.limit.is_none_or(|limit| self.members.len() < limit)
    }

    /// Whether `uid` listens on this node.
    pub fn has_listener(&self, uid: &Uid) -> bool {
        self.listeners.contains_key(uid)
    }

    /// Listeners in registration order.
    pub fn listeners(&self) -> impl Iterator<Item = &Subscription> {
        self.listeners.values()
    }
}

/// The group/room tree.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    groups: NodeId,
    rooms: NodeId,
}

impl Tree {
    /// Tree holding only the `groups` and `rooms` roots.
    pub fn new() -> Self {
        Self {
            nodes: vec![
                Node::new(GROUPS_ROOT, None, true),
                Node::new(ROOMS_ROOT, None, false),
            ],
            groups: NodeId(0),
            rooms: NodeId(1),
        }
    }

    /// The `groups` root.
    pub fn groups_root(&self) -> NodeId {
        self.groups
    }

    /// The `rooms` root.
    pub fn rooms_root(&self) -> NodeId {
        self.rooms
    }

    /// Node by id.
    ///
    /// Ids are only minted by this tree and nodes are never removed, so
    /// every id handed out stays valid.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Total number of nodes, roots included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: the roots exist from construction.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return the child named `name`, creating it when missing.
    ///
    /// Children of the `rooms` root become room roots.
    pub fn add_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        if let Some(existing) = self.node(parent).child(name) {
            return existing;
        }
        let id = NodeId(self.nodes.len());
        let is_room_root = parent == self.rooms;
        self.nodes.push(Node::new(name, Some(parent), is_room_root));
        let _ = self.node_mut(parent).children.insert(name.to_string(), id);
        id
    }

    /// Create every missing node along `segments` below `root`.
    ///
    /// Returns `None` for an empty path.
    pub fn open(&mut self, root: NodeId, segments: &[&str]) -> Option<NodeId> {
        if segments.is_empty() {
            return None;
        }
        Some(
            segments
                .iter()
                .fold(root, |node, name| self.add_child(node, name)),
        )
    }

    /// Walk `segments` from `from`, stopping at the first missing name.
    pub fn resolve(&self, from: NodeId, segments: &[&str]) -> Option<NodeId> {
        segments
            .iter()
            .try_fold(from, |node, name| self.node(node).child(name))
    }

    /// Resolve a delimited path in the rooms tree, then the groups tree.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let segments = split_path(path);
        if segments.is_empty() {
            return None;
        }
        self.resolve(self.rooms, &segments)
            .or_else(|| self.resolve(self.groups, &segments))
    }

    /// Nearest ancestor-or-self that is a room root.
    ///
    /// Falls back to the top of the branch for nodes below a root that is
    /// not a room root.
    pub fn owning_room_root(&self, id: NodeId) -> NodeId {
        let mut current = id;
        loop {
            let node = self.node(current);
            if node.is_room_root {
                return current;
            }
            match node.parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    /// Path of `id` below its top-level root, joined with `-`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if node.parent.is_some() {
                names.push(node.name.as_str());
            }
            current = node.parent;
        }
        names.reverse();
        names.join("-")
    }

    /// `id` and all of its descendants, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            let children: Vec<NodeId> = self.node(next).children().collect();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Handles of every member in `id`'s subtree, deduplicated by uid.
    pub fn subtree_members(&self, id: NodeId) -> Vec<ConnectionHandle> {
        let mut seen: IndexMap<Uid, ConnectionHandle> = IndexMap::new();
        for node in self.subtree(id) {
            for (uid, handle) in &self.node(node).members {
                let _ = seen.entry(uid.clone()).or_insert_with(|| handle.clone());
            }
        }
        seen.into_values().collect()
    }

    /// Uids a listener on `id` sees: the whole room for room roots, direct
    /// members otherwise.
    pub fn listing(&self, id: NodeId) -> Vec<Uid> {
        if self.node(id).is_room_root {
            self.subtree_members(id)
                .iter()
                .map(|handle| handle.uid().clone())
                .collect()
        } else {
            self.node(id).member_uids()
        }
    }

    /// Set or clear a node's member cap.
    pub fn set_limit(&mut self, id: NodeId, limit: Option<usize>) {
        self.node_mut(id).limit = limit;
    }

    /// Insert a member keyed by its uid. Returns `false` if already present.
    pub(crate) fn insert_member(&mut self, id: NodeId, handle: ConnectionHandle) -> bool {
        let members = &mut self.node_mut(id).members;
        if members.contains_key(handle.uid()) {
            return false;
        }
        let _ = members.insert(handle.uid().clone(), handle);
        true
    }

    /// Remove a member, keeping the join order of the others.
    pub(crate) fn remove_member(&mut self, id: NodeId, uid: &Uid) -> Option<ConnectionHandle> {
        self.node_mut(id).members.shift_remove(uid)
    }

    /// Register a listener. Returns `false` if `uid` already listens here.
    pub(crate) fn insert_listener(&mut self, id: NodeId, subscription: Subscription) -> bool {
        let listeners = &mut self.node_mut(id).listeners;
        if listeners.contains_key(&subscription.uid) {
            return false;
        }
        let _ = listeners.insert(subscription.uid.clone(), subscription);
        true
    }

    /// Drop a listener, keeping the registration order of the others.
    pub(crate) fn remove_listener(&mut self, id: NodeId, uid: &Uid) -> bool {
        self.node_mut(id).listeners.shift_remove(uid).is_some()
    }

    /// Snapshot of a node's listeners, safe to hold while mutating the tree.
    pub(crate) fn listener_snapshot(&self, id: NodeId) -> Vec<Subscription> {
        self.node(id).listeners.values().cloned().collect()
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a hyphen- or slash-delimited path into its names.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(['-', '/'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}
