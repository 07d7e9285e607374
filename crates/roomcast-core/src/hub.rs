//! The hub: one service object owning the tree, the registry, the router and
//! the validator.
//!
//! A transport adapter feeds it three events per connection
//! ([`Hub::on_open`], [`Hub::on_message`], [`Hub::on_close`]) and drives two
//! timers ([`Hub::sweep`] for liveness, [`Hub::poll_retries`] for deferred
//! deliveries). Every method takes `&mut self`; the adapter is expected to
//! call them from a single task, which is what makes lock-free mutation of
//! the tree safe.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use roomcast_settings::{HubSettings, MessageSettings, NodeSpec};

use crate::commands::Request;
use crate::connection::{ConnectionHandle, ReadyState, Uid};
use crate::dispatch::handler_for;
use crate::events::{HubEvent, MembershipKind};
use crate::registry::Registry;
use crate::router::{Delivery, Frame, Router};
use crate::tree::{NodeId, Subscription, Tree, split_path};
use crate::validator::{AcceptReason, CustomValidator, Validator, Verdict};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Addressing expression for [`Hub::emit`].
#[derive(Clone, Debug)]
pub enum Target {
    /// One registered uid.
    Uid(Uid),
    /// An explicit list of connections.
    Handles(Vec<ConnectionHandle>),
    /// Direct members of a node.
    Node(NodeId),
    /// Every member of the room owning a node.
    Room(NodeId),
    /// Every registered session.
    All,
}

/// Command acknowledgment sent back to the requester.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Echo of the request string.
    pub request: String,
    /// Whether the command took effect.
    pub success: bool,
    /// Requester's uid, when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    /// Acknowledgment with an explicit outcome.
    pub fn new(request: impl Into<String>, success: bool) -> Self {
        Self {
            request: request.into(),
            success,
            uid: None,
            message: None,
        }
    }

    /// Successful acknowledgment.
    pub fn ok(request: impl Into<String>) -> Self {
        Self::new(request, true)
    }

    /// Failed acknowledgment.
    pub fn failed(request: impl Into<String>, message: Option<String>) -> Self {
        Self {
            message,
            ..Self::new(request, false)
        }
    }

    /// Attach the requester's uid.
    #[must_use]
    pub fn with_uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Wire form.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        let _ = out.insert("request".into(), Value::String(self.request.clone()));
        let _ = out.insert("success".into(), Value::Bool(self.success));
        if let Some(uid) = &self.uid {
            let _ = out.insert("uid".into(), Value::String(uid.to_string()));
        }
        if let Some(message) = &self.message {
            let _ = out.insert("message".into(), Value::String(message.clone()));
        }
        Value::Object(out)
    }
}

/// Point-in-time counters for health reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Admitted sessions.
    pub connections: usize,
    /// Nodes below the two roots.
    pub groups: usize,
    /// Frames waiting for a connecting transport.
    pub pending_deliveries: usize,
}

/// Builder for [`Hub`].
pub struct HubBuilder {
    settings: HubSettings,
    custom: Option<Arc<dyn CustomValidator>>,
    event_capacity: usize,
}

impl HubBuilder {
    /// Start from loaded settings.
    pub fn new(settings: HubSettings) -> Self {
        Self {
            settings,
            custom: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Install a custom validation hook, consulted after whitelist and key.
    #[must_use]
    pub fn custom_validator(mut self, validator: impl CustomValidator + 'static) -> Self {
        self.custom = Some(Arc::new(validator));
        self
    }

    /// Capacity of the event channel.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Build the hub and open the configured topology.
    pub fn build(self) -> Hub {
        let mut validator = Validator::new(&self.settings.auth);
        if let Some(custom) = self.custom {
            validator = validator.with_custom(custom);
        }
        let (events, _) = broadcast::channel(self.event_capacity);

        let mut hub = Hub {
            tree: Tree::new(),
            registry: Registry::new(),
            router: Router::from_settings(&self.settings.delivery),
            validator,
            messages: self.settings.messages.clone(),
            probe: self.settings.liveness.probe.clone(),
            events,
        };
        for spec in &self.settings.topology.groups {
            hub.open_spec(false, spec);
        }
        for spec in &self.settings.topology.rooms {
            hub.open_spec(true, spec);
        }
        hub
    }
}

/// Connection registry and router for one process.
pub struct Hub {
    tree: Tree,
    registry: Registry,
    router: Router,
    validator: Validator,
    messages: MessageSettings,
    probe: String,
    events: broadcast::Sender<HubEvent>,
}

impl Hub {
    /// Hub with settings and no custom validator.
    pub fn new(settings: &HubSettings) -> Self {
        HubBuilder::new(settings.clone()).build()
    }

    /// The group/room tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Registered sessions.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Acknowledgment text.
    pub fn messages(&self) -> &MessageSettings {
        &self.messages
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Current counters.
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            groups: self.tree.len().saturating_sub(2),
            pending_deliveries: self.router.pending_len(),
        }
    }

    // ── Transport events ────────────────────────────────────────────

    /// A transport connection opened. Nothing is registered until its first
    /// message passes validation.
    pub fn on_open(&mut self, handle: &ConnectionHandle) {
        debug!(uid = %handle.uid(), address = ?handle.meta().address, "connection opened");
    }

    /// A text frame arrived on `handle`.
    pub fn on_message(&mut self, handle: &ConnectionHandle, raw: &str) {
        if raw.trim() == self.probe {
            return;
        }

        let known = self.registry.is_registered(handle);
        // A rejected connection may still have frames in flight.
        if !known && handle.ready_state() == ReadyState::Closed {
            debug!(uid = %handle.uid(), "ignoring frame from terminated connection");
            return;
        }
        match self.validator.check(known, handle.meta(), raw) {
            Verdict::Accept(AcceptReason::Known) => self.dispatch(handle, raw),
            Verdict::Accept(reason) => self.accept(handle, raw, reason),
            Verdict::Reject => self.reject(handle),
        }
    }

    /// A transport connection closed.
    pub fn on_close(&mut self, handle: &ConnectionHandle) {
        if self.remove(handle) {
            info!(uid = %handle.uid(), "connection closed");
            let _ = self.events.send(HubEvent::Closed {
                uid: handle.uid().clone(),
            });
        } else {
            debug!(uid = %handle.uid(), "unregistered connection closed");
        }
    }

    fn accept(&mut self, handle: &ConnectionHandle, raw: &str, reason: AcceptReason) {
        if self.registry.get(handle.uid()).is_some() {
            warn!(uid = %handle.uid(), "uid already held by another connection, rejecting");
            self.reject(handle);
            return;
        }
        let Some(uid) = self.admit(handle) else {
            return;
        };
        info!(uid = %uid, ?reason, "connection accepted");
        metrics::counter!("hub_accepted_total").increment(1);

        let ack = Ack::ok("connect")
            .with_message(self.messages.accept.clone())
            .with_uid(uid.clone());
        self.reply(handle, &ack);
        let _ = self.events.send(HubEvent::Accepted { uid });

        self.dispatch(handle, raw);
    }

    fn reject(&mut self, handle: &ConnectionHandle) {
        info!(uid = %handle.uid(), "connection rejected");
        metrics::counter!("hub_rejected_total").increment(1);

        let ack = Ack::failed("connect", Some(self.messages.reject.clone()));
        Self::close_with_message(handle, &ack.to_value().to_string());
        let _ = self.events.send(HubEvent::Rejected {
            uid: handle.uid().clone(),
        });
    }

    fn dispatch(&mut self, handle: &ConnectionHandle, raw: &str) {
        let request = match Request::parse(raw) {
            Ok(request) => request,
            Err(err) => {
                debug!(uid = %handle.uid(), code = err.code(), error = %err, "ignoring payload");
                return;
            }
        };
        self.publish_message(handle, &request);
        let kind = request.command().kind();
        match handler_for(kind)(self, handle, &request) {
            Ok(Some(ack)) => self.reply(handle, &ack),
            Ok(None) => {}
            Err(err) if err.is_acknowledged() => {
                debug!(uid = %handle.uid(), command = %kind, code = err.code(), "command refused");
                let ack = Ack::failed(request.request(), err.ack_message());
                self.reply(handle, &ack);
            }
            Err(err) => {
                debug!(uid = %handle.uid(), command = %kind, code = err.code(), error = %err, "command ignored");
            }
        }
    }

    /// Publish an inbound command with the group its sender was in when it
    /// arrived.
    fn publish_message(&self, handle: &ConnectionHandle, request: &Request) {
        if self.events.receiver_count() == 0 {
            return;
        }
        let path = self
            .registry
            .get(handle.uid())
            .and_then(|session| session.group)
            .map(|group| self.tree.path_of(group));
        let mut payload = request.body().clone();
        let _ = payload.insert("request".into(), Value::String(request.request().to_string()));
        let _ = self.events.send(HubEvent::Message {
            uid: handle.uid().clone(),
            path,
            payload: Value::Object(payload),
        });
    }

    fn reply(&mut self, handle: &ConnectionHandle, ack: &Ack) {
        let _ = self.router.deliver(handle, &Frame::Json(ack.to_value()));
    }

    /// Send `text` if the transport is ready, then terminate it.
    pub fn close_with_message(handle: &ConnectionHandle, text: &str) {
        if handle.ready_state() == ReadyState::Ready {
            let _ = handle.send(text);
        }
        handle.terminate();
    }

    // ── Registry ────────────────────────────────────────────────────

    /// Register a session for `handle`. `None` when its uid is taken.
    pub fn admit(&mut self, handle: &ConnectionHandle) -> Option<Uid> {
        self.registry.admit(handle)
    }

    /// Tear down the session of `handle`: group membership, listeners, then
    /// the session itself. Returns `false` when there was nothing to remove.
    pub fn remove(&mut self, handle: &ConnectionHandle) -> bool {
        if !self.registry.is_registered(handle) {
            return false;
        }
        let uid = handle.uid().clone();
        let (group, listening) = match self.registry.get(&uid) {
            Some(session) => (session.group, session.listening_to.clone()),
            None => return false,
        };
        if let Some(group) = group {
            let _ = self.remove_member(group, &uid);
        }
        for node in listening {
            let _ = self.remove_listener(node, &uid);
        }
        self.registry.take(handle).is_some()
    }

    /// Close every registered connection.
    pub fn terminate_all(&mut self) {
        for handle in self.registry.handles() {
            let _ = self.remove(&handle);
            handle.terminate();
        }
    }

    // ── Tree ────────────────────────────────────────────────────────

    /// Create `path` under the rooms root (`room`) or the groups root.
    pub fn open(&mut self, room: bool, path: &str) -> Option<NodeId> {
        let root = if room {
            self.tree.rooms_root()
        } else {
            self.tree.groups_root()
        };
        self.tree.open(root, &split_path(path))
    }

    fn open_spec(&mut self, room: bool, spec: &NodeSpec) {
        match self.open(room, &spec.path) {
            Some(node) => {
                self.tree.set_limit(node, spec.limit);
                debug!(path = %spec.path, room, limit = ?spec.limit, "opened node");
            }
            None => warn!(path = %spec.path, "skipping empty topology path"),
        }
    }

    /// Add the session of `handle` to `node` and notify listeners.
    ///
    /// Refused when the connection is not registered, already belongs to a
    /// different node, or is already a member.
    pub fn add_member(&mut self, node: NodeId, handle: &ConnectionHandle) -> bool {
        let uid = handle.uid().clone();
        let Some(session) = self.registry.get_mut(&uid) else {
            return false;
        };
        if !session.handle.same_connection(handle) || session.group.is_some_and(|g| g != node) {
            return false;
        }
        if !self.tree.insert_member(node, handle.clone()) {
            return false;
        }
        session.group = Some(node);
        self.membership_changed(node, &uid, MembershipKind::Added);
        true
    }

    /// Remove `uid` from `node` and notify listeners. No-op if absent.
    pub fn remove_member(&mut self, node: NodeId, uid: &Uid) -> bool {
        if self.tree.remove_member(node, uid).is_none() {
            return false;
        }
        if let Some(session) = self.registry.get_mut(uid) {
            if session.group == Some(node) {
                session.group = None;
            }
        }
        self.membership_changed(node, uid, MembershipKind::Removed);
        true
    }

    /// Subscribe `handle` to membership changes on `node`.
    ///
    /// The new listener receives one snapshot of the current members before
    /// any change notification.
    pub fn add_listener(&mut self, node: NodeId, handle: &ConnectionHandle, label: String) -> bool {
        let uid = handle.uid().clone();
        let Some(session) = self.registry.get_mut(&uid) else {
            return false;
        };
        let subscription = Subscription {
            uid,
            handle: handle.clone(),
            label: label.clone(),
        };
        if !self.tree.insert_listener(node, subscription) {
            return false;
        }
        session.listening_to.push(node);

        let snapshot = json!({
            "event": format!("connections:{label}"),
            "eventType": "snapshot",
            "connections": self.tree.listing(node),
        });
        let _ = self.router.deliver(handle, &Frame::Json(snapshot));
        true
    }

    /// Drop the subscription of `uid` on `node`.
    pub fn remove_listener(&mut self, node: NodeId, uid: &Uid) -> bool {
        if !self.tree.remove_listener(node, uid) {
            return false;
        }
        if let Some(session) = self.registry.get_mut(uid) {
            session.listening_to.retain(|n| *n != node);
        }
        true
    }

    fn membership_changed(&mut self, node: NodeId, uid: &Uid, kind: MembershipKind) {
        self.notify(node, uid, kind);

        let target = self.tree.node(node);
        let event = HubEvent::Membership {
            path: self.tree.path_of(node),
            uid: uid.clone(),
            kind,
            total: target.member_count(),
            limit: target.limit(),
        };
        debug!(?event, "membership changed");
        let _ = self.events.send(event);
    }

    /// Tell listeners on `node` and on its room root about a change.
    ///
    /// Each listener set is snapshotted before delivery, and the member list
    /// reflects the committed change.
    fn notify(&mut self, node: NodeId, uid: &Uid, kind: MembershipKind) {
        let root = self.tree.owning_room_root(node);
        let scopes = if root == node { vec![node] } else { vec![node, root] };

        for scope in scopes {
            let listeners = self.tree.listener_snapshot(scope);
            if listeners.is_empty() {
                continue;
            }
            let connections = self.tree.listing(scope);
            for listener in listeners {
                let message = json!({
                    "event": format!("connections:{}", listener.label),
                    "eventType": kind.as_str(),
                    "connections": connections,
                    "uid": uid,
                });
                let _ = self.router.deliver(&listener.handle, &Frame::Json(message));
            }
        }
    }

    // ── Routing ─────────────────────────────────────────────────────

    /// Connections addressed by `target`.
    pub fn resolve(&self, target: &Target) -> Vec<ConnectionHandle> {
        match target {
            Target::Uid(uid) => self
                .registry
                .get(uid)
                .map(|s| vec![s.handle.clone()])
                .unwrap_or_default(),
            Target::Handles(handles) => handles.clone(),
            Target::Node(node) => self.tree.node(*node).members().cloned().collect(),
            Target::Room(node) => self
                .tree
                .subtree_members(self.tree.owning_room_root(*node)),
            Target::All => self.registry.handles(),
        }
    }

    /// Deliver `frame` to every connection `target` resolves to.
    pub fn emit(&mut self, target: &Target, frame: &Frame) -> usize {
        let targets = self.resolve(target);
        self.router.emit(&targets, frame)
    }

    /// Like [`Hub::emit`], skipping `exclude`.
    pub fn emit_except(&mut self, target: &Target, frame: &Frame, exclude: &Uid) -> usize {
        let mut targets = self.resolve(target);
        targets.retain(|h| h.uid() != exclude);
        self.router.emit(&targets, frame)
    }

    /// Deliver `frame` to one connection.
    pub fn send(&mut self, handle: &ConnectionHandle, frame: &Frame) -> Delivery {
        self.router.deliver(handle, frame)
    }

    /// Deliver `frame` to every session.
    pub fn broadcast(&mut self, frame: &Frame) -> usize {
        self.emit(&Target::All, frame)
    }

    // ── Timers ──────────────────────────────────────────────────────

    /// Liveness sweep: send the probe to every session.
    pub fn sweep(&mut self) -> usize {
        let recipients = self.broadcast(&Frame::text(self.probe.clone()));
        debug!(recipients, "keep-alive sweep");
        let _ = self.events.send(HubEvent::KeepAlive { recipients });
        recipients
    }

    /// Retry deferred deliveries due at `now`. Returns the next deadline.
    pub fn poll_retries(&mut self, now: Instant) -> Option<Instant> {
        self.router.poll(now)
    }

    /// Next deferred-delivery deadline.
    pub fn next_retry(&self) -> Option<Instant> {
        self.router.next_deadline()
    }
}
