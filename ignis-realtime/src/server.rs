use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ignis_core::container::BoxFuture;
use ignis_core::helpers::{new_id, now_millis};
use ignis_core::{ErrorKind, IgnisError};
use ignis_events::PubSubStore;

use crate::client::{ClientEntry, ClientInfo, ClientSocket, ClientState};
use crate::envelope::{
    channel_client, channel_room, channel_user, BusMessage, BusTargetKind, Envelope,
    CHANNEL_BROADCAST, CLOSE_AUTH_FAILURE, CLOSE_AUTH_TIMEOUT, CLOSE_ENCRYPTION_REQUIRED,
    CLOSE_HEARTBEAT_TIMEOUT, CLOSE_SERVER_SHUTDOWN, EVENT_AUTHENTICATE, EVENT_CONNECTED,
    EVENT_ERROR, EVENT_HEARTBEAT, EVENT_JOIN, EVENT_LEAVE, PATTERN_ALL,
};

/// Result of the application's `authenticate_fn`.
#[derive(Debug, Clone, Default)]
pub struct AuthResult {
    pub user_id: Option<String>,
    pub metadata: Option<Value>,
}

/// Key material returned by the encryption handshake.
#[derive(Debug, Clone)]
pub struct HandshakeKeys {
    pub server_public_key: String,
    pub salt: String,
}

#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub client_id: String,
    pub user_id: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct RoomRequest {
    pub client_id: String,
    pub user_id: Option<String>,
    pub rooms: Vec<String>,
}

pub type AuthenticateFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Option<AuthResult>> + Send + Sync>;
pub type HandshakeFn =
    Arc<dyn Fn(HandshakeRequest) -> BoxFuture<'static, Option<HandshakeKeys>> + Send + Sync>;
pub type ValidateRoomFn = Arc<dyn Fn(RoomRequest) -> BoxFuture<'static, Vec<String>> + Send + Sync>;
pub type ClientEventFn = Arc<dyn Fn(ClientInfo) -> BoxFuture<'static, ()> + Send + Sync>;
pub type MessageHandlerFn = Arc<dyn Fn(ClientInfo, Envelope) -> BoxFuture<'static, ()> + Send + Sync>;
/// Per-client outbound rewrite `(client, event, data) → (event', data')`.
/// Returning `None` sends the original payload.
pub type TransformFn =
    Arc<dyn Fn(ClientInfo, String, Value) -> BoxFuture<'static, Option<(String, Value)>> + Send + Sync>;

/// Tuning knobs of the realtime helper.
#[derive(Clone)]
pub struct WsServerOptions {
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// Rooms every client joins on successful authentication, in addition
    /// to its own id room.
    pub default_rooms: Vec<String>,
    /// Parallelism window for iterated fan-out when a transformer is set.
    pub encrypted_batch_limit: usize,
    pub require_encryption: bool,
    pub server_id: String,
}

impl Default for WsServerOptions {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            default_rooms: vec!["ws-default".to_string(), "ws-notification".to_string()],
            encrypted_batch_limit: 10,
            require_encryption: false,
            server_id: new_id(),
        }
    }
}

/// Assembles a [`WsServerHelper`].
pub struct WsServerBuilder {
    options: WsServerOptions,
    authenticate_fn: AuthenticateFn,
    handshake_fn: Option<HandshakeFn>,
    validate_room_fn: Option<ValidateRoomFn>,
    client_connected_fn: Option<ClientEventFn>,
    client_disconnected_fn: Option<ClientEventFn>,
    message_handler: Option<MessageHandlerFn>,
    transform: Option<TransformFn>,
    pubsub: Option<Arc<dyn PubSubStore>>,
}

impl WsServerBuilder {
    pub fn new(options: WsServerOptions, authenticate_fn: AuthenticateFn) -> Self {
        Self {
            options,
            authenticate_fn,
            handshake_fn: None,
            validate_room_fn: None,
            client_connected_fn: None,
            client_disconnected_fn: None,
            message_handler: None,
            transform: None,
            pubsub: None,
        }
    }

    pub fn with_handshake_fn(mut self, f: HandshakeFn) -> Self {
        self.handshake_fn = Some(f);
        self
    }

    pub fn with_validate_room_fn(mut self, f: ValidateRoomFn) -> Self {
        self.validate_room_fn = Some(f);
        self
    }

    pub fn with_client_connected_fn(mut self, f: ClientEventFn) -> Self {
        self.client_connected_fn = Some(f);
        self
    }

    pub fn with_client_disconnected_fn(mut self, f: ClientEventFn) -> Self {
        self.client_disconnected_fn = Some(f);
        self
    }

    pub fn with_message_handler(mut self, f: MessageHandlerFn) -> Self {
        self.message_handler = Some(f);
        self
    }

    pub fn with_transform(mut self, f: TransformFn) -> Self {
        self.transform = Some(f);
        self
    }

    pub fn with_pubsub(mut self, store: Arc<dyn PubSubStore>) -> Self {
        self.pubsub = Some(store);
        self
    }

    pub fn build(self) -> Arc<WsServerHelper> {
        Arc::new_cyclic(|self_ref| WsServerHelper {
            self_ref: self_ref.clone(),
            options: self.options,
            authenticate_fn: self.authenticate_fn,
            handshake_fn: self.handshake_fn,
            validate_room_fn: self.validate_room_fn,
            client_connected_fn: self.client_connected_fn,
            client_disconnected_fn: self.client_disconnected_fn,
            message_handler: self.message_handler,
            transform: self.transform,
            pubsub: self.pubsub,
            clients: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            broadcast_subscribers: RwLock::new(HashSet::new()),
        })
    }
}

/// Runtime-agnostic realtime server helper.
///
/// Owns the client entries and the room/user indexes, drives the
/// post-connection authentication protocol, sweeps silent clients, and
/// fans messages out locally and across instances through the pub/sub
/// store. The transport adapter calls `handle_connection`,
/// `handle_message`, `handle_disconnect` and the backpressure hooks.
pub struct WsServerHelper {
    self_ref: Weak<WsServerHelper>,
    options: WsServerOptions,
    authenticate_fn: AuthenticateFn,
    handshake_fn: Option<HandshakeFn>,
    validate_room_fn: Option<ValidateRoomFn>,
    client_connected_fn: Option<ClientEventFn>,
    client_disconnected_fn: Option<ClientEventFn>,
    message_handler: Option<MessageHandlerFn>,
    transform: Option<TransformFn>,
    pubsub: Option<Arc<dyn PubSubStore>>,
    clients: RwLock<HashMap<String, Arc<ClientEntry>>>,
    /// userId → client ids.
    users: RwLock<HashMap<String, HashSet<String>>>,
    /// Room topic subscriptions. Encrypted clients are absent here so that
    /// topic fan-out cannot bypass their transformer.
    rooms: RwLock<HashMap<String, HashSet<String>>>,
    /// Broadcast topic subscriptions (non-encrypted, authenticated).
    broadcast_subscribers: RwLock<HashSet<String>>,
}

impl WsServerHelper {
    pub fn server_id(&self) -> &str {
        &self.options.server_id
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn client(&self, client_id: &str) -> Option<Arc<ClientEntry>> {
        self.clients.read().await.get(client_id).cloned()
    }

    // ── Transport entry points ──────────────────────────────────────────

    /// A transport connected: allocate the client id, create the entry in
    /// `Unauthorized`, and arm the auth timer.
    pub async fn handle_connection(&self, socket: Arc<dyn ClientSocket>) -> String {
        let client_id = new_id();
        let entry = Arc::new(ClientEntry::new(client_id.clone(), socket));
        self.clients
            .write()
            .await
            .insert(client_id.clone(), entry.clone());
        self.arm_auth_timer(&entry, self.options.auth_timeout);
        debug!(client = %client_id, "realtime client connected");
        client_id
    }

    /// An inbound frame arrived for `client_id`.
    pub async fn handle_message(&self, client_id: &str, text: &str) {
        let Some(entry) = self.client(client_id).await else {
            return;
        };
        entry.touch();

        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.send_protocol(
                    &entry,
                    &Envelope::new(EVENT_ERROR, json!({"message": format!("malformed envelope: {err}")})),
                )
                .await;
                return;
            }
        };

        match envelope.event.as_str() {
            EVENT_AUTHENTICATE => {
                self.handle_authenticate(&entry, envelope.data.unwrap_or(Value::Null))
                    .await;
            }
            EVENT_HEARTBEAT => {
                // Activity already refreshed above.
            }
            EVENT_JOIN => self.handle_join(&entry, envelope.data.as_ref()).await,
            EVENT_LEAVE => self.handle_leave(&entry, envelope.data.as_ref()).await,
            _ => {
                if entry.state() != ClientState::Authenticated {
                    self.send_protocol(
                        &entry,
                        &Envelope::new(EVENT_ERROR, json!({"message": "not authenticated"})),
                    )
                    .await;
                    return;
                }
                if let Some(handler) = &self.message_handler {
                    handler(entry.snapshot(), envelope).await;
                }
            }
        }
    }

    /// The transport reported a close for `client_id`.
    pub async fn handle_disconnect(&self, client_id: &str) {
        if let Some(entry) = self.remove_client(client_id).await {
            debug!(client = %client_id, "realtime client disconnected");
            if let Some(callback) = &self.client_disconnected_fn {
                callback(entry.snapshot()).await;
            }
        }
    }

    /// Transport write-buffer filled up for this client.
    pub async fn handle_backpressure(&self, client_id: &str) {
        if let Some(entry) = self.client(client_id).await {
            entry.set_backpressured(true);
        }
    }

    /// Transport drained its write buffer.
    pub async fn handle_drain(&self, client_id: &str) {
        if let Some(entry) = self.client(client_id).await {
            entry.set_backpressured(false);
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Start the heartbeat sweep and, when a pub/sub store is configured,
    /// the cross-instance listener. Tasks end when `shutdown` fires.
    pub async fn start(
        &self,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, IgnisError> {
        let mut handles = Vec::new();

        let helper = self.self_ref.clone();
        let sweep_token = shutdown.clone();
        let interval = self.options.heartbeat_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = sweep_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(helper) = helper.upgrade() else { break };
                        helper.sweep_heartbeats().await;
                    }
                }
            }
        }));

        if let Some(pubsub) = &self.pubsub {
            let mut subscription = pubsub.psubscribe(PATTERN_ALL).await?;
            let helper = self.self_ref.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        message = subscription.recv() => match message {
                            Some(message) => {
                                let Some(helper) = helper.upgrade() else { break };
                                helper.handle_bus_message(&message.payload).await;
                            }
                            None => break,
                        },
                    }
                }
            }));
        }

        Ok(handles)
    }

    /// Close every client with the shutdown code and clear the indexes.
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<ClientEntry>> =
            self.clients.write().await.drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.cancel_auth_timer();
            entry.transition(ClientState::Disconnected);
            entry.socket().close(CLOSE_SERVER_SHUTDOWN, "server shutdown").await;
        }
        self.users.write().await.clear();
        self.rooms.write().await.clear();
        self.broadcast_subscribers.write().await.clear();
    }

    async fn sweep_heartbeats(&self) {
        let timeout_ms = self.options.heartbeat_timeout.as_millis() as i64;
        let now = now_millis();
        let stale: Vec<Arc<ClientEntry>> = {
            self.clients
                .read()
                .await
                .values()
                .filter(|entry| now - entry.last_activity() > timeout_ms)
                .cloned()
                .collect()
        };
        for entry in stale {
            debug!(client = %entry.id, "heartbeat timeout");
            entry
                .socket()
                .close(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout")
                .await;
            self.handle_disconnect(&entry.id).await;
        }
    }

    // ── Authentication protocol ─────────────────────────────────────────

    async fn handle_authenticate(&self, entry: &Arc<ClientEntry>, data: Value) {
        if !entry.transition(ClientState::Authenticating) {
            debug!(client = %entry.id, "authenticate ignored in current state");
            return;
        }
        // Extend the window for async verification.
        self.arm_auth_timer(entry, self.options.auth_timeout * 3);

        let Some(auth) = (self.authenticate_fn)(data.clone()).await else {
            self.send_protocol(
                entry,
                &Envelope::new(EVENT_ERROR, json!({"message": "authentication failed"})),
            )
            .await;
            entry.socket().close(CLOSE_AUTH_FAILURE, "authentication failed").await;
            self.handle_disconnect(&entry.id).await;
            return;
        };

        if self.options.require_encryption {
            let keys = match &self.handshake_fn {
                Some(handshake) => {
                    handshake(HandshakeRequest {
                        client_id: entry.id.clone(),
                        user_id: auth.user_id.clone(),
                        data,
                    })
                    .await
                }
                None => None,
            };
            let Some(keys) = keys else {
                entry
                    .socket()
                    .close(CLOSE_ENCRYPTION_REQUIRED, "encryption required")
                    .await;
                self.handle_disconnect(&entry.id).await;
                return;
            };
            entry.enable_encryption(keys.server_public_key, keys.salt);
        }

        entry.set_identity(auth.user_id.clone(), auth.metadata);
        entry.transition(ClientState::Authenticated);
        entry.cancel_auth_timer();

        if let Some(user_id) = &auth.user_id {
            self.users
                .write()
                .await
                .entry(user_id.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        if !entry.is_encrypted() {
            self.broadcast_subscribers.write().await.insert(entry.id.clone());
        }

        let default_rooms = self.options.default_rooms.clone();
        for room in default_rooms.iter().chain(std::iter::once(&entry.id)) {
            self.add_to_room(entry, room).await;
        }

        let snapshot = entry.snapshot();
        let mut connected = json!({
            "id": entry.id,
            "time": now_millis(),
        });
        if let Some(user_id) = &snapshot.user_id {
            connected["userId"] = json!(user_id);
        }
        if let Some(key) = &snapshot.server_public_key {
            connected["serverPublicKey"] = json!(key);
        }
        if let Some(salt) = &snapshot.salt {
            connected["salt"] = json!(salt);
        }
        self.send_protocol(entry, &Envelope::new(EVENT_CONNECTED, connected)).await;

        if let Some(callback) = &self.client_connected_fn {
            callback(snapshot).await;
        }
    }

    fn arm_auth_timer(&self, entry: &Arc<ClientEntry>, timeout: Duration) {
        let helper = self.self_ref.clone();
        let client_id = entry.id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(helper) = helper.upgrade() else {
                return;
            };
            let Some(entry) = helper.client(&client_id).await else {
                return;
            };
            if entry.state() != ClientState::Authenticated {
                debug!(client = %client_id, "authentication timeout");
                entry
                    .socket()
                    .close(CLOSE_AUTH_TIMEOUT, "authentication timeout")
                    .await;
                helper.handle_disconnect(&client_id).await;
            }
        });
        entry.set_auth_timer(handle);
    }

    // ── Rooms ───────────────────────────────────────────────────────────

    async fn handle_join(&self, entry: &Arc<ClientEntry>, data: Option<&Value>) {
        if entry.state() != ClientState::Authenticated {
            return;
        }
        let requested = room_list(data);
        if requested.is_empty() {
            return;
        }
        // Without a validator every custom join is rejected.
        let Some(validate) = &self.validate_room_fn else {
            debug!(client = %entry.id, "join rejected: no room validator configured");
            return;
        };
        let allowed = validate(RoomRequest {
            client_id: entry.id.clone(),
            user_id: entry.user_id(),
            rooms: requested,
        })
        .await;
        for room in allowed {
            self.add_to_room(entry, &room).await;
        }
    }

    async fn handle_leave(&self, entry: &Arc<ClientEntry>, data: Option<&Value>) {
        for room in room_list(data) {
            self.remove_from_room(&entry.id, &room).await;
            entry.leave_room(&room);
        }
    }

    async fn add_to_room(&self, entry: &Arc<ClientEntry>, room: &str) {
        entry.join_room(room);
        if !entry.is_encrypted() {
            self.rooms
                .write()
                .await
                .entry(room.to_string())
                .or_default()
                .insert(entry.id.clone());
        }
    }

    async fn remove_from_room(&self, client_id: &str, room: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(client_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    // ── Outbound ────────────────────────────────────────────────────────

    /// Send to one client, locally when present, otherwise across
    /// instances over its client channel.
    pub async fn send_to_client(
        &self,
        client_id: &str,
        event: &str,
        data: &Value,
    ) -> Result<(), IgnisError> {
        if let Some(entry) = self.client(client_id).await {
            self.deliver(&entry, event, data).await;
            return Ok(());
        }
        self.publish_bus(
            &channel_client(client_id),
            BusTargetKind::Client,
            Some(client_id),
            event,
            data,
            None,
        )
        .await
    }

    /// Send to every connection of a user, here and on other instances.
    pub async fn send_to_user(
        &self,
        user_id: &str,
        event: &str,
        data: &Value,
    ) -> Result<(), IgnisError> {
        self.local_user(user_id, event, data).await;
        self.publish_bus(
            &channel_user(user_id),
            BusTargetKind::User,
            Some(user_id),
            event,
            data,
            None,
        )
        .await
    }

    /// Send to a room, here and on other instances.
    pub async fn send_to_room(
        &self,
        room: &str,
        event: &str,
        data: &Value,
        exclude: &[String],
    ) -> Result<(), IgnisError> {
        self.local_room(room, event, data, exclude).await;
        self.publish_bus(
            &channel_room(room),
            BusTargetKind::Room,
            Some(room),
            event,
            data,
            Some(exclude.to_vec()),
        )
        .await
    }

    /// Send to every subscribed client, here and on other instances.
    pub async fn broadcast(
        &self,
        event: &str,
        data: &Value,
        exclude: &[String],
    ) -> Result<(), IgnisError> {
        self.local_broadcast(event, data, exclude).await;
        self.publish_bus(
            CHANNEL_BROADCAST,
            BusTargetKind::Broadcast,
            None,
            event,
            data,
            Some(exclude.to_vec()),
        )
        .await
    }

    /// Route by destination: a known client id, then room, then user.
    /// Unknown destinations are published as a room so that instances
    /// that do know them can deliver.
    pub async fn send(&self, destination: &str, event: &str, data: &Value) -> Result<(), IgnisError> {
        if self.clients.read().await.contains_key(destination) {
            return self.send_to_client(destination, event, data).await;
        }
        if self.rooms.read().await.contains_key(destination) {
            return self.send_to_room(destination, event, data, &[]).await;
        }
        if self.users.read().await.contains_key(destination) {
            return self.send_to_user(destination, event, data).await;
        }
        self.publish_bus(
            &channel_room(destination),
            BusTargetKind::Room,
            Some(destination),
            event,
            data,
            None,
        )
        .await
    }

    async fn local_user(&self, user_id: &str, event: &str, data: &Value) {
        let ids = self
            .users
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        let targets = self.entries_for(&ids).await;
        self.fan_out(targets, event, data).await;
    }

    async fn local_room(&self, room: &str, event: &str, data: &Value, exclude: &[String]) {
        let iterate = self.transform.is_some() || !exclude.is_empty();
        let targets: Vec<Arc<ClientEntry>> = if iterate {
            // Membership from the client entries so encrypted clients are
            // reached through the transformer.
            self.clients
                .read()
                .await
                .values()
                .filter(|e| e.state() == ClientState::Authenticated && e.in_room(room))
                .filter(|e| !exclude.contains(&e.id))
                .cloned()
                .collect()
        } else {
            let ids = self
                .rooms
                .read()
                .await
                .get(room)
                .cloned()
                .unwrap_or_default();
            self.entries_for(&ids).await
        };
        self.fan_out(targets, event, data).await;
    }

    async fn local_broadcast(&self, event: &str, data: &Value, exclude: &[String]) {
        let iterate = self.transform.is_some() || !exclude.is_empty();
        let targets: Vec<Arc<ClientEntry>> = if iterate {
            self.clients
                .read()
                .await
                .values()
                .filter(|e| e.state() == ClientState::Authenticated)
                .filter(|e| !exclude.contains(&e.id))
                .cloned()
                .collect()
        } else {
            let ids = self.broadcast_subscribers.read().await.clone();
            self.entries_for(&ids).await
        };
        self.fan_out(targets, event, data).await;
    }

    async fn entries_for(&self, ids: &HashSet<String>) -> Vec<Arc<ClientEntry>> {
        let clients = self.clients.read().await;
        ids.iter()
            .filter_map(|id| clients.get(id))
            .filter(|e| e.state() == ClientState::Authenticated)
            .cloned()
            .collect()
    }

    /// Iterated fan-out. With a transformer present, concurrency is
    /// bounded by `encrypted_batch_limit`.
    async fn fan_out(&self, targets: Vec<Arc<ClientEntry>>, event: &str, data: &Value) {
        if self.transform.is_some() {
            let limit = self.options.encrypted_batch_limit.max(1);
            stream::iter(targets)
                .for_each_concurrent(limit, |entry| async move {
                    self.deliver(&entry, event, data).await;
                })
                .await;
        } else {
            for entry in targets {
                self.deliver(&entry, event, data).await;
            }
        }
    }

    /// Write one message to one client, applying the outbound transform
    /// immediately before the transport write.
    async fn deliver(&self, entry: &Arc<ClientEntry>, event: &str, data: &Value) {
        let (event, data) = match &self.transform {
            Some(transform) => transform(entry.snapshot(), event.to_string(), data.clone())
                .await
                .unwrap_or_else(|| (event.to_string(), data.clone())),
            None => (event.to_string(), data.clone()),
        };
        let envelope = Envelope::new(event, data);
        self.write(entry, &envelope).await;
    }

    /// Protocol messages (connected/error) bypass the transformer: they
    /// carry the handshake material the peer needs before it can decrypt.
    async fn send_protocol(&self, entry: &Arc<ClientEntry>, envelope: &Envelope) {
        self.write(entry, envelope).await;
    }

    async fn write(&self, entry: &Arc<ClientEntry>, envelope: &Envelope) {
        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "envelope serialization failed");
                return;
            }
        };
        match entry.socket().send_text(&text).await {
            Ok(()) => {}
            Err(err) if err.kind == ErrorKind::TransportClosed => {
                // Cleaning up the entry is the only recovery.
                self.handle_disconnect(&entry.id).await;
            }
            Err(err) => {
                warn!(client = %entry.id, error = %err, "realtime write failed");
            }
        }
    }

    // ── Cross-instance fan-out ──────────────────────────────────────────

    async fn publish_bus(
        &self,
        channel: &str,
        kind: BusTargetKind,
        target: Option<&str>,
        event: &str,
        data: &Value,
        exclude: Option<Vec<String>>,
    ) -> Result<(), IgnisError> {
        let Some(pubsub) = &self.pubsub else {
            return Ok(());
        };
        let message = BusMessage {
            server_id: self.options.server_id.clone(),
            kind,
            target: target.map(str::to_string),
            event: event.to_string(),
            data: data.clone(),
            exclude: exclude.filter(|e| !e.is_empty()),
        };
        let payload = serde_json::to_string(&message)
            .map_err(|e| IgnisError::internal(format!("bus message serialization: {e}")))?;
        pubsub.publish(channel, &payload).await
    }

    async fn handle_bus_message(&self, payload: &str) {
        let message: BusMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "malformed bus message");
                return;
            }
        };
        // Messages from this instance were already delivered locally.
        if message.server_id == self.options.server_id {
            return;
        }
        let exclude = message.exclude.unwrap_or_default();
        match message.kind {
            BusTargetKind::Client => {
                if let Some(target) = &message.target {
                    if let Some(entry) = self.client(target).await {
                        self.deliver(&entry, &message.event, &message.data).await;
                    }
                }
            }
            BusTargetKind::User => {
                if let Some(target) = &message.target {
                    self.local_user(target, &message.event, &message.data).await;
                }
            }
            BusTargetKind::Room => {
                if let Some(target) = &message.target {
                    self.local_room(target, &message.event, &message.data, &exclude)
                        .await;
                }
            }
            BusTargetKind::Broadcast => {
                self.local_broadcast(&message.event, &message.data, &exclude).await;
            }
        }
    }

    async fn remove_client(&self, client_id: &str) -> Option<Arc<ClientEntry>> {
        let entry = self.clients.write().await.remove(client_id)?;
        entry.cancel_auth_timer();
        entry.transition(ClientState::Disconnected);

        if let Some(user_id) = entry.user_id() {
            let mut users = self.users.write().await;
            if let Some(ids) = users.get_mut(&user_id) {
                ids.remove(client_id);
                if ids.is_empty() {
                    users.remove(&user_id);
                }
            }
        }
        for room in entry.rooms() {
            self.remove_from_room(client_id, &room).await;
        }
        self.broadcast_subscribers.write().await.remove(client_id);
        Some(entry)
    }
}

fn room_list(data: Option<&Value>) -> Vec<String> {
    data.and_then(|d| d.get("rooms"))
        .and_then(Value::as_array)
        .map(|rooms| {
            rooms
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
