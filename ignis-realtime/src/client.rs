use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use ignis_core::helpers::now_millis;
use ignis_core::IgnisError;

/// Authentication state of a realtime client. Transitions from
/// `Unauthorized` are monotonic except the terminal `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unauthorized,
    Authenticating,
    Authenticated,
    Disconnected,
}

/// The transport capability the realtime helper writes to.
///
/// The pure-WebSocket and Socket.IO variants provide their own adapters;
/// the helper only needs text writes, close, and liveness.
#[async_trait]
pub trait ClientSocket: Send + Sync + 'static {
    /// Write a text frame. Fails with `kind=transport-closed` when the
    /// socket is no longer open.
    async fn send_text(&self, text: &str) -> Result<(), IgnisError>;

    async fn close(&self, code: u16, reason: &str);

    fn is_open(&self) -> bool;
}

#[derive(Debug)]
struct ClientMutable {
    state: ClientState,
    user_id: Option<String>,
    rooms: HashSet<String>,
    backpressured: bool,
    encrypted: bool,
    last_activity: i64,
    metadata: Option<Value>,
    server_public_key: Option<String>,
    salt: Option<String>,
}

/// One connected client, owned by the server helper.
pub struct ClientEntry {
    pub id: String,
    pub connected_at: i64,
    socket: Arc<dyn ClientSocket>,
    inner: Mutex<ClientMutable>,
    auth_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ClientEntry {
    pub fn new(id: String, socket: Arc<dyn ClientSocket>) -> Self {
        let now = now_millis();
        Self {
            id,
            connected_at: now,
            socket,
            inner: Mutex::new(ClientMutable {
                state: ClientState::Unauthorized,
                user_id: None,
                rooms: HashSet::new(),
                backpressured: false,
                encrypted: false,
                last_activity: now,
                metadata: None,
                server_public_key: None,
                salt: None,
            }),
            auth_timer: Mutex::new(None),
        }
    }

    pub fn socket(&self) -> Arc<dyn ClientSocket> {
        self.socket.clone()
    }

    pub fn state(&self) -> ClientState {
        self.lock().state
    }

    /// Attempt a state transition; invalid transitions are ignored and
    /// return false. `Disconnected` is terminal.
    pub fn transition(&self, to: ClientState) -> bool {
        let mut inner = self.lock();
        let allowed = match (inner.state, to) {
            (ClientState::Disconnected, _) => false,
            (_, ClientState::Disconnected) => true,
            (ClientState::Unauthorized, ClientState::Authenticating) => true,
            (ClientState::Authenticating, ClientState::Authenticated) => true,
            _ => false,
        };
        if allowed {
            inner.state = to;
        }
        allowed
    }

    pub fn user_id(&self) -> Option<String> {
        self.lock().user_id.clone()
    }

    pub fn set_identity(&self, user_id: Option<String>, metadata: Option<Value>) {
        let mut inner = self.lock();
        inner.user_id = user_id;
        inner.metadata = metadata;
    }

    /// Mark the client encrypted and record the handshake material. The
    /// flag is monotonic for the lifetime of the connection.
    pub fn enable_encryption(&self, server_public_key: String, salt: String) {
        let mut inner = self.lock();
        inner.encrypted = true;
        inner.server_public_key = Some(server_public_key);
        inner.salt = Some(salt);
    }

    pub fn is_encrypted(&self) -> bool {
        self.lock().encrypted
    }

    pub fn touch(&self) {
        self.lock().last_activity = now_millis();
    }

    pub fn last_activity(&self) -> i64 {
        self.lock().last_activity
    }

    pub fn set_backpressured(&self, value: bool) {
        self.lock().backpressured = value;
    }

    pub fn is_backpressured(&self) -> bool {
        self.lock().backpressured
    }

    pub fn join_room(&self, room: &str) {
        self.lock().rooms.insert(room.to_string());
    }

    pub fn leave_room(&self, room: &str) {
        self.lock().rooms.remove(room);
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.lock().rooms.contains(room)
    }

    pub fn rooms(&self) -> Vec<String> {
        self.lock().rooms.iter().cloned().collect()
    }

    pub fn set_auth_timer(&self, handle: JoinHandle<()>) {
        let mut timer = self.auth_timer.lock().expect("auth timer lock poisoned");
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel_auth_timer(&self) {
        if let Some(handle) = self.auth_timer.lock().expect("auth timer lock poisoned").take() {
            handle.abort();
        }
    }

    /// Immutable snapshot handed to callbacks and transforms.
    pub fn snapshot(&self) -> ClientInfo {
        let inner = self.lock();
        ClientInfo {
            id: self.id.clone(),
            user_id: inner.user_id.clone(),
            state: inner.state,
            rooms: inner.rooms.iter().cloned().collect(),
            encrypted: inner.encrypted,
            backpressured: inner.backpressured,
            connected_at: self.connected_at,
            last_activity: inner.last_activity,
            metadata: inner.metadata.clone(),
            server_public_key: inner.server_public_key.clone(),
            salt: inner.salt.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClientMutable> {
        self.inner.lock().expect("client state lock poisoned")
    }
}

/// Point-in-time view of a client entry.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: String,
    pub user_id: Option<String>,
    pub state: ClientState,
    pub rooms: Vec<String>,
    pub encrypted: bool,
    pub backpressured: bool,
    pub connected_at: i64,
    pub last_activity: i64,
    pub metadata: Option<Value>,
    pub server_public_key: Option<String>,
    pub salt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSocket;

    #[async_trait]
    impl ClientSocket for NullSocket {
        async fn send_text(&self, _text: &str) -> Result<(), IgnisError> {
            Ok(())
        }
        async fn close(&self, _code: u16, _reason: &str) {}
        fn is_open(&self) -> bool {
            true
        }
    }

    fn entry() -> ClientEntry {
        ClientEntry::new("c1".into(), Arc::new(NullSocket))
    }

    #[test]
    fn state_transitions_are_monotonic() {
        let client = entry();
        assert_eq!(client.state(), ClientState::Unauthorized);
        assert!(!client.transition(ClientState::Authenticated));
        assert!(client.transition(ClientState::Authenticating));
        assert!(client.transition(ClientState::Authenticated));
        assert!(!client.transition(ClientState::Authenticating));
        assert!(client.transition(ClientState::Disconnected));
        assert!(!client.transition(ClientState::Authenticated));
    }

    #[test]
    fn encryption_flag_is_monotonic() {
        let client = entry();
        assert!(!client.is_encrypted());
        client.enable_encryption("pk".into(), "salt".into());
        assert!(client.is_encrypted());
        let info = client.snapshot();
        assert_eq!(info.server_public_key.as_deref(), Some("pk"));
        assert_eq!(info.salt.as_deref(), Some("salt"));
    }

    #[test]
    fn room_membership_round_trip() {
        let client = entry();
        client.join_room("a");
        client.join_room("b");
        client.leave_room("a");
        assert!(!client.in_room("a"));
        assert!(client.in_room("b"));
    }
}
