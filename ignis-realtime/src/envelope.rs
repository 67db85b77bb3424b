use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON wire envelope shared by both realtime variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data: Some(data),
            id: None,
        }
    }

    pub fn event_only(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: None,
            id: None,
        }
    }
}

// Client-emitted events.
pub const EVENT_AUTHENTICATE: &str = "authenticate";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_JOIN: &str = "join";
pub const EVENT_LEAVE: &str = "leave";

// Server-emitted events.
pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_ENCRYPTED: &str = "encrypted";

// Close codes.
pub const CLOSE_AUTH_TIMEOUT: u16 = 4001;
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4002;
pub const CLOSE_AUTH_FAILURE: u16 = 4003;
pub const CLOSE_ENCRYPTION_REQUIRED: u16 = 4004;
pub const CLOSE_SERVER_SHUTDOWN: u16 = 1001;

// Pub/sub channels.
pub const CHANNEL_BROADCAST: &str = "ws:broadcast";
pub const PATTERN_ALL: &str = "ws:*";

pub fn channel_room(room: &str) -> String {
    format!("ws:room:{room}")
}

pub fn channel_client(client_id: &str) -> String {
    format!("ws:client:{client_id}")
}

pub fn channel_user(user_id: &str) -> String {
    format!("ws:user:{user_id}")
}

/// Cross-instance fan-out payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub server_id: String,
    #[serde(rename = "type")]
    pub kind: BusTargetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub event: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusTargetKind {
    Client,
    User,
    Room,
    Broadcast,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_omits_absent_fields() {
        let text = serde_json::to_string(&Envelope::event_only("heartbeat")).unwrap();
        assert_eq!(text, r#"{"event":"heartbeat"}"#);
    }

    #[test]
    fn bus_message_wire_shape() {
        let message = BusMessage {
            server_id: "srv-1".into(),
            kind: BusTargetKind::Room,
            target: Some("game-1".into()),
            event: "state".into(),
            data: json!({"tick": 1}),
            exclude: None,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["serverId"], "srv-1");
        assert_eq!(value["type"], "room");
        assert_eq!(value["target"], "game-1");
        let round: BusMessage = serde_json::from_value(value).unwrap();
        assert_eq!(round, message);
    }

    #[test]
    fn channel_names() {
        assert_eq!(channel_room("game-1"), "ws:room:game-1");
        assert_eq!(channel_client("c1"), "ws:client:c1");
        assert_eq!(channel_user("u1"), "ws:user:u1");
    }
}
