//! Authenticated realtime layer for Ignis.
//!
//! A runtime-agnostic server helper over a socket capability: clients
//! authenticate after connecting, join validated rooms, and receive
//! messages fanned out locally or across instances through the pub/sub
//! store, with an optional per-client outbound transform.

pub mod client;
pub mod envelope;
pub mod server;

pub use client::{ClientEntry, ClientInfo, ClientSocket, ClientState};
pub use envelope::{
    channel_client, channel_room, channel_user, BusMessage, BusTargetKind, Envelope,
    CHANNEL_BROADCAST, CLOSE_AUTH_FAILURE, CLOSE_AUTH_TIMEOUT, CLOSE_ENCRYPTION_REQUIRED,
    CLOSE_HEARTBEAT_TIMEOUT, CLOSE_SERVER_SHUTDOWN, EVENT_AUTHENTICATE, EVENT_CONNECTED,
    EVENT_ENCRYPTED, EVENT_ERROR, EVENT_HEARTBEAT, EVENT_JOIN, EVENT_LEAVE, PATTERN_ALL,
};
pub use server::{
    AuthResult, AuthenticateFn, ClientEventFn, HandshakeFn, HandshakeKeys, HandshakeRequest,
    MessageHandlerFn, RoomRequest, TransformFn, ValidateRoomFn, WsServerBuilder, WsServerHelper,
    WsServerOptions,
};
