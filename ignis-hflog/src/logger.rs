use std::sync::Arc;

use dashmap::DashMap;

use crate::ring::{Level, RingBuffer, ScopeBytes, MAX_MSG_LEN};

/// A message pre-encoded for the ring's fixed-width field.
///
/// Interned by [`HfLogger::encode_message`]: identical inputs share the
/// same underlying buffer, so hot-path appends never re-encode.
pub struct EncodedMessage {
    bytes: Box<[u8]>,
}

impl EncodedMessage {
    fn encode(text: &str) -> Self {
        let raw = text.as_bytes();
        let len = raw.len().min(MAX_MSG_LEN);
        Self {
            bytes: raw[..len].to_vec().into_boxed_slice(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A named logging scope bound to the shared ring.
///
/// Cheap to clone out of the logger's cache; appends are lock-free.
pub struct HfScope {
    name: String,
    scope: ScopeBytes,
    ring: Arc<RingBuffer>,
}

impl HfScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a pre-encoded message at the given level. Never fails.
    pub fn log(&self, level: Level, message: &EncodedMessage) {
        self.ring.append(level, &self.scope, message.bytes());
    }

    /// Append an ad-hoc message, encoding it on the spot. Prefer
    /// [`HfScope::log`] with an interned message in hot paths.
    pub fn log_text(&self, level: Level, text: &str) {
        self.ring.append(level, &self.scope, text.as_bytes());
    }

    pub fn trace(&self, message: &EncodedMessage) {
        self.log(Level::Trace, message);
    }

    pub fn debug(&self, message: &EncodedMessage) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: &EncodedMessage) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: &EncodedMessage) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: &EncodedMessage) {
        self.log(Level::Error, message);
    }
}

/// Front door of the high-frequency logger: scope instances and the
/// message interning cache over one shared ring buffer.
pub struct HfLogger {
    ring: Arc<RingBuffer>,
    scopes: DashMap<String, Arc<HfScope>>,
    messages: DashMap<String, Arc<EncodedMessage>>,
}

impl HfLogger {
    pub fn new() -> Self {
        Self {
            ring: Arc::new(RingBuffer::new()),
            scopes: DashMap::new(),
            messages: DashMap::new(),
        }
    }

    pub fn ring(&self) -> Arc<RingBuffer> {
        self.ring.clone()
    }

    /// Scope instance for `name`. Cached: repeated calls are O(1) and
    /// return the same instance.
    pub fn scope(&self, name: &str) -> Arc<HfScope> {
        if let Some(existing) = self.scopes.get(name) {
            return existing.value().clone();
        }
        self.scopes
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(HfScope {
                    name: name.to_string(),
                    scope: ScopeBytes::encode(name),
                    ring: self.ring.clone(),
                })
            })
            .clone()
    }

    /// Pre-encode a message. Identical inputs return the same buffer.
    pub fn encode_message(&self, text: &str) -> Arc<EncodedMessage> {
        if let Some(existing) = self.messages.get(text) {
            return existing.value().clone();
        }
        self.messages
            .entry(text.to_string())
            .or_insert_with(|| Arc::new(EncodedMessage::encode(text)))
            .clone()
    }
}

impl Default for HfLogger {
    fn default() -> Self {
        Self::new()
    }
}
