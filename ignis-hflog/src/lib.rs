//! High-frequency logger for Ignis.
//!
//! A lock-free ring buffer over fixed-size slots, written by any number
//! of producers via atomic fetch-and-add and drained in order by a
//! cooperative flusher. Messages and scopes are pre-encoded and cached
//! so hot-path appends allocate nothing.
//!
//! This complements, not replaces, `tracing`: ordinary diagnostics keep
//! using structured logging, while sub-microsecond paths log here.

pub mod flusher;
pub mod logger;
pub mod ring;

pub use flusher::{Flusher, FlusherTask, LogSink, WriterSink, DEFAULT_FLUSH_INTERVAL};
pub use logger::{EncodedMessage, HfLogger, HfScope};
pub use ring::{Level, LogRecord, RingBuffer, ScopeBytes, MAX_MSG_LEN, SCOPE_LEN, SLOT_COUNT};
