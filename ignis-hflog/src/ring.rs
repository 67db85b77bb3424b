use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of slots in the ring. Power of two so the slot index is a mask.
pub const SLOT_COUNT: usize = 1 << 16;
/// Fixed scope field width.
pub const SCOPE_LEN: usize = 32;
/// Maximum encoded message length.
pub const MAX_MSG_LEN: usize = 215;

/// Log severity, encoded as one byte in the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            _ => Level::Error,
        }
    }
}

/// A scope name pre-encoded to the fixed 32-byte field.
#[derive(Debug, Clone, Copy)]
pub struct ScopeBytes {
    bytes: [u8; SCOPE_LEN],
    len: u8,
}

impl ScopeBytes {
    /// Truncate or zero-pad `name` to the scope field width.
    pub fn encode(name: &str) -> Self {
        let mut bytes = [0u8; SCOPE_LEN];
        let raw = name.as_bytes();
        let len = raw.len().min(SCOPE_LEN);
        bytes[..len].copy_from_slice(&raw[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }
}

/// A decoded ring entry, as handed to the flusher's sink.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub sequence: u32,
    pub timestamp_nanos: u64,
    pub level: Level,
    pub scope: String,
    pub message: String,
}

#[derive(Clone, Copy)]
struct Payload {
    timestamp_nanos: u64,
    level: u8,
    scope_len: u8,
    msg_len: u8,
    scope: [u8; SCOPE_LEN],
    msg: [u8; MAX_MSG_LEN],
}

impl Payload {
    const fn zeroed() -> Self {
        Self {
            timestamp_nanos: 0,
            level: 0,
            scope_len: 0,
            msg_len: 0,
            scope: [0; SCOPE_LEN],
            msg: [0; MAX_MSG_LEN],
        }
    }
}

struct Slot {
    /// Publication marker: `sequence + 1` once the payload is complete,
    /// 0 while unwritten or mid-write.
    ready: AtomicU32,
    payload: UnsafeCell<Payload>,
}

impl Slot {
    fn new() -> Self {
        Self {
            ready: AtomicU32::new(0),
            payload: UnsafeCell::new(Payload::zeroed()),
        }
    }
}

/// Fixed-size multi-producer ring over pre-encoded log entries.
///
/// Writers claim a sequence with an atomic fetch-and-add and publish the
/// slot with a release store of `sequence + 1`; the reader accepts a slot
/// only when the marker matches, re-checking after the copy so a write
/// that lapped the reader is detected instead of surfacing torn data.
pub struct RingBuffer {
    slots: Box<[Slot]>,
    write_cursor: AtomicU32,
}

// Safety: the payload cell of a slot is written only between the marker
// invalidation and the release publication for the claimed sequence, and
// read only under the double-checked marker protocol in `read`.
unsafe impl Sync for RingBuffer {}
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    pub fn new() -> Self {
        let slots: Vec<Slot> = (0..SLOT_COUNT).map(|_| Slot::new()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            write_cursor: AtomicU32::new(0),
        }
    }

    /// Lock-free append. Never fails; an overrun overwrites the oldest
    /// unread slot.
    pub fn append(&self, level: Level, scope: &ScopeBytes, msg: &[u8]) -> u32 {
        let sequence = self.write_cursor.fetch_add(1, Ordering::Relaxed);
        let slot = &self.slots[(sequence as usize) & (SLOT_COUNT - 1)];

        slot.ready.store(0, Ordering::Relaxed);
        // Safety: this writer owns the slot between the marker stores.
        unsafe {
            let payload = &mut *slot.payload.get();
            payload.timestamp_nanos = now_nanos();
            payload.level = level as u8;
            payload.scope_len = scope.len;
            payload.scope = scope.bytes;
            let len = msg.len().min(MAX_MSG_LEN);
            payload.msg_len = len as u8;
            payload.msg[..len].copy_from_slice(&msg[..len]);
        }
        slot.ready.store(sequence.wrapping_add(1), Ordering::Release);
        sequence
    }

    pub fn write_cursor(&self) -> u32 {
        self.write_cursor.load(Ordering::Acquire)
    }

    /// Read the entry published for `sequence`, or `None` when it has not
    /// been published yet or was already overwritten.
    pub fn read(&self, sequence: u32) -> Option<LogRecord> {
        let slot = &self.slots[(sequence as usize) & (SLOT_COUNT - 1)];
        let expected = sequence.wrapping_add(1);
        if slot.ready.load(Ordering::Acquire) != expected {
            return None;
        }
        // Safety: marker matched; the copy is validated below.
        let payload = unsafe { *slot.payload.get() };
        if slot.ready.load(Ordering::Acquire) != expected {
            return None;
        }

        let scope_len = (payload.scope_len as usize).min(SCOPE_LEN);
        let msg_len = (payload.msg_len as usize).min(MAX_MSG_LEN);
        Some(LogRecord {
            sequence,
            timestamp_nanos: payload.timestamp_nanos,
            level: Level::from_u8(payload.level),
            scope: String::from_utf8_lossy(&payload.scope[..scope_len]).into_owned(),
            message: String::from_utf8_lossy(&payload.msg[..msg_len]).into_owned(),
        })
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn append_read_round_trip() {
        let ring = RingBuffer::new();
        let scope = ScopeBytes::encode("orders");
        let seq = ring.append(Level::Info, &scope, b"order placed");
        let record = ring.read(seq).unwrap();
        assert_eq!(record.sequence, seq);
        assert_eq!(record.level, Level::Info);
        assert_eq!(record.scope, "orders");
        assert_eq!(record.message, "order placed");
        assert!(record.timestamp_nanos > 0);
    }

    #[test]
    fn unpublished_slot_reads_none() {
        let ring = RingBuffer::new();
        assert!(ring.read(0).is_none());
        assert!(ring.read(123).is_none());
    }

    #[test]
    fn scope_and_message_are_truncated_to_field_widths() {
        let ring = RingBuffer::new();
        let long_scope = "s".repeat(100);
        let long_msg = "m".repeat(1000);
        let scope = ScopeBytes::encode(&long_scope);
        let seq = ring.append(Level::Warn, &scope, long_msg.as_bytes());
        let record = ring.read(seq).unwrap();
        assert_eq!(record.scope.len(), SCOPE_LEN);
        assert_eq!(record.message.len(), MAX_MSG_LEN);
    }

    #[test]
    fn sequences_are_dense() {
        let ring = RingBuffer::new();
        let scope = ScopeBytes::encode("seq");
        let first = ring.append(Level::Debug, &scope, b"a");
        let second = ring.append(Level::Debug, &scope, b"b");
        assert_eq!(second, first + 1);
    }

    #[test]
    fn concurrent_writers_claim_unique_sequences() {
        let ring = Arc::new(RingBuffer::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let ring = ring.clone();
            handles.push(std::thread::spawn(move || {
                let scope = ScopeBytes::encode("writer");
                let mut seqs = Vec::with_capacity(1000);
                for i in 0..1000 {
                    let msg = format!("t{t} m{i}");
                    seqs.push(ring.append(Level::Info, &scope, msg.as_bytes()));
                }
                seqs
            }));
        }
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
        assert_eq!(ring.write_cursor(), 4000);
    }
}
