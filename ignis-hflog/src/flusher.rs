use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ignis_core::container::BoxFuture;
use ignis_core::LifecycleTask;

use crate::ring::{LogRecord, RingBuffer, SLOT_COUNT};

/// Default flush tick.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Where drained entries go.
pub trait LogSink: Send + 'static {
    fn write_record(&mut self, record: &LogRecord);

    /// Called when the reader detected an overrun and skipped ahead.
    fn write_overflow(&mut self, skipped: u32);

    fn flush(&mut self) {}
}

/// Text-stream sink: one line per entry.
pub struct WriterSink<W: Write + Send + 'static> {
    inner: W,
}

impl<W: Write + Send + 'static> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write + Send + 'static> LogSink for WriterSink<W> {
    fn write_record(&mut self, record: &LogRecord) {
        let _ = writeln!(
            self.inner,
            "{} [{}] {}: {}",
            record.timestamp_nanos,
            record.level.as_str(),
            record.scope,
            record.message
        );
    }

    fn write_overflow(&mut self, skipped: u32) {
        let _ = writeln!(self.inner, "!! ring overflow, {skipped} entries lost");
    }

    fn flush(&mut self) {
        let _ = self.inner.flush();
    }
}

struct FlushState {
    read_cursor: u32,
    sink: Box<dyn LogSink>,
}

/// Cooperative reader draining the ring to a sink.
///
/// Trails the write cursor in insertion order; when writers lap it by a
/// full ring it skips ahead, emitting an overflow marker instead of
/// failing. Falling behind a slow sink is bounded by the ring size.
pub struct Flusher {
    ring: Arc<RingBuffer>,
    state: Mutex<FlushState>,
}

impl Flusher {
    pub fn new(ring: Arc<RingBuffer>, sink: Box<dyn LogSink>) -> Self {
        Self {
            ring,
            state: Mutex::new(FlushState {
                read_cursor: 0,
                sink,
            }),
        }
    }

    /// Drain all pending entries. Returns how many were written.
    pub fn flush(&self) -> usize {
        let mut state = self.state.lock().expect("flusher lock poisoned");
        let write = self.ring.write_cursor();

        let lag = write.wrapping_sub(state.read_cursor);
        if lag as usize > SLOT_COUNT {
            let new_read = write.wrapping_sub(SLOT_COUNT as u32);
            let skipped = new_read.wrapping_sub(state.read_cursor);
            state.sink.write_overflow(skipped);
            state.read_cursor = new_read;
        }

        let mut drained = 0;
        while state.read_cursor != write {
            match self.ring.read(state.read_cursor) {
                Some(record) => {
                    state.sink.write_record(&record);
                    state.read_cursor = state.read_cursor.wrapping_add(1);
                    drained += 1;
                }
                // Not yet published (or lapped mid-read): stop here so
                // emission stays in insertion order.
                None => break,
            }
        }
        state.sink.flush();
        drained
    }

    /// Arm the periodic flush task.
    pub fn start(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let flusher = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        flusher.flush();
                        break;
                    }
                    _ = ticker.tick() => {
                        flusher.flush();
                    }
                }
            }
        })
    }
}

/// Adapter so the flusher plugs into the application lifecycle.
pub struct FlusherTask {
    flusher: Arc<Flusher>,
    interval: Duration,
}

impl FlusherTask {
    pub fn new(flusher: Arc<Flusher>) -> Self {
        Self {
            flusher,
            interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl LifecycleTask for FlusherTask {
    fn name(&self) -> &str {
        "hflog-flusher"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let handle = self.flusher.start(self.interval, shutdown);
            let _ = handle.await;
        })
    }
}
