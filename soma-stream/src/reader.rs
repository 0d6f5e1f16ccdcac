//! Self-pacing stream reader
//!
//! One reader owns one live source on a dedicated thread. Each iteration
//! reads a frame and hands it to the [`FrameHandler`], which blocks until
//! detection is done. The time spent handling decides how many buffered
//! frames are discarded before the next read, so a slow detector never makes
//! the reader fall further and further behind the live feed.

use crate::error::StreamError;
use crate::source::{SourceOpener, VideoSource};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use metrics::{counter, gauge, Counter, Gauge};
use parking_lot::RwLock;
use soma_core::{Frame, FrameHandler, StreamConfig};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// Number of buffered frames to discard after spending `handling` on one
/// frame of a stream producing a frame every `interval`.
pub fn frames_to_skip(handling: Duration, interval: Duration) -> usize {
    if interval.is_zero() {
        return 0;
    }
    let skip = handling.as_nanos() / interval.as_nanos();
    usize::try_from(skip).unwrap_or(usize::MAX)
}

/// Snapshot of a reader's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Successful opens
    pub connects: u64,
    /// Failed opens
    pub open_failures: u64,
    /// Reconnects forced by a stalled source
    pub stall_reconnects: u64,
    pub frames_read: u64,
    pub failed_reads: u64,
    pub frames_skipped: u64,
    /// Frames whose handler panicked
    pub handler_panics: u64,
    /// Failed reads since the last good frame
    pub consecutive_failures: u64,
    /// Skip count applied before the next read
    pub current_skip: u64,
}

#[derive(Default)]
struct Counters {
    connects: AtomicU64,
    open_failures: AtomicU64,
    stall_reconnects: AtomicU64,
    frames_read: AtomicU64,
    failed_reads: AtomicU64,
    frames_skipped: AtomicU64,
    handler_panics: AtomicU64,
    consecutive_failures: AtomicU64,
    current_skip: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> StreamStats {
        StreamStats {
            connects: self.connects.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            stall_reconnects: self.stall_reconnects.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            failed_reads: self.failed_reads.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            current_skip: self.current_skip.load(Ordering::Relaxed),
        }
    }
}

/// Metric handles labelled with the stream id, registered once per reader
struct StreamMetrics {
    frames: Counter,
    failed_reads: Counter,
    skipped: Counter,
    reconnects: Counter,
    handler_panics: Counter,
    handle_ms: Gauge,
}

impl StreamMetrics {
    fn new(stream: &str) -> Self {
        let stream = stream.to_string();
        Self {
            frames: counter!("soma_stream_frames_total", "stream" => stream.clone()),
            failed_reads: counter!("soma_stream_read_failures_total", "stream" => stream.clone()),
            skipped: counter!("soma_stream_frames_skipped_total", "stream" => stream.clone()),
            reconnects: counter!("soma_stream_reconnects_total", "stream" => stream.clone()),
            handler_panics: counter!("soma_stream_handler_panics_total", "stream" => stream.clone()),
            handle_ms: gauge!("soma_stream_handle_ms", "stream" => stream),
        }
    }
}

/// Clears the running flag when the read thread exits, unwinding included.
struct RunningGuard(Arc<RwLock<bool>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        *self.0.write() = false;
    }
}

/// Reads one live stream on its own thread until stopped.
pub struct StreamReader {
    id: Arc<str>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    is_running: Arc<RwLock<bool>>,
    counters: Arc<Counters>,
}

impl StreamReader {
    /// Spawn the read loop for `config`.
    ///
    /// Returns once the thread is running; opening the source happens on the
    /// thread and is retried until [`StreamReader::stop`].
    pub fn start(
        config: StreamConfig,
        opener: Arc<dyn SourceOpener>,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Self, StreamError> {
        if config.uri.is_empty() {
            return Err(StreamError::open("", "stream uri is empty"));
        }

        let id: Arc<str> = Arc::from(config.passage_id.as_str());
        let (stop_tx, stop_rx) = channel::bounded(0);
        let is_running = Arc::new(RwLock::new(true));
        let counters = Arc::new(Counters::default());

        let read_loop = ReadLoop {
            id: Arc::clone(&id),
            config,
            opener,
            handler,
            stop_rx,
            counters: Arc::clone(&counters),
            metrics: StreamMetrics::new(&id),
        };
        let running = RunningGuard(Arc::clone(&is_running));
        let thread = std::thread::Builder::new()
            .name(format!("soma-stream-{}", id))
            .spawn(move || {
                let _running = running;
                read_loop.run();
            })?;

        Ok(Self {
            id,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            is_running,
            counters,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        *self.is_running.read()
    }

    /// Signal the loop to exit and wait for the thread. Idempotent.
    ///
    /// Blocks until the frame currently being handled completes.
    pub fn stop(&mut self) {
        // dropping the sender disconnects the loop's stop channel
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(stream = %self.id, "Stream reader thread panicked");
            }
            *self.is_running.write() = false;
        }
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Connection {
    source: Box<dyn VideoSource>,
    last_success: Instant,
    consecutive_failures: u64,
    skip: usize,
}

struct ReadLoop {
    id: Arc<str>,
    config: StreamConfig,
    opener: Arc<dyn SourceOpener>,
    handler: Arc<dyn FrameHandler>,
    stop_rx: Receiver<()>,
    counters: Arc<Counters>,
    metrics: StreamMetrics,
}

impl ReadLoop {
    fn run(self) {
        let span = info_span!("stream", stream = %self.id);
        let _entered = span.enter();
        info!(uri = %self.config.uri, "Stream reader started");

        let frame_interval = self.config.frame_interval();
        let stuck_threshold = self.config.stuck_threshold();
        let mut connection: Option<Connection> = None;
        let mut sequence: u64 = 0;

        while !self.stop_requested() {
            let Some(conn) = connection.as_mut() else {
                connection = self.connect();
                if connection.is_none() && !self.wait(self.config.reconnect_backoff()) {
                    break;
                }
                continue;
            };

            if conn.consecutive_failures > 0 && conn.last_success.elapsed() > stuck_threshold {
                warn!(
                    failed_reads = conn.consecutive_failures,
                    stalled_ms = conn.last_success.elapsed().as_millis() as u64,
                    "Stream stalled, reconnecting"
                );
                if let Some(conn) = connection.take() {
                    self.close(conn);
                }
                self.counters.stall_reconnects.fetch_add(1, Ordering::Relaxed);
                self.counters.consecutive_failures.store(0, Ordering::Relaxed);
                self.counters.current_skip.store(0, Ordering::Relaxed);
                self.metrics.reconnects.increment(1);
                continue;
            }

            if conn.skip > 0 {
                conn.source.grab(conn.skip);
                self.counters
                    .frames_skipped
                    .fetch_add(conn.skip as u64, Ordering::Relaxed);
                self.metrics.skipped.increment(conn.skip as u64);
            }

            let Some(pixels) = conn.source.read() else {
                conn.consecutive_failures += 1;
                self.counters.failed_reads.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .consecutive_failures
                    .store(conn.consecutive_failures, Ordering::Relaxed);
                self.metrics.failed_reads.increment(1);
                debug!(failed_reads = conn.consecutive_failures, "Failed to read frame");
                if !self.wait(self.config.read_retry()) {
                    break;
                }
                continue;
            };

            let frame = Frame::capture(Arc::clone(&self.id), sequence, pixels);
            sequence += 1;
            self.counters.frames_read.fetch_add(1, Ordering::Relaxed);
            self.metrics.frames.increment(1);

            let started = Instant::now();
            let handled =
                panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle_frame(frame)));
            let handling = started.elapsed();
            if handled.is_err() {
                self.counters.handler_panics.fetch_add(1, Ordering::Relaxed);
                self.metrics.handler_panics.increment(1);
                error!(frame = sequence - 1, "Frame handler panicked, frame dropped");
            }

            conn.skip = frames_to_skip(handling, frame_interval);
            conn.last_success = Instant::now();
            conn.consecutive_failures = 0;
            self.counters.consecutive_failures.store(0, Ordering::Relaxed);
            self.counters
                .current_skip
                .store(conn.skip as u64, Ordering::Relaxed);
            self.metrics.handle_ms.set(handling.as_secs_f64() * 1000.0);
        }

        if let Some(conn) = connection.take() {
            self.close(conn);
        }
        info!("Stream reader stopped");
    }

    fn connect(&self) -> Option<Connection> {
        match self.opener.open(&self.config.uri) {
            Ok(source) => {
                self.counters.connects.fetch_add(1, Ordering::Relaxed);
                info!("Stream connected");
                Some(Connection {
                    source,
                    last_success: Instant::now(),
                    consecutive_failures: 0,
                    skip: 0,
                })
            }
            Err(e) => {
                self.counters.open_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    retry_ms = self.config.reconnect_backoff_ms,
                    "Failed to open stream: {}", e
                );
                None
            }
        }
    }

    fn close(&self, mut conn: Connection) {
        if let Err(e) = conn.source.close() {
            warn!("Failed to close stream: {}", e);
        }
    }

    fn stop_requested(&self) -> bool {
        matches!(self.stop_rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `duration` unless stopped first; false means stop.
    fn wait(&self, duration: Duration) -> bool {
        matches!(
            self.stop_rx.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }
}
