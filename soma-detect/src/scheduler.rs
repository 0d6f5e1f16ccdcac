//! Batch scheduler

use crate::batch::{Accumulator, Batch, CloseReason, Pending};
use crate::config::BatchConfig;
use crate::submission::Submission;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use soma_core::{ConfigError, DetectError, DetectedFrame, Detection, DetectionWorker, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type SharedWorker = Arc<Mutex<Box<dyn DetectionWorker>>>;

/// Counters since the scheduler was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Batches handed to the worker
    pub batches: u64,
    /// Frames handed to the worker
    pub frames: u64,
    /// Batches whose outcome was an error
    pub failed_batches: u64,
    /// Largest batch dispatched so far
    pub largest_batch: u64,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    frames: AtomicU64,
    failed_batches: AtomicU64,
    largest_batch: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            batches: self.batches.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
        }
    }
}

struct State {
    accumulator: Accumulator,
    /// Taken when shutdown starts; closing it lets the dispatcher drain and exit
    dispatch: Option<mpsc::UnboundedSender<Batch>>,
}

impl State {
    fn send(&self, batch: Batch) {
        match &self.dispatch {
            Some(tx) => {
                if let Err(mpsc::error::SendError(batch)) = tx.send(batch) {
                    fail_batch(batch, DetectError::ShuttingDown);
                }
            }
            None => fail_batch(batch, DetectError::ShuttingDown),
        }
    }
}

struct Shared {
    config: BatchConfig,
    state: Mutex<State>,
    runtime: Handle,
    counters: Arc<Counters>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    /// Flips to true once the dispatcher released the worker
    drained: watch::Receiver<bool>,
}

impl Shared {
    fn arm_timer(self: &Arc<Self>, batch_id: u64) -> Option<JoinHandle<()>> {
        let shared = Arc::clone(self);
        let wait = self.config.max_wait;
        Some(self.runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            let mut state = shared.state.lock();
            if let Some(batch) = state.accumulator.close_expired(batch_id) {
                state.send(batch);
            }
        }))
    }
}

/// Groups frames from concurrent producers into batches for a single,
/// non-reentrant [`DetectionWorker`].
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct BatchScheduler {
    shared: Arc<Shared>,
}

impl BatchScheduler {
    /// Create a scheduler on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new<W: DetectionWorker>(config: BatchConfig, worker: W) -> Result<Self, ConfigError> {
        Self::with_runtime(config, worker, Handle::current())
    }

    /// Create a scheduler whose timers and dispatcher run on `runtime`.
    pub fn with_runtime<W: DetectionWorker>(
        config: BatchConfig,
        worker: W,
        runtime: Handle,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let worker: Box<dyn DetectionWorker> = Box::new(worker);
        let worker: SharedWorker = Arc::new(Mutex::new(worker));
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (drained_tx, drained) = watch::channel(false);

        let dispatcher = runtime.spawn(run_dispatcher(
            rx,
            worker,
            Arc::clone(&counters),
            drained_tx,
        ));

        info!(
            frame_size = %config.frame_size,
            max_batch_size = config.max_batch_size,
            max_wait_ms = config.max_wait.as_millis() as u64,
            "Batch scheduler started"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    accumulator: Accumulator::new(config.max_batch_size),
                    dispatch: Some(tx),
                }),
                config,
                runtime,
                counters,
                dispatcher: Mutex::new(Some(dispatcher)),
                drained,
            }),
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.shared.config
    }

    /// Queue a frame for detection.
    ///
    /// Fails synchronously when the frame size does not match the configured
    /// size. Otherwise returns at once; the frame's outcome arrives through
    /// the returned [`Submission`]. After shutdown started the submission
    /// resolves immediately with [`DetectError::ShuttingDown`].
    pub fn submit(&self, frame: Frame) -> Result<Submission, DetectError> {
        let expected = self.shared.config.frame_size;
        if frame.size() != expected {
            return Err(DetectError::InvalidFrameSize {
                expected_width: expected.width,
                expected_height: expected.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }

        let (slot, rx) = oneshot::channel();
        let mut state = self.shared.state.lock();
        if state.dispatch.is_none() {
            return Ok(Submission::failed(DetectError::ShuttingDown));
        }

        let pending = Pending { frame, slot };
        if let Some(batch) = state
            .accumulator
            .push(pending, |id| self.shared.arm_timer(id))
        {
            state.send(batch);
        }

        Ok(Submission::new(rx))
    }

    /// Frames waiting in the batch that is currently accepting submissions
    pub fn pending(&self) -> usize {
        self.shared.state.lock().accumulator.active_len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().dispatch.is_none()
    }

    /// Stop accepting frames, dispatch the batch still accumulating, wait for
    /// every queued batch to resolve and release the worker.
    ///
    /// Concurrent callers all return only after the worker was released.
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if let Some(batch) = state.accumulator.close_active(CloseReason::Shutdown) {
                state.send(batch);
            }
            state.dispatch.take();
        }

        let dispatcher = self.shared.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            info!("Batch scheduler draining");
            if let Err(e) = dispatcher.await {
                error!("Batch dispatcher terminated abnormally: {}", e);
            }
            info!("Batch scheduler stopped");
        }

        // a closed sender means the dispatcher is gone, which also counts as drained
        let mut drained = self.shared.drained.clone();
        let _ = drained.wait_for(|done| *done).await;
    }
}

async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Batch>,
    worker: SharedWorker,
    counters: Arc<Counters>,
    drained: watch::Sender<bool>,
) {
    while let Some(batch) = rx.recv().await {
        dispatch(batch, &worker, &counters).await;
    }
    drop(worker);
    debug!("Detection worker released");
    let _ = drained.send(true);
}

async fn dispatch(batch: Batch, worker: &SharedWorker, counters: &Counters) {
    let Batch {
        id,
        items,
        opened_at,
        closed_by,
    } = batch;
    let size = items.len();
    let (frames, slots): (Vec<Frame>, Vec<oneshot::Sender<_>>) =
        items.into_iter().map(|p| (p.frame, p.slot)).unzip();

    let waited = opened_at.elapsed();
    let started = Instant::now();
    let worker = Arc::clone(worker);
    let joined = tokio::task::spawn_blocking(move || {
        let result = worker.lock().detect(&frames);
        (frames, result)
    })
    .await;

    let result: Result<(Vec<Frame>, Vec<Vec<Detection>>), DetectError> = match joined {
        Ok((frames, Ok(detections))) if detections.len() == frames.len() => Ok((frames, detections)),
        Ok((_, Ok(detections))) => Err(DetectError::ResultCountMismatch {
            expected: size,
            actual: detections.len(),
        }),
        Ok((_, Err(e))) => Err(DetectError::Worker(format!("{:#}", e))),
        Err(e) => Err(DetectError::worker(format!("detection worker panicked: {}", e))),
    };
    let elapsed = started.elapsed();

    counters.batches.fetch_add(1, Ordering::Relaxed);
    counters.frames.fetch_add(size as u64, Ordering::Relaxed);
    counters.largest_batch.fetch_max(size as u64, Ordering::Relaxed);
    counter!("soma_detect_batches_total", "closed_by" => closed_by.as_str()).increment(1);
    counter!("soma_detect_frames_total").increment(size as u64);
    histogram!("soma_detect_batch_duration_ms").record(elapsed.as_secs_f64() * 1000.0);

    match result {
        Ok((frames, detections)) => {
            debug!(
                batch = id,
                batch_size = size,
                closed_by = closed_by.as_str(),
                waited_ms = waited.as_millis() as u64,
                detect_ms = elapsed.as_millis() as u64,
                "Batch detected"
            );
            for ((slot, frame), detections) in slots.into_iter().zip(frames).zip(detections) {
                let _ = slot.send(Ok(DetectedFrame { frame, detections }));
            }
        }
        Err(err) => {
            counters.failed_batches.fetch_add(1, Ordering::Relaxed);
            counter!("soma_detect_batch_failures_total").increment(1);
            warn!(batch = id, batch_size = size, "Batch detection failed: {}", err);
            for slot in slots {
                let _ = slot.send(Err(err.clone()));
            }
        }
    }
}

/// Resolve every submission of a batch that will never reach the worker.
fn fail_batch(batch: Batch, err: DetectError) {
    for pending in batch.items {
        let _ = pending.slot.send(Err(err.clone()));
    }
}
