//! Scripted sources and recording handlers shared by soma-stream tests

#![allow(dead_code)]

use parking_lot::Mutex;
use soma_core::{Frame, FrameHandler, FrameSize, PixelBuffer, PixelFormat};
use soma_stream::{SourceOpener, StreamError, VideoSource};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const FRAME_SIZE: FrameSize = FrameSize::new(32, 24);

pub fn pixels() -> PixelBuffer {
    PixelBuffer::filled(FRAME_SIZE, PixelFormat::Bgr8, 90)
}

/// How a scripted connection behaves
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Every read yields a frame
    Healthy,
    /// `n` frames, then every read fails
    FailAfter(usize),
    /// Failed and good reads alternate, starting with a good one
    Alternate,
}

#[derive(Debug, Default)]
pub struct Events {
    pub open_attempts: usize,
    pub opens: usize,
    pub closes: usize,
    pub reads: usize,
    pub grabs: Vec<usize>,
}

pub struct ScriptedOpener {
    failing_opens: Mutex<usize>,
    scripts: Mutex<VecDeque<Script>>,
    pub events: Arc<Mutex<Events>>,
}

impl ScriptedOpener {
    /// First `failing_opens` opens fail; connections then follow `scripts`
    /// in order and are healthy once the scripts run out.
    pub fn new(failing_opens: usize, scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            failing_opens: Mutex::new(failing_opens),
            scripts: Mutex::new(scripts.into()),
            events: Arc::new(Mutex::new(Events::default())),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(usize::MAX, Vec::new())
    }
}

impl SourceOpener for ScriptedOpener {
    fn open(&self, uri: &str) -> Result<Box<dyn VideoSource>, StreamError> {
        self.events.lock().open_attempts += 1;
        {
            let mut failing = self.failing_opens.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(StreamError::open(uri, "connection refused"));
            }
        }
        self.events.lock().opens += 1;
        let script = self.scripts.lock().pop_front().unwrap_or(Script::Healthy);
        Ok(Box::new(ScriptedSource {
            script,
            reads: 0,
            events: Arc::clone(&self.events),
        }))
    }
}

struct ScriptedSource {
    script: Script,
    reads: usize,
    events: Arc<Mutex<Events>>,
}

impl VideoSource for ScriptedSource {
    fn grab(&mut self, frames: usize) {
        self.events.lock().grabs.push(frames);
    }

    fn read(&mut self) -> Option<PixelBuffer> {
        let n = self.reads;
        self.reads += 1;
        self.events.lock().reads += 1;
        let ok = match self.script {
            Script::Healthy => true,
            Script::FailAfter(good) => n < good,
            Script::Alternate => n % 2 == 0,
        };
        ok.then(pixels)
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.events.lock().closes += 1;
        Ok(())
    }
}

/// Records frames and spends `delay` on each one
#[derive(Default)]
pub struct RecordingHandler {
    pub frames: Mutex<Vec<(String, u64)>>,
    pub delay: Duration,
}

impl RecordingHandler {
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl FrameHandler for RecordingHandler {
    fn handle_frame(&self, frame: Frame) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.frames
            .lock()
            .push((frame.source().to_string(), frame.sequence()));
    }
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
