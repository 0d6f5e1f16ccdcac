//! Stream reader behaviour against scripted sources

mod common;

use common::*;
use soma_core::{Frame, FrameHandler, StreamConfig};
use soma_stream::StreamReader;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn stream_config() -> StreamConfig {
    let mut config = StreamConfig::new("rtsp://test/live", "gate-1");
    config.frame_rate = 25;
    config.stuck_threshold_ms = 200;
    config.reconnect_backoff_ms = 50;
    config.read_retry_ms = 20;
    config
}

#[test]
fn test_reader_delivers_frames_in_order() {
    let opener = ScriptedOpener::new(0, vec![Script::Healthy]);
    let handler = RecordingHandler::with_delay(Duration::from_millis(1));

    let mut reader = StreamReader::start(stream_config(), opener.clone(), handler.clone()).unwrap();
    assert_eq!(reader.id(), "gate-1");
    assert!(wait_until(Duration::from_secs(2), || handler.count() >= 5));
    reader.stop();

    let frames = handler.frames.lock().clone();
    assert!(frames.iter().all(|(source, _)| source == "gate-1"));
    let sequences: Vec<u64> = frames.iter().map(|(_, seq)| *seq).collect();
    let expected: Vec<u64> = (0..sequences.len() as u64).collect();
    assert_eq!(sequences, expected);

    let events = opener.events.lock();
    assert_eq!(events.opens, 1);
    assert_eq!(events.closes, 1);
    assert!(!reader.is_running());
    assert_eq!(reader.stats().connects, 1);
    assert_eq!(reader.stats().frames_read, frames.len() as u64);
}

#[test]
fn test_open_retried_at_fixed_interval() {
    let opener = ScriptedOpener::always_failing();
    let handler = RecordingHandler::with_delay(Duration::ZERO);

    let mut reader = StreamReader::start(stream_config(), opener.clone(), handler.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(320));
    reader.stop();

    // 50ms backoff: one attempt at start plus about six retries
    let attempts = opener.events.lock().open_attempts;
    assert!((3..=9).contains(&attempts), "attempts = {}", attempts);
    assert_eq!(reader.stats().open_failures, attempts as u64);
    assert_eq!(reader.stats().connects, 0);
    assert_eq!(handler.count(), 0);
}

#[test]
fn test_connects_after_failed_opens() {
    let opener = ScriptedOpener::new(2, vec![Script::Healthy]);
    let handler = RecordingHandler::with_delay(Duration::from_millis(1));

    let mut reader = StreamReader::start(stream_config(), opener.clone(), handler.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || handler.count() > 0));
    reader.stop();

    let stats = reader.stats();
    assert_eq!(stats.open_failures, 2);
    assert_eq!(stats.connects, 1);
}

#[test]
fn test_stalled_stream_reconnects() {
    let opener = ScriptedOpener::new(0, vec![Script::FailAfter(3), Script::Healthy]);
    let handler = RecordingHandler::with_delay(Duration::from_millis(1));

    let mut reader = StreamReader::start(stream_config(), opener.clone(), handler.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(3), || reader.stats().connects >= 2));
    assert!(wait_until(Duration::from_secs(1), || handler.count() > 3));
    reader.stop();

    let stats = reader.stats();
    assert_eq!(stats.stall_reconnects, 1);
    assert!(stats.failed_reads >= 1);
    // the second connection delivered frames, so the failure counter restarted
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.connects, 2);

    let events = opener.events.lock();
    // stalled connection closed before reopening, second one closed on stop
    assert_eq!(events.closes, 2);
    assert_eq!(events.opens, 2);
}

/// Panics on every third frame
struct FlakyHandler {
    handled: AtomicUsize,
}

impl FrameHandler for FlakyHandler {
    fn handle_frame(&self, frame: Frame) {
        self.handled.fetch_add(1, Ordering::SeqCst);
        if frame.sequence() % 3 == 0 {
            panic!("bad frame {}", frame.sequence());
        }
    }
}

#[test]
fn test_panicking_handler_does_not_kill_reader() {
    let opener = ScriptedOpener::new(0, vec![Script::Healthy]);
    let handler = Arc::new(FlakyHandler {
        handled: AtomicUsize::new(0),
    });

    let mut reader = StreamReader::start(stream_config(), opener.clone(), handler.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        handler.handled.load(Ordering::SeqCst) >= 7
    }));
    assert!(reader.is_running());

    reader.stop();
    assert!(!reader.is_running());
    let stats = reader.stats();
    assert!(stats.handler_panics >= 3);
    assert!(stats.frames_read >= 7);
    assert_eq!(opener.events.lock().closes, 1);
}

#[test]
fn test_intermittent_failures_do_not_reconnect() {
    let mut config = stream_config();
    config.read_retry_ms = 60;
    let opener = ScriptedOpener::new(0, vec![Script::Alternate]);
    let handler = RecordingHandler::with_delay(Duration::ZERO);

    let mut reader = StreamReader::start(config, opener.clone(), handler.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(500));
    reader.stop();

    let stats = reader.stats();
    assert!(stats.failed_reads >= 3, "failed_reads = {}", stats.failed_reads);
    assert_eq!(stats.stall_reconnects, 0);
    assert_eq!(stats.connects, 1);
}

#[test]
fn test_skip_tracks_handling_time() {
    // 25 fps is one frame per 40ms; 100ms of handling means two frames behind
    let opener = ScriptedOpener::new(0, vec![Script::Healthy]);
    let handler = RecordingHandler::with_delay(Duration::from_millis(100));

    let mut reader = StreamReader::start(stream_config(), opener.clone(), handler.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(3), || handler.count() >= 4));
    reader.stop();

    let events = opener.events.lock();
    assert!(!events.grabs.is_empty());
    assert!(
        events.grabs.iter().all(|&n| n == 2),
        "grabs = {:?}",
        events.grabs
    );
    // no skip before the first frame was handled
    assert!(events.grabs.len() < events.reads);

    let stats = reader.stats();
    assert_eq!(stats.current_skip, 2);
    assert_eq!(stats.frames_skipped, 2 * events.grabs.len() as u64);
}

#[test]
fn test_fast_handler_never_skips() {
    let opener = ScriptedOpener::new(0, vec![Script::Healthy]);
    let handler = RecordingHandler::with_delay(Duration::from_millis(2));

    let mut reader = StreamReader::start(stream_config(), opener.clone(), handler.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || handler.count() >= 10));
    reader.stop();

    assert!(opener.events.lock().grabs.is_empty());
    assert_eq!(reader.stats().frames_skipped, 0);
}

#[test]
fn test_stop_interrupts_backoff() {
    let mut config = stream_config();
    config.reconnect_backoff_ms = 10_000;
    let opener = ScriptedOpener::always_failing();
    let handler = RecordingHandler::with_delay(Duration::ZERO);

    let mut reader = StreamReader::start(config, opener, handler).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    reader.stop();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!reader.is_running());

    // second stop is a no-op
    reader.stop();
}

#[test]
fn test_drop_stops_reader() {
    let opener = ScriptedOpener::new(0, vec![Script::Healthy]);
    let handler = RecordingHandler::with_delay(Duration::from_millis(1));

    let reader = StreamReader::start(stream_config(), opener.clone(), handler.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || handler.count() > 0));
    drop(reader);

    assert_eq!(opener.events.lock().closes, 1);
    let seen = handler.count();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(handler.count(), seen);
}

#[test]
fn test_empty_uri_rejected() {
    let config = StreamConfig::new("", "gate-1");
    let result = StreamReader::start(
        config,
        ScriptedOpener::new(0, Vec::new()),
        RecordingHandler::with_delay(Duration::ZERO),
    );
    assert!(result.is_err());
}
