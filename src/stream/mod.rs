//! Stream coordination: detection cadence, violation log, subscriber push.
//!
//! The coordinator owns one processing thread. It polls a `FrameTap` for the
//! newest frame, runs detection on every Nth frame (reusing the cached result in
//! between), renders, records fresh violations, and publishes to subscribers.
//! The loop never blocks on the source; with no frame ready it sleeps briefly.

pub mod log;
pub mod subscriber;

pub use self::log::{ViolationLog, ViolationLogEntry, DEFAULT_LOG_CAPACITY};
pub use self::subscriber::{ChannelSubscriber, StreamUpdate, Subscriber};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::annotate::AnnotationRenderer;
use crate::capture::{CaptureMetadata, ViolationCapture};
use crate::detect::{DetectionEngine, DetectionResult, EquipmentTally, Violation};
use crate::error::{MonitorError, MonitorResult};
use crate::frame::Frame;
use crate::ingest::FrameTap;
use crate::worker::spawn_named;

/// Default limit for `recent_violations` queries.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

const FPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Run detection on every Nth frame. Values below 1 are treated as 1.
    pub detect_every: u64,
    pub log_capacity: usize,
    /// Sleep between polls when no frame is ready.
    pub idle_sleep: Duration,
    pub jpeg_quality: u8,
    /// Minimum time between two violation captures.
    pub capture_cooldown: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            detect_every: 3,
            log_capacity: DEFAULT_LOG_CAPACITY,
            idle_sleep: Duration::from_millis(5),
            jpeg_quality: 75,
            capture_cooldown: Duration::from_secs(5),
        }
    }
}

/// Snapshot of the processing loop, updated once per processed frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MonitorStats {
    pub frames_processed: u64,
    pub detections_run: u64,
    pub detection_failures: u64,
    pub people_count: u32,
    pub safety_equipment: EquipmentTally,
    pub violations: Vec<Violation>,
    /// Throughput of the last detection call.
    pub detection_fps: f64,
    /// Frames published over the last second.
    pub stream_fps: f64,
    pub last_update: Option<DateTime<Utc>>,
    pub source_connected: bool,
    pub log_length: usize,
    pub captures_saved: u64,
}

/// State read by the control context while the loop runs.
struct CoordinatorShared {
    log: Mutex<ViolationLog>,
    stats: Mutex<MonitorStats>,
    pending_subscribers: Mutex<Vec<Box<dyn Subscriber>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the processing thread owns. Handed back through the join handle
/// on stop so the coordinator can be restarted.
struct Pipeline {
    engine: DetectionEngine,
    renderer: AnnotationRenderer,
    subscribers: Vec<Box<dyn Subscriber>>,
    capture: Option<Box<dyn ViolationCapture>>,
    config: StreamConfig,
    shared: Arc<CoordinatorShared>,
    frame_counter: u64,
    cache: Option<Arc<DetectionResult>>,
    published_at: VecDeque<Instant>,
    last_capture: Option<Instant>,
}

impl Pipeline {
    fn run(mut self, tap: FrameTap, running: Arc<AtomicBool>) -> Self {
        while running.load(Ordering::SeqCst) {
            self.adopt_pending_subscribers();
            let Some(frame) = tap.latest() else {
                lock(&self.shared.stats).source_connected = tap.is_connected();
                thread::sleep(self.config.idle_sleep);
                continue;
            };
            if let Some(update) = self.process(&frame, Utc::now()) {
                self.publish(&update);
            }
            lock(&self.shared.stats).source_connected = tap.is_connected();
        }
        self
    }

    fn adopt_pending_subscribers(&mut self) {
        let mut pending = lock(&self.shared.pending_subscribers);
        if pending.is_empty() {
            return;
        }
        for subscriber in pending.drain(..) {
            ::log::info!("StreamCoordinator: subscriber {} attached", subscriber.name());
            self.subscribers.push(subscriber);
        }
    }

    /// Detect (on cadence), log, render and capture one frame.
    ///
    /// Returns `None` when the frame cannot be rendered or encoded; the loop
    /// moves on to the next frame. Fresh violations are logged either way.
    fn process(&mut self, frame: &Frame, now: DateTime<Utc>) -> Option<StreamUpdate> {
        self.frame_counter += 1;
        let detect_every = self.config.detect_every.max(1);
        let mut fresh = false;
        if self.cache.is_none() || self.frame_counter % detect_every == 0 {
            match self.engine.detect(frame) {
                Ok(result) => {
                    self.cache = Some(Arc::new(result));
                    fresh = true;
                    lock(&self.shared.stats).detections_run += 1;
                }
                Err(err) => {
                    ::log::warn!(
                        "StreamCoordinator: detection failed on frame {}: {err}; reusing previous result",
                        frame.sequence
                    );
                    lock(&self.shared.stats).detection_failures += 1;
                }
            }
        }
        let result = self
            .cache
            .clone()
            .unwrap_or_else(|| Arc::new(DetectionResult::default()));

        let record = fresh && !result.violations.is_empty();
        if record {
            lock(&self.shared.log).record(&result.violations, now);
        }

        let annotated = match self.renderer.render(frame, &result) {
            Ok(annotated) => annotated,
            Err(err) => {
                ::log::error!(
                    "StreamCoordinator: failed to render frame {}: {err}",
                    frame.sequence
                );
                return None;
            }
        };

        if record {
            self.capture_violation(&annotated, &result, now);
        }

        let jpeg = match annotated.encode_jpeg(self.config.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                ::log::error!(
                    "StreamCoordinator: failed to encode frame {}: {err:#}",
                    frame.sequence
                );
                return None;
            }
        };

        let stream_fps = self.tick_fps();
        let log_length = lock(&self.shared.log).len();
        {
            let mut stats = lock(&self.shared.stats);
            stats.frames_processed += 1;
            stats.people_count = result.people_count;
            stats.safety_equipment = result.equipment.clone();
            stats.violations = result.violations.clone();
            stats.detection_fps = result.fps();
            stats.stream_fps = stream_fps;
            stats.last_update = Some(now);
            stats.log_length = log_length;
        }

        Some(StreamUpdate {
            frame: Arc::from(jpeg.into_boxed_slice()),
            people_count: result.people_count,
            safety_equipment: result.equipment.clone(),
            violations: result.violations.clone(),
            fps: stream_fps,
            timestamp: now,
            sequence: frame.sequence,
            fresh,
        })
    }

    fn capture_violation(
        &mut self,
        annotated: &Frame,
        result: &DetectionResult,
        now: DateTime<Utc>,
    ) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        if self
            .last_capture
            .is_some_and(|at| at.elapsed() < self.config.capture_cooldown)
        {
            return;
        }
        self.last_capture = Some(Instant::now());
        let metadata = CaptureMetadata {
            timestamp: now,
            violations: result.violations.clone(),
            people_count: result.people_count,
        };
        match capture.save(annotated, &metadata) {
            Ok(path) => {
                ::log::debug!("StreamCoordinator: violation captured at {}", path.display());
                lock(&self.shared.stats).captures_saved += 1;
            }
            Err(err) => ::log::warn!("StreamCoordinator: violation capture failed: {err:#}"),
        }
    }

    fn tick_fps(&mut self) -> f64 {
        let now = Instant::now();
        self.published_at.push_back(now);
        while self
            .published_at
            .front()
            .is_some_and(|at| now.duration_since(*at) > FPS_WINDOW)
        {
            self.published_at.pop_front();
        }
        self.published_at.len() as f64 / FPS_WINDOW.as_secs_f64()
    }

    fn publish(&mut self, update: &StreamUpdate) {
        for subscriber in &mut self.subscribers {
            if let Err(err) = subscriber.publish(update) {
                ::log::warn!(
                    "StreamCoordinator: publish to {} failed: {err:#}",
                    subscriber.name()
                );
            }
        }
    }
}

pub struct StreamCoordinator {
    shared: Arc<CoordinatorShared>,
    running: Arc<AtomicBool>,
    pipeline: Option<Pipeline>,
    worker: Option<JoinHandle<Pipeline>>,
}

impl StreamCoordinator {
    pub fn new(engine: DetectionEngine, config: StreamConfig) -> Self {
        let shared = Arc::new(CoordinatorShared {
            log: Mutex::new(ViolationLog::new(config.log_capacity)),
            stats: Mutex::new(MonitorStats::default()),
            pending_subscribers: Mutex::new(Vec::new()),
        });
        let pipeline = Pipeline {
            engine,
            renderer: AnnotationRenderer::new(),
            subscribers: Vec::new(),
            capture: None,
            config,
            shared: Arc::clone(&shared),
            frame_counter: 0,
            cache: None,
            published_at: VecDeque::new(),
            last_capture: None,
        };
        Self {
            shared,
            running: Arc::new(AtomicBool::new(false)),
            pipeline: Some(pipeline),
            worker: None,
        }
    }

    /// Register a subscriber. Takes effect on the next loop iteration when running.
    pub fn add_subscriber(&self, subscriber: Box<dyn Subscriber>) {
        lock(&self.shared.pending_subscribers).push(subscriber);
    }

    /// Install the violation capture store. Only allowed while stopped.
    pub fn set_capture(&mut self, capture: Box<dyn ViolationCapture>) -> MonitorResult<()> {
        match self.pipeline.as_mut() {
            Some(pipeline) if self.worker.is_none() => {
                pipeline.capture = Some(capture);
                Ok(())
            }
            _ => Err(MonitorError::AlreadyRunning("StreamCoordinator")),
        }
    }

    /// Start the processing loop over `tap`. A second call while running is a no-op.
    pub fn start(&mut self, tap: FrameTap) -> MonitorResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(mut pipeline) = self.pipeline.take() else {
            return Err(MonitorError::Other(anyhow::anyhow!(
                "processing state was lost when the previous loop panicked"
            )));
        };
        pipeline.cache = None;
        pipeline.frame_counter = 0;
        pipeline.published_at.clear();

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let spawned = spawn_named("stream-coordinator", move || pipeline.run(tap, running));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                ::log::info!("StreamCoordinator: processing started");
                Ok(())
            }
            Err(err) => {
                // The closure (and the pipeline it owned) is gone with the failed spawn.
                self.running.store(false, Ordering::SeqCst);
                Err(MonitorError::Other(
                    anyhow::Error::new(err).context("spawn processing thread"),
                ))
            }
        }
    }

    /// Stop the loop and wait for it to exit. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.worker.take() else {
            return;
        };
        match handle.join() {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(_) => ::log::error!("StreamCoordinator: processing thread panicked"),
        }
        lock(&self.shared.stats).source_connected = false;
        ::log::info!("StreamCoordinator: processing stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> MonitorStats {
        lock(&self.shared.stats).clone()
    }

    /// Up to `limit` most recent log entries, newest last.
    pub fn recent_violations(&self, limit: usize) -> Vec<ViolationLogEntry> {
        lock(&self.shared.log).recent(limit)
    }

    /// Violations logged since creation, including evicted entries.
    pub fn violation_total(&self) -> u64 {
        lock(&self.shared.log).total()
    }
}

impl Drop for StreamCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, RawDetection, ScriptedBackend};
    use crate::ingest::{CaptureSettings, FrameSource, SyntheticConfig, SyntheticSource};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;

    fn person(x: i32) -> RawDetection {
        RawDetection::new("person", 0.9, BoundingBox::new(x, 20, x + 40, 120))
    }

    fn coordinator(backend: ScriptedBackend, config: StreamConfig) -> StreamCoordinator {
        StreamCoordinator::new(DetectionEngine::with_backend(Box::new(backend), 0.5), config)
    }

    fn pipeline(coordinator: &mut StreamCoordinator) -> &mut Pipeline {
        coordinator.pipeline.as_mut().unwrap()
    }

    fn frame(sequence: u64) -> Frame {
        Frame::solid(160, 120, [40, 40, 40], sequence).unwrap()
    }

    #[test]
    fn detection_runs_on_first_and_every_nth_frame() {
        let backend = ScriptedBackend::repeating(vec![person(10)]);
        let calls = backend.call_counter();
        let mut coordinator = coordinator(backend, StreamConfig::default());
        let pipeline = pipeline(&mut coordinator);

        let mut fresh_frames = Vec::new();
        for seq in 1..=9 {
            let update = pipeline.process(&frame(seq), Utc::now()).unwrap();
            if update.fresh {
                fresh_frames.push(seq);
            }
        }
        assert_eq!(fresh_frames, vec![1, 3, 6, 9]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(coordinator.stats().detections_run, 4);
        assert_eq!(coordinator.stats().frames_processed, 9);
    }

    #[test]
    fn cached_results_do_not_append_to_the_log() {
        // One person with no equipment: ratio violations for all three kinds plus
        // the mask fallback.
        let backend = ScriptedBackend::repeating(vec![person(10)]);
        let config = StreamConfig {
            detect_every: 4,
            ..StreamConfig::default()
        };
        let mut coordinator = coordinator(backend, config);
        let pipeline = pipeline(&mut coordinator);
        for seq in 1..=7 {
            let update = pipeline.process(&frame(seq), Utc::now()).unwrap();
            assert_eq!(update.violations.len(), 4);
        }
        // Fresh on frames 1 and 4.
        assert_eq!(coordinator.violation_total(), 8);
        assert_eq!(coordinator.recent_violations(DEFAULT_RECENT_LIMIT).len(), 8);
    }

    #[test]
    fn log_is_bounded_by_capacity() {
        let backend = ScriptedBackend::repeating(vec![person(10)]);
        let config = StreamConfig {
            detect_every: 1,
            log_capacity: 5,
            ..StreamConfig::default()
        };
        let mut coordinator = coordinator(backend, config);
        let pipeline = pipeline(&mut coordinator);
        for seq in 1..=4 {
            pipeline.process(&frame(seq), Utc::now()).unwrap();
        }
        assert_eq!(coordinator.recent_violations(100).len(), 5);
        assert_eq!(coordinator.violation_total(), 16);
        assert_eq!(coordinator.stats().log_length, 5);
    }

    #[test]
    fn detector_failure_reuses_previous_result() {
        let backend = ScriptedBackend::new(vec![vec![person(10), person(80)]]).failing_on([2]);
        let config = StreamConfig {
            detect_every: 1,
            ..StreamConfig::default()
        };
        let mut coordinator = coordinator(backend, config);
        let pipeline = pipeline(&mut coordinator);

        let first = pipeline.process(&frame(1), Utc::now()).unwrap();
        let second = pipeline.process(&frame(2), Utc::now()).unwrap();
        let third = pipeline.process(&frame(3), Utc::now()).unwrap();
        assert!(first.fresh && !second.fresh && third.fresh);
        assert_eq!(second.people_count, 2);
        assert_eq!(second.violations, first.violations);
        let stats = coordinator.stats();
        assert_eq!(stats.detection_failures, 1);
        assert_eq!(stats.frames_processed, 3);
    }

    #[test]
    fn failure_without_cache_publishes_empty_result() {
        let backend = ScriptedBackend::repeating(vec![person(10)]).failing_on([1]);
        let mut coordinator = coordinator(backend, StreamConfig::default());
        let update = pipeline(&mut coordinator)
            .process(&frame(1), Utc::now())
            .unwrap();
        assert!(!update.fresh);
        assert_eq!(update.people_count, 0);
        assert!(update.violations.is_empty());
    }

    struct RecordingCapture {
        saved: Arc<AtomicU64>,
    }

    impl ViolationCapture for RecordingCapture {
        fn save(&mut self, _frame: &Frame, metadata: &CaptureMetadata) -> anyhow::Result<PathBuf> {
            assert!(!metadata.violations.is_empty());
            let n = self.saved.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(format!("capture-{n}.jpg")))
        }
    }

    #[test]
    fn captures_respect_cooldown() {
        let backend = ScriptedBackend::repeating(vec![person(10)]);
        let config = StreamConfig {
            detect_every: 1,
            capture_cooldown: Duration::from_secs(60),
            ..StreamConfig::default()
        };
        let mut coordinator = coordinator(backend, config);
        let saved = Arc::new(AtomicU64::new(0));
        coordinator
            .set_capture(Box::new(RecordingCapture {
                saved: Arc::clone(&saved),
            }))
            .unwrap();
        let pipeline = pipeline(&mut coordinator);
        for seq in 1..=5 {
            pipeline.process(&frame(seq), Utc::now()).unwrap();
        }
        assert_eq!(saved.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.stats().captures_saved, 1);
    }

    struct FailingCapture {
        attempts: Arc<AtomicU64>,
    }

    impl ViolationCapture for FailingCapture {
        fn save(&mut self, _frame: &Frame, _metadata: &CaptureMetadata) -> anyhow::Result<PathBuf> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("disk full"))
        }
    }

    #[test]
    fn capture_failures_are_not_fatal() {
        let backend = ScriptedBackend::repeating(vec![person(10)]);
        let config = StreamConfig {
            detect_every: 1,
            capture_cooldown: Duration::ZERO,
            ..StreamConfig::default()
        };
        let mut coordinator = coordinator(backend, config);
        let attempts = Arc::new(AtomicU64::new(0));
        coordinator
            .set_capture(Box::new(FailingCapture {
                attempts: Arc::clone(&attempts),
            }))
            .unwrap();
        let pipeline = pipeline(&mut coordinator);
        for seq in 1..=3 {
            let update = pipeline.process(&frame(seq), Utc::now()).unwrap();
            assert!(update.fresh);
            assert_eq!(update.violations.len(), 4);
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let stats = coordinator.stats();
        assert_eq!(stats.captures_saved, 0);
        assert_eq!(stats.frames_processed, 3);
        assert_eq!(coordinator.violation_total(), 12);
    }

    #[test]
    fn fresh_violations_are_logged_even_when_rendering_fails() {
        let backend = ScriptedBackend::repeating(vec![person(10)]);
        let config = StreamConfig {
            detect_every: 1,
            ..StreamConfig::default()
        };
        let mut coordinator = coordinator(backend, config);
        let saved = Arc::new(AtomicU64::new(0));
        coordinator
            .set_capture(Box::new(RecordingCapture {
                saved: Arc::clone(&saved),
            }))
            .unwrap();
        let pipeline = pipeline(&mut coordinator);

        let mut broken = frame(1);
        broken.width += 1;
        assert!(pipeline.process(&broken, Utc::now()).is_none());

        assert_eq!(coordinator.violation_total(), 4);
        assert_eq!(saved.load(Ordering::SeqCst), 0);
        let stats = coordinator.stats();
        assert_eq!(stats.frames_processed, 0);
        assert_eq!(stats.detections_run, 1);
    }

    fn synthetic_source() -> FrameSource {
        let backend = SyntheticSource::new(SyntheticConfig {
            name: "coordinator-test".into(),
            width: 160,
            height: 120,
            fps: 100,
            frame_limit: None,
        });
        let mut source = FrameSource::with_backend(
            CaptureSettings::default(),
            "stub://coordinator-test",
            Box::new(backend),
        );
        source.start().unwrap();
        source
    }

    #[test]
    fn start_and_stop_are_idempotent_and_publish_updates() {
        let mut source = synthetic_source();
        let backend = ScriptedBackend::repeating(vec![person(10)]);
        let mut coordinator = coordinator(backend, StreamConfig::default());
        let (subscriber, updates) = ChannelSubscriber::bounded("test", 64);
        coordinator.add_subscriber(Box::new(subscriber));

        coordinator.start(source.tap()).unwrap();
        coordinator.start(source.tap()).unwrap();
        assert!(coordinator.is_running());

        let update = updates.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(&update.frame[..2], &[0xFF, 0xD8]);
        assert_eq!(update.people_count, 1);

        coordinator.stop();
        coordinator.stop();
        assert!(!coordinator.is_running());
        assert!(coordinator.stats().frames_processed >= 1);
        source.stop();

        // The pipeline survives a stop and can run again.
        let mut source = synthetic_source();
        coordinator.start(source.tap()).unwrap();
        coordinator.stop();
        source.stop();
    }

    #[test]
    fn set_capture_is_rejected_while_running() {
        let mut source = synthetic_source();
        let mut coordinator =
            coordinator(ScriptedBackend::new(Vec::new()), StreamConfig::default());
        coordinator.start(source.tap()).unwrap();
        let result = coordinator.set_capture(Box::new(RecordingCapture {
            saved: Arc::new(AtomicU64::new(0)),
        }));
        assert!(matches!(result, Err(MonitorError::AlreadyRunning(_))));
        coordinator.stop();
        source.stop();
    }
}
