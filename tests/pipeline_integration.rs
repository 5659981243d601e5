use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use std::path::PathBuf;

use safety_monitor::detect::ScriptedBackend;
use safety_monitor::{
    BoundingBox, CaptureMetadata, CaptureSettings, ChannelSubscriber, DetectionEngine,
    FilesystemCaptureStore, Frame, RawDetection, SafetyMonitor, SourceDescriptor, StreamConfig,
    ViolationCapture, ViolationKind,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn capture_settings(fps: u32) -> CaptureSettings {
    CaptureSettings {
        width: 320,
        height: 240,
        target_fps: fps,
        ..CaptureSettings::default()
    }
}

fn crew_without_hardhats() -> Vec<RawDetection> {
    vec![
        RawDetection::new("person", 0.9, BoundingBox::new(20, 40, 90, 220)),
        RawDetection::new("person", 0.9, BoundingBox::new(200, 40, 270, 220)),
        RawDetection::new("safety vest", 0.9, BoundingBox::new(25, 90, 85, 150)),
        RawDetection::new("safety vest", 0.9, BoundingBox::new(205, 90, 265, 150)),
        RawDetection::new("mask", 0.9, BoundingBox::new(40, 50, 70, 70)),
        RawDetection::new("mask", 0.9, BoundingBox::new(220, 50, 250, 70)),
    ]
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + RECV_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn synthetic_stream_produces_annotated_updates_and_log_entries() {
    let engine = DetectionEngine::with_backend(
        Box::new(ScriptedBackend::repeating(crew_without_hardhats())),
        0.5,
    );
    let mut monitor = SafetyMonitor::new(engine, capture_settings(60), StreamConfig::default());
    let (subscriber, updates) = ChannelSubscriber::bounded("viewer", 32);
    monitor.add_subscriber(Box::new(subscriber));

    let descriptor: SourceDescriptor = "stub://yard".parse().unwrap();
    monitor.start(&descriptor).expect("start monitor");

    let update = updates.recv_timeout(RECV_TIMEOUT).expect("first update");
    assert_eq!(update.people_count, 2);
    assert_eq!(update.safety_equipment.get(safety_monitor::EquipmentKind::SafetyVest), 2);
    assert_eq!(update.violations.len(), 1);
    assert_eq!(update.violations[0].kind, ViolationKind::MissingHardhat);
    assert_eq!(update.violations[0].count, Some(2));

    let json: serde_json::Value = serde_json::from_str(&update.to_json().unwrap()).unwrap();
    assert!(json["frame"].as_str().unwrap().starts_with("/9j/"));
    assert_eq!(json["violations"][0]["type"], "missing_hardhat");

    assert!(wait_until(|| monitor.latest_stats().frames_processed >= 5));
    let stats = monitor.latest_stats();
    assert!(stats.source_connected);
    assert!(stats.detections_run >= 1);
    assert!(stats.detections_run <= stats.frames_processed);

    monitor.stop();
    let entries = monitor.recent_violations(100);
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| e.kind == ViolationKind::MissingHardhat && e.count == 2));
    assert_eq!(entries.len() as u64, monitor.violation_total());
    assert!(!monitor.is_connected());

    monitor.stop();
    assert!(!monitor.is_connected());
}

#[test]
fn violations_are_captured_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let engine = DetectionEngine::with_backend(
        Box::new(ScriptedBackend::repeating(crew_without_hardhats())),
        0.5,
    );
    let config = StreamConfig {
        detect_every: 1,
        capture_cooldown: Duration::from_secs(3600),
        ..StreamConfig::default()
    };
    let mut monitor = SafetyMonitor::new(engine, capture_settings(60), config);
    let store = FilesystemCaptureStore::open(dir.path(), 70, 10).unwrap();
    monitor.set_capture(Box::new(store.clone())).unwrap();

    monitor.start(&"stub://gate".parse().unwrap()).unwrap();
    assert!(wait_until(|| monitor.latest_stats().captures_saved >= 1));
    monitor.stop();

    let images = store.list().unwrap();
    assert_eq!(images.len(), 1);
    let metadata_path = images[0].with_file_name(format!(
        "{}_metadata.json",
        images[0].file_stem().unwrap().to_str().unwrap()
    ));
    let metadata: serde_json::Value =
        serde_json::from_slice(&std::fs::read(metadata_path).unwrap()).unwrap();
    assert_eq!(metadata["people_count"], 2);
    assert_eq!(metadata["violations"][0]["type"], "missing_hardhat");
}

struct ReadOnlyStore;

impl ViolationCapture for ReadOnlyStore {
    fn save(&mut self, _frame: &Frame, _metadata: &CaptureMetadata) -> anyhow::Result<PathBuf> {
        anyhow::bail!("capture directory is read-only")
    }
}

#[test]
fn failed_captures_do_not_stop_the_stream() {
    let engine = DetectionEngine::with_backend(
        Box::new(ScriptedBackend::repeating(crew_without_hardhats())),
        0.5,
    );
    let config = StreamConfig {
        detect_every: 1,
        capture_cooldown: Duration::ZERO,
        ..StreamConfig::default()
    };
    let mut monitor = SafetyMonitor::new(engine, capture_settings(60), config);
    monitor.set_capture(Box::new(ReadOnlyStore)).unwrap();
    let (subscriber, updates) = ChannelSubscriber::bounded("viewer", 64);
    monitor.add_subscriber(Box::new(subscriber));
    monitor.start(&"stub://locked".parse().unwrap()).unwrap();

    let received = (0..3)
        .filter_map(|_| updates.recv_timeout(RECV_TIMEOUT).ok())
        .count();
    assert_eq!(received, 3);
    assert!(wait_until(|| monitor.violation_total() >= 3));
    monitor.stop();

    let stats = monitor.latest_stats();
    assert_eq!(stats.captures_saved, 0);
    assert!(stats.frames_processed >= 3);
}

#[test]
fn detector_failures_do_not_stop_the_stream() {
    let backend = ScriptedBackend::repeating(crew_without_hardhats()).failing_on(1..=3);
    let calls = backend.call_counter();
    let engine = DetectionEngine::with_backend(Box::new(backend), 0.5);
    let config = StreamConfig {
        detect_every: 1,
        ..StreamConfig::default()
    };
    let mut monitor = SafetyMonitor::new(engine, capture_settings(60), config);
    let (subscriber, updates) = ChannelSubscriber::bounded("viewer", 64);
    monitor.add_subscriber(Box::new(subscriber));
    monitor.start(&"stub://flaky".parse().unwrap()).unwrap();

    let fresh = (0..50)
        .filter_map(|_| updates.recv_timeout(RECV_TIMEOUT).ok())
        .find(|u| u.fresh)
        .expect("a successful detection after the failures");
    assert_eq!(fresh.people_count, 2);
    monitor.stop();

    let stats = monitor.latest_stats();
    assert_eq!(stats.detection_failures, 3);
    assert!(calls.load(Ordering::SeqCst) >= 4);
}

#[test]
fn finite_source_ends_and_monitor_stops_cleanly() {
    let engine = DetectionEngine::with_backend(Box::new(ScriptedBackend::new(Vec::new())), 0.5);
    let mut monitor = SafetyMonitor::new(engine, capture_settings(200), StreamConfig::default());
    monitor.start(&"stub://clip?frames=10".parse().unwrap()).unwrap();

    assert!(wait_until(|| monitor.source_stats().frames_captured == 10
        && !monitor.is_connected()));
    let stats = monitor.latest_stats();
    assert!(stats.frames_processed <= 10);
    assert!(stats.violations.is_empty());

    monitor.stop();
    monitor.stop();
}

#[test]
fn independent_monitors_do_not_share_state() {
    let noisy = DetectionEngine::with_backend(
        Box::new(ScriptedBackend::repeating(crew_without_hardhats())),
        0.5,
    );
    let quiet = DetectionEngine::with_backend(Box::new(ScriptedBackend::new(Vec::new())), 0.5);
    let mut a = SafetyMonitor::new(noisy, capture_settings(60), StreamConfig::default());
    let mut b = SafetyMonitor::new(quiet, capture_settings(60), StreamConfig::default());

    a.start(&"stub://a".parse().unwrap()).unwrap();
    b.start(&"stub://b".parse().unwrap()).unwrap();
    assert!(wait_until(|| a.violation_total() > 0
        && b.latest_stats().frames_processed > 0));
    a.stop();
    b.stop();

    assert!(a.violation_total() > 0);
    assert_eq!(b.violation_total(), 0);
    assert_eq!(b.latest_stats().people_count, 0);
}

#[test]
fn unopenable_source_is_reported() {
    let engine = DetectionEngine::with_backend(Box::new(ScriptedBackend::new(Vec::new())), 0.5);
    let mut monitor = SafetyMonitor::new(engine, capture_settings(30), StreamConfig::default());
    let err = monitor
        .start(&"/nonexistent/site.mp4".parse().unwrap())
        .expect_err("missing file");
    assert!(err.to_string().contains("/nonexistent/site.mp4"));
    assert!(!monitor.is_running());
}
