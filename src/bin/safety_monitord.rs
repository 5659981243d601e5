//! safety-monitord - PPE compliance monitoring daemon
//!
//! This daemon:
//! 1. Loads configuration (SAFETY_MONITOR_CONFIG file + SAFETY_MONITOR_* overrides)
//! 2. Opens the configured source and detection model
//! 3. Streams annotated frames; the newest one is written to the preview path
//! 4. Saves violation snapshots when a capture directory is configured
//! 5. Logs health and statistics until Ctrl-C

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use crossbeam_channel::Receiver;
use safety_monitor::stream::DEFAULT_RECENT_LIMIT;
use safety_monitor::{
    ChannelSubscriber, DetectionEngine, FilesystemCaptureStore, MonitorConfig, SafetyMonitor,
    StreamUpdate,
};

const PREVIEW_QUEUE: usize = 4;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MonitorConfig::load()?;
    let descriptor = config.descriptor()?;
    log::info!(
        "safety-monitord {} starting (source={}, detect every {} frame(s))",
        env!("CARGO_PKG_VERSION"),
        descriptor,
        config.stream.detect_every
    );

    let engine = DetectionEngine::initialize(
        &config.model_descriptor(),
        config.detection.base_threshold,
    );
    log::info!(
        "detector backend={} classes={:?}",
        engine.backend_name(),
        engine.model_classes()
    );

    let mut monitor = SafetyMonitor::new(
        engine,
        config.capture_settings(),
        config.stream_config(),
    );

    if let Some(dir) = &config.violations.capture_dir {
        let store = FilesystemCaptureStore::open(
            dir,
            config.stream.jpeg_quality,
            config.violations.max_images,
        )?;
        monitor.set_capture(Box::new(store))?;
        log::info!("violation captures written to {}", dir.display());
    }

    let preview = config.preview_path.clone().map(|path| {
        let (subscriber, updates) = ChannelSubscriber::bounded("preview", PREVIEW_QUEUE);
        monitor.add_subscriber(Box::new(subscriber));
        log::info!("preview frames written to {}", path.display());
        thread::Builder::new()
            .name("preview-writer".into())
            .spawn(move || write_previews(&path, updates))
    });
    let preview = preview.transpose().context("spawn preview writer")?;

    monitor.start(&descriptor)?;
    if let Some(props) = monitor.source_properties() {
        log::info!(
            "source {} via {} ({}x{} @ {} fps, buffer {})",
            props.source,
            props.backend,
            props.width,
            props.height,
            props.fps,
            props.buffer_size
        );
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("safety-monitord running; Ctrl-C to stop");
    loop {
        match rx.recv_timeout(config.stats_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => log_health(&monitor),
        }
    }

    log::info!("shutdown signal received, stopping monitor...");
    monitor.stop();
    let recent = monitor.recent_violations(DEFAULT_RECENT_LIMIT);
    log::info!(
        "{} violation(s) logged this run; last {} kept in memory",
        monitor.violation_total(),
        recent.len()
    );
    // Dropping the monitor closes the preview channel and ends the writer.
    drop(monitor);
    if let Some(handle) = preview {
        if handle.join().is_err() {
            log::error!("preview writer panicked");
        }
    }
    Ok(())
}

fn log_health(monitor: &SafetyMonitor) {
    let stats = monitor.latest_stats();
    let source = monitor.source_stats();
    log::info!(
        "connected={} frames={} detections={} failures={} people={} violations={} stream_fps={:.1} detect_fps={:.1} dropped={}",
        stats.source_connected,
        stats.frames_processed,
        stats.detections_run,
        stats.detection_failures,
        stats.people_count,
        stats.violations.len(),
        stats.stream_fps,
        stats.detection_fps,
        source.frames_dropped
    );
    if !stats.source_connected {
        log::warn!("video source is not delivering frames");
    }
}

fn write_previews(path: &Path, updates: Receiver<StreamUpdate>) {
    for update in updates {
        if let Err(err) = write_preview(path, &update) {
            log::warn!("preview write failed: {err:#}");
        }
    }
}

fn write_preview(path: &Path, update: &StreamUpdate) -> Result<()> {
    let tmp: PathBuf = path.with_extension("tmp");
    fs::write(&tmp, &update.frame[..]).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}
