//! Control surface: one capture source feeding one processing loop.
//!
//! Each `SafetyMonitor` owns its own source, detector, log and subscribers, so
//! several can run side by side in one process.

use crate::capture::ViolationCapture;
use crate::detect::DetectionEngine;
use crate::error::MonitorResult;
use crate::ingest::{CaptureSettings, FrameSource, SourceDescriptor, SourceProperties, SourceStats};
use crate::stream::{MonitorStats, StreamConfig, StreamCoordinator, Subscriber, ViolationLogEntry};

pub struct SafetyMonitor {
    source: FrameSource,
    coordinator: StreamCoordinator,
}

impl SafetyMonitor {
    pub fn new(engine: DetectionEngine, capture: CaptureSettings, stream: StreamConfig) -> Self {
        Self {
            source: FrameSource::new(capture),
            coordinator: StreamCoordinator::new(engine, stream),
        }
    }

    pub fn add_subscriber(&self, subscriber: Box<dyn Subscriber>) {
        self.coordinator.add_subscriber(subscriber);
    }

    pub fn set_capture(&mut self, capture: Box<dyn ViolationCapture>) -> MonitorResult<()> {
        self.coordinator.set_capture(capture)
    }

    /// Connect to `descriptor` and start capture and processing.
    ///
    /// Connection failures are returned as-is; nothing is left running.
    pub fn start(&mut self, descriptor: &SourceDescriptor) -> MonitorResult<()> {
        if self.coordinator.is_running() {
            log::debug!("SafetyMonitor: already running");
            return Ok(());
        }
        self.source.stop();
        self.source.connect(descriptor)?;
        self.source.start()?;
        if let Err(err) = self.coordinator.start(self.source.tap()) {
            self.source.stop();
            return Err(err);
        }
        log::info!("SafetyMonitor: monitoring started");
        Ok(())
    }

    /// Stop processing, then capture. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let was_running = self.coordinator.is_running() || self.source.is_running();
        self.coordinator.stop();
        self.source.stop();
        if was_running {
            log::info!("SafetyMonitor: monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.coordinator.is_running()
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_connected()
    }

    pub fn latest_stats(&self) -> MonitorStats {
        let mut stats = self.coordinator.stats();
        stats.source_connected = self.source.is_connected();
        stats
    }

    pub fn recent_violations(&self, limit: usize) -> Vec<ViolationLogEntry> {
        self.coordinator.recent_violations(limit)
    }

    pub fn violation_total(&self) -> u64 {
        self.coordinator.violation_total()
    }

    pub fn source_properties(&self) -> Option<SourceProperties> {
        self.source.properties()
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }
}

impl Drop for SafetyMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ModelDescriptor, ScriptedBackend};
    use crate::error::MonitorError;
    use std::path::PathBuf;

    fn engine() -> DetectionEngine {
        DetectionEngine::with_backend(Box::new(ScriptedBackend::new(Vec::new())), 0.5)
    }

    #[test]
    fn start_surfaces_connection_errors() {
        let mut monitor =
            SafetyMonitor::new(engine(), CaptureSettings::default(), StreamConfig::default());
        let missing = SourceDescriptor::File(PathBuf::from("/nonexistent/clip.mp4"));
        let err = monitor.start(&missing).unwrap_err();
        assert!(matches!(err, MonitorError::Connection { .. }));
        assert!(!monitor.is_running());
        assert!(!monitor.is_connected());
    }

    #[test]
    fn stop_twice_without_start() {
        let mut monitor = SafetyMonitor::new(
            DetectionEngine::initialize(&ModelDescriptor::default(), 0.5),
            CaptureSettings::default(),
            StreamConfig::default(),
        );
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_connected());
        assert_eq!(monitor.latest_stats().frames_processed, 0);
    }

    #[test]
    fn start_and_stop_with_synthetic_source() {
        let mut monitor =
            SafetyMonitor::new(engine(), CaptureSettings::default(), StreamConfig::default());
        let descriptor: SourceDescriptor = "stub://unit".parse().unwrap();
        monitor.start(&descriptor).unwrap();
        monitor.start(&descriptor).unwrap();
        assert!(monitor.is_running());
        assert_eq!(monitor.source_properties().unwrap().backend, "synthetic");
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(!monitor.is_connected());
    }
}
