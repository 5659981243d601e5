//! `FrameSource`: owns one capture backend and a capture thread that feeds the
//! bounded frame queue.
//!
//! Lifecycle: `connect` opens the device, `start` spawns the capture loop,
//! `stop` signals the loop, waits a bounded time for it, and releases the
//! device. `stop` is idempotent and also runs on drop.
//!
//! Every `connect` gets a fresh device slot and every `start` a fresh stop
//! flag. A capture thread detached by a timed-out `stop` only ever sees its own
//! slot and flag, so it cannot block, feed or tear down a later run.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};

use serde::Serialize;

use super::backend::{CaptureBackend, Negotiated};
use super::descriptor::{CaptureSettings, SourceDescriptor, SourceProperties};
use super::stills::{is_still_image, StillsSource};
use super::synthetic::{SyntheticConfig, SyntheticSource};
use crate::error::{MonitorError, MonitorResult};
use crate::frame::{Frame, FrameQueue};
use crate::worker::{join_with_timeout, spawn_named};

type DeviceSlot = Arc<Mutex<Option<Box<dyn CaptureBackend>>>>;

/// Open the backend a descriptor names.
pub fn open_backend(
    descriptor: &SourceDescriptor,
    settings: &CaptureSettings,
) -> anyhow::Result<Box<dyn CaptureBackend>> {
    match descriptor {
        SourceDescriptor::Synthetic { name, frame_limit } => {
            Ok(Box::new(SyntheticSource::new(SyntheticConfig {
                name: name.clone(),
                width: settings.width,
                height: settings.height,
                fps: settings.target_fps,
                frame_limit: *frame_limit,
            })))
        }
        SourceDescriptor::File(path) => {
            if !path.exists() {
                anyhow::bail!("no such file or directory: {}", path.display());
            }
            if path.is_dir() || is_still_image(path) {
                return Ok(Box::new(StillsSource::open(path, settings.target_fps)?));
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                Ok(Box::new(super::file_ffmpeg::FfmpegFileSource::open(
                    path,
                    settings.target_fps,
                )?))
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                anyhow::bail!("video files require the ingest-file-ffmpeg feature")
            }
        }
        SourceDescriptor::Device(path) => {
            #[cfg(feature = "ingest-v4l2")]
            {
                Ok(Box::new(super::v4l2::V4l2Source::open(path, settings)?))
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                anyhow::bail!("capture device {path} requires the ingest-v4l2 feature")
            }
        }
        SourceDescriptor::Stream(url) => {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Box::new(super::rtsp::RtspSource::open(url, settings)?))
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!("network stream {url} requires the rtsp-gstreamer feature")
            }
        }
    }
}

/// Counters shared between the capture thread and its owner.
struct SourceShared {
    queue: FrameQueue,
    running: AtomicBool,
    device_open: AtomicBool,
    healthy: AtomicBool,
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
}

impl SourceShared {
    fn new(queue_capacity: usize) -> Self {
        Self {
            queue: FrameQueue::new(queue_capacity),
            running: AtomicBool::new(false),
            device_open: AtomicBool::new(false),
            healthy: AtomicBool::new(false),
            frames_captured: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
        }
    }

    fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.device_open.load(Ordering::SeqCst)
            && self.healthy.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub frames_captured: u64,
    /// Frames evicted from the queue before anyone consumed them.
    pub frames_dropped: u64,
    pub read_failures: u64,
    pub queued: usize,
}

/// Consumer-side handle onto a source's frame queue.
///
/// This is the only thing the processing loop holds; it never touches the device.
#[derive(Clone)]
pub struct FrameTap {
    shared: Arc<SourceShared>,
}

impl FrameTap {
    /// Newest frame, discarding anything older.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.shared.queue.latest()
    }

    /// Oldest queued frame.
    pub fn next(&self) -> Option<Arc<Frame>> {
        self.shared.queue.pop()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }
}

pub struct FrameSource {
    settings: CaptureSettings,
    descriptor: Option<SourceDescriptor>,
    label: String,
    device: DeviceSlot,
    /// Stop flag of the current capture run.
    run_stop: Arc<AtomicBool>,
    shared: Arc<SourceShared>,
    negotiated: Option<(Negotiated, &'static str)>,
    worker: Option<JoinHandle<()>>,
}

impl FrameSource {
    pub fn new(settings: CaptureSettings) -> Self {
        let shared = Arc::new(SourceShared::new(settings.queue_capacity));
        Self {
            settings,
            descriptor: None,
            label: String::new(),
            device: Arc::new(Mutex::new(None)),
            run_stop: Arc::new(AtomicBool::new(true)),
            shared,
            negotiated: None,
            worker: None,
        }
    }

    /// Source around an already-opened backend.
    pub fn with_backend(
        settings: CaptureSettings,
        label: impl Into<String>,
        backend: Box<dyn CaptureBackend>,
    ) -> Self {
        let mut source = Self::new(settings);
        source.attach(label.into(), backend);
        source
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Open the device or stream the descriptor names.
    pub fn connect(&mut self, descriptor: &SourceDescriptor) -> MonitorResult<()> {
        if self.worker.is_some() {
            return Err(MonitorError::AlreadyRunning("frame source"));
        }
        self.release_device();
        let backend = open_backend(descriptor, &self.settings)
            .map_err(|err| MonitorError::connection(descriptor.to_string(), format!("{err:#}")))?;
        self.descriptor = Some(descriptor.clone());
        self.attach(descriptor.to_string(), backend);
        Ok(())
    }

    fn attach(&mut self, label: String, backend: Box<dyn CaptureBackend>) {
        let negotiated = backend.negotiated();
        log::info!(
            "FrameSource: {} opened via {} ({}x{} @ {} fps)",
            label,
            backend.name(),
            negotiated.width,
            negotiated.height,
            negotiated.fps
        );
        self.negotiated = Some((negotiated, backend.name()));
        self.label = label;
        self.device = Arc::new(Mutex::new(Some(backend)));
        self.shared.device_open.store(true, Ordering::SeqCst);
    }

    /// Spawn the capture loop. Reconnects first when a previous `stop` released the device.
    pub fn start(&mut self) -> MonitorResult<()> {
        if self.worker.is_some() && self.shared.running.load(Ordering::SeqCst) {
            log::debug!("FrameSource: {} already capturing", self.label);
            return Ok(());
        }
        // A loop that ended on its own (finite source) is reaped before restarting.
        if let Some(handle) = self.worker.take() {
            join_with_timeout(handle, self.settings.join_timeout);
        }
        if !self.shared.device_open.load(Ordering::SeqCst) {
            let descriptor = self
                .descriptor
                .clone()
                .ok_or_else(|| MonitorError::connection(&self.label, "source is not connected"))?;
            self.connect(&descriptor)?;
        }

        let stop = Arc::new(AtomicBool::new(false));
        self.run_stop = Arc::clone(&stop);
        self.shared.healthy.store(true, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let device = Arc::clone(&self.device);
        let shared = Arc::clone(&self.shared);
        let settings = self.settings.clone();
        let label = self.label.clone();
        let handle = spawn_named("frame-capture", move || {
            capture_loop(&label, &device, &stop, &shared, &settings)
        })
        .map_err(|err| {
            self.shared.running.store(false, Ordering::SeqCst);
            MonitorError::Other(anyhow::Error::new(err).context("spawn capture thread"))
        })?;
        self.worker = Some(handle);
        log::info!("FrameSource: capture started for {}", self.label);
        Ok(())
    }

    /// Stop capturing and release the device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.run_stop.store(true, Ordering::SeqCst);
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            join_with_timeout(handle, self.settings.join_timeout);
        }
        self.release_device();
        self.shared.healthy.store(false, Ordering::SeqCst);
        self.shared.queue.clear();
        if was_running {
            log::info!("FrameSource: capture stopped for {}", self.label);
        }
    }

    fn release_device(&mut self) {
        let slot = mem::replace(&mut self.device, Arc::new(Mutex::new(None)));
        match slot.try_lock() {
            Ok(mut slot) => drop(slot.take()),
            Err(TryLockError::Poisoned(poisoned)) => drop(poisoned.into_inner().take()),
            Err(TryLockError::WouldBlock) => {
                // The detached capture thread drops the device when its read returns.
                log::warn!(
                    "FrameSource: read in flight on {}; device released when it returns",
                    self.label
                );
            }
        }
        self.shared.device_open.store(false, Ordering::SeqCst);
    }

    /// Newest captured frame; older queued frames are discarded.
    pub fn get_latest_frame(&self) -> Option<Arc<Frame>> {
        self.shared.queue.latest()
    }

    /// Oldest queued frame.
    pub fn get_frame(&self) -> Option<Arc<Frame>> {
        self.shared.queue.pop()
    }

    pub fn tap(&self) -> FrameTap {
        FrameTap {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Capture loop running, device open, and device reporting healthy.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn properties(&self) -> Option<SourceProperties> {
        let (negotiated, backend) = self.negotiated?;
        Some(SourceProperties {
            source: self.label.clone(),
            backend,
            width: negotiated.width,
            height: negotiated.height,
            fps: negotiated.fps,
            running: self.is_running(),
            buffer_size: self.shared.queue.capacity(),
        })
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.shared.queue.evicted(),
            read_failures: self.shared.read_failures.load(Ordering::Relaxed),
            queued: self.shared.queue.len(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    label: &str,
    device: &DeviceSlot,
    stop: &AtomicBool,
    shared: &SourceShared,
    settings: &CaptureSettings,
) {
    while !stop.load(Ordering::SeqCst) {
        let (outcome, finite, healthy) = {
            let mut slot = device.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(backend) = slot.as_mut() else {
                if !stop.load(Ordering::SeqCst) {
                    log::warn!("FrameSource: {label} lost its device; capture loop exiting");
                }
                break;
            };
            let outcome = backend.read_frame();
            (outcome, backend.is_finite(), backend.is_healthy())
        };
        // A read that outlived `stop` belongs to a finished run.
        if stop.load(Ordering::SeqCst) {
            log::debug!("FrameSource: {label} read returned after stop; discarded");
            break;
        }
        shared.healthy.store(healthy, Ordering::SeqCst);

        match outcome {
            Ok(Some(frame)) => {
                shared.frames_captured.fetch_add(1, Ordering::Relaxed);
                let evicted = shared.queue.push(Arc::new(frame));
                if evicted > 0 {
                    log::trace!("FrameSource: {label} queue full, evicted {evicted} frame(s)");
                }
            }
            Ok(None) => {
                log::info!("FrameSource: {label} reached end of stream");
                break;
            }
            Err(err) => {
                shared.read_failures.fetch_add(1, Ordering::Relaxed);
                if finite {
                    log::warn!("FrameSource: {label} read failed, ending capture: {err:#}");
                    break;
                }
                log::debug!("FrameSource: {label} read failed, retrying: {err:#}");
                thread::sleep(settings.retry_backoff);
            }
        }
    }

    if stop.load(Ordering::SeqCst) {
        // `stop` already reset the shared flags; only this run's device is ours.
        drop(device.lock().unwrap_or_else(PoisonError::into_inner).take());
    } else {
        shared.running.store(false, Ordering::SeqCst);
    }
}
