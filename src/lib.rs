//! Safety Monitor
//!
//! Live PPE compliance monitoring: capture video, detect people and protective
//! equipment, infer violations, and stream annotated frames with statistics.
//!
//! # Architecture
//!
//! Two worker threads per monitor, connected only by a bounded frame queue:
//!
//! 1. **Capture** (`ingest::FrameSource`): blocking device reads, newest-frame
//!    hand-off, oldest frames evicted when the consumer falls behind.
//! 2. **Processing** (`stream::StreamCoordinator`): detection every Nth frame,
//!    cached result in between, rendering, violation log, subscriber push.
//!
//! Violation inference applies, in order: explicit negative detections per
//! equipment kind, the population ratio rule for kinds without negatives, and
//! the unconditional face-mask fallback.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames and the bounded hand-off queue
//! - `ingest`: capture backends (synthetic, stills, FFmpeg, V4L2, RTSP)
//! - `detect`: detector backends, label categories, thresholds, violation inference
//! - `annotate`: person assignment and compliance overlays
//! - `stream`: processing loop, violation log, subscribers
//! - `capture`: persisted violation snapshots
//! - `monitor`: the `SafetyMonitor` control surface

pub mod annotate;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod stream;
pub mod ui;
mod worker;

pub use annotate::{assign_people, AnnotationRenderer, PersonRecord};
pub use capture::{CaptureMetadata, FilesystemCaptureStore, ViolationCapture};
pub use config::MonitorConfig;
pub use detect::{
    categorize, BoundingBox, Category, Detection, DetectionEngine, DetectionResult,
    DetectorBackend, EquipmentKind, EquipmentTally, ModelDescriptor, RawDetection, Severity,
    Violation, ViolationKind,
};
pub use error::{MonitorError, MonitorResult};
pub use frame::{Frame, FrameQueue};
pub use ingest::{CaptureBackend, CaptureSettings, FrameSource, SourceDescriptor};
pub use monitor::SafetyMonitor;
pub use stream::{
    ChannelSubscriber, MonitorStats, StreamConfig, StreamCoordinator, StreamUpdate, Subscriber,
    ViolationLogEntry,
};
