//! Frame ingestion sources.
//!
//! - Synthetic test pattern (`stub://name`)
//! - Still images and image directories
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - RTSP and other network streams (feature: rtsp-gstreamer)
//!
//! Every backend produces RGB24 `Frame`s; `FrameSource` runs the capture loop
//! and hands frames to consumers through a bounded queue.

mod backend;
mod descriptor;
#[cfg(feature = "ingest-file-ffmpeg")]
mod file_ffmpeg;
#[cfg(feature = "rtsp-gstreamer")]
mod rtsp;
mod source;
pub mod stills;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use backend::{CaptureBackend, Negotiated};
pub use descriptor::{CaptureSettings, SourceDescriptor, SourceProperties};
pub use source::{open_backend, FrameSource, FrameTap, SourceStats};
pub use stills::StillsSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
