//! Error taxonomy for the public component boundaries.
//!
//! Internals (backends, stores, config parsing) work in `anyhow::Result` and are
//! folded into `MonitorError` where they cross a component boundary.

use thiserror::Error;

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The capture device or stream could not be opened.
    #[error("failed to open video source {source_name:?}: {reason}")]
    Connection { source_name: String, reason: String },

    /// The detection model could not be loaded. The engine never surfaces this to
    /// callers; it is logged while falling back to the reduced-capability detector.
    #[error("failed to load detection model: {0}")]
    ModelLoad(String),

    /// A frame buffer does not match its declared dimensions.
    #[error("render invariant violated: {0}")]
    Render(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MonitorError {
    pub(crate) fn connection(
        source_name: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Connection {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}
