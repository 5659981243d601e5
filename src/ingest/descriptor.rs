use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::MonitorError;
use crate::frame::DEFAULT_QUEUE_CAPACITY;

/// Where frames come from.
///
/// Parsed from the strings operators type into configs and CLIs:
/// `"0"` and `"/dev/video0"` name a local device, `stub://name` a synthetic
/// source, any other `scheme://` a network stream, anything else a local path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    Device(String),
    Synthetic {
        name: String,
        /// Synthetic sources become finite when a frame limit is set (`?frames=N`).
        frame_limit: Option<u64>,
    },
    Stream(String),
    File(PathBuf),
}

impl SourceDescriptor {
    /// Finite sources end the capture loop on read failure or end of stream.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::File(_) => true,
            Self::Synthetic { frame_limit, .. } => frame_limit.is_some(),
            Self::Device(_) | Self::Stream(_) => false,
        }
    }
}

impl FromStr for SourceDescriptor {
    type Err = MonitorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MonitorError::connection(raw, "empty source descriptor"));
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self::Device(format!("/dev/video{raw}")));
        }
        if raw.starts_with("/dev/video") {
            return Ok(Self::Device(raw.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("stub://") {
            let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
            let mut frame_limit = None;
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some(("frames", value)) => {
                        let limit = value.parse::<u64>().map_err(|_| {
                            MonitorError::connection(raw, "frames must be an integer")
                        })?;
                        frame_limit = Some(limit);
                    }
                    _ => {
                        return Err(MonitorError::connection(
                            raw,
                            format!("unknown synthetic source option '{pair}'"),
                        ))
                    }
                }
            }
            return Ok(Self::Synthetic {
                name: name.to_string(),
                frame_limit,
            });
        }
        if raw.contains("://") {
            return Ok(Self::Stream(raw.to_string()));
        }
        Ok(Self::File(PathBuf::from(raw)))
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(path) => write!(f, "{path}"),
            Self::Synthetic {
                name,
                frame_limit: Some(limit),
            } => write!(f, "stub://{name}?frames={limit}"),
            Self::Synthetic { name, .. } => write!(f, "stub://{name}"),
            Self::Stream(url) => write!(f, "{url}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Capture parameters requested at connect time.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Hand-off queue capacity (clamped to at least 1).
    pub queue_capacity: usize,
    /// Pause before retrying after a transient read failure.
    pub retry_backoff: Duration,
    /// Upper bound on how long `stop()` waits for the capture thread.
    pub join_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 30,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_backoff: Duration::from_millis(100),
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Properties reported by the source after connecting.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceProperties {
    pub source: String,
    pub backend: &'static str,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub running: bool,
    pub buffer_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_indices_and_paths() {
        assert_eq!(
            "0".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::Device("/dev/video0".into())
        );
        assert_eq!(
            "/dev/video2".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::Device("/dev/video2".into())
        );
    }

    #[test]
    fn parses_synthetic_sources() {
        assert_eq!(
            "stub://yard".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::Synthetic {
                name: "yard".into(),
                frame_limit: None
            }
        );
        let finite: SourceDescriptor = "stub://yard?frames=12".parse().unwrap();
        assert!(finite.is_finite());
        assert_eq!(finite.to_string(), "stub://yard?frames=12");
        assert!("stub://yard?fps=3".parse::<SourceDescriptor>().is_err());
        assert!("stub://yard?frames=many".parse::<SourceDescriptor>().is_err());
    }

    #[test]
    fn parses_streams_and_files() {
        assert_eq!(
            "rtsp://10.0.0.4:554/stream".parse::<SourceDescriptor>().unwrap(),
            SourceDescriptor::Stream("rtsp://10.0.0.4:554/stream".into())
        );
        let file: SourceDescriptor = "site/clip.mp4".parse().unwrap();
        assert_eq!(file, SourceDescriptor::File(PathBuf::from("site/clip.mp4")));
        assert!(file.is_finite());
    }

    #[test]
    fn rejects_empty_descriptor() {
        assert!(matches!(
            "  ".parse::<SourceDescriptor>(),
            Err(MonitorError::Connection { .. })
        ));
    }
}
