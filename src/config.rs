use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::DEFAULT_MAX_IMAGES;
use crate::detect::{ModelDescriptor, DEFAULT_PPE_CLASSES};
use crate::error::{MonitorError, MonitorResult};
use crate::ingest::{CaptureSettings, SourceDescriptor};
use crate::stream::{StreamConfig, DEFAULT_LOG_CAPACITY};

const DEFAULT_SOURCE: &str = "stub://site_camera";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_QUEUE_CAPACITY: usize = 10;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_BASE_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_DETECT_EVERY: u64 = 3;
const DEFAULT_JPEG_QUALITY: u8 = 75;
const DEFAULT_CAPTURE_COOLDOWN_SECS: u64 = 5;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    source: Option<String>,
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    stream: Option<StreamConfigFile>,
    violations: Option<ViolationsConfigFile>,
    preview_path: Option<PathBuf>,
    stats_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
    base_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    detect_every: Option<u64>,
    log_capacity: Option<usize>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ViolationsConfigFile {
    capture_dir: Option<PathBuf>,
    max_images: Option<usize>,
    cooldown_secs: Option<u64>,
}

/// Daemon configuration: optional file, defaults, then environment overrides.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: String,
    pub capture: CaptureSection,
    pub detection: DetectionSection,
    pub stream: StreamSection,
    pub violations: ViolationsSection,
    /// Latest annotated JPEG is written here when set.
    pub preview_path: Option<PathBuf>,
    pub stats_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureSection {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct DetectionSection {
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub class_names: Vec<String>,
    pub base_threshold: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct StreamSection {
    pub detect_every: u64,
    pub log_capacity: usize,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct ViolationsSection {
    /// Violation captures are disabled when unset.
    pub capture_dir: Option<PathBuf>,
    pub max_images: usize,
    pub cooldown: Duration,
}

impl MonitorConfig {
    /// Load from `SAFETY_MONITOR_CONFIG` (TOML when the path ends in `.toml`,
    /// JSON otherwise) and the `SAFETY_MONITOR_*` overrides.
    pub fn load() -> MonitorResult<Self> {
        Self::load_inner().map_err(|err| MonitorError::Config(format!("{err:#}")))
    }

    fn load_inner() -> Result<Self> {
        let config_path = std::env::var("SAFETY_MONITOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let violations = file.violations.unwrap_or_default();
        Self {
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            capture: CaptureSection {
                width: capture.width.unwrap_or(DEFAULT_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_HEIGHT),
                target_fps: capture.target_fps.unwrap_or(DEFAULT_FPS),
                queue_capacity: capture.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            },
            detection: DetectionSection {
                model_path: detection.model_path,
                input_size: detection.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                class_names: detection.class_names.unwrap_or_else(|| {
                    DEFAULT_PPE_CLASSES.iter().map(|c| c.to_string()).collect()
                }),
                base_threshold: detection.base_threshold.unwrap_or(DEFAULT_BASE_THRESHOLD),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            stream: StreamSection {
                detect_every: stream.detect_every.unwrap_or(DEFAULT_DETECT_EVERY),
                log_capacity: stream.log_capacity.unwrap_or(DEFAULT_LOG_CAPACITY),
                jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            violations: ViolationsSection {
                capture_dir: violations.capture_dir,
                max_images: violations.max_images.unwrap_or(DEFAULT_MAX_IMAGES),
                cooldown: Duration::from_secs(
                    violations
                        .cooldown_secs
                        .unwrap_or(DEFAULT_CAPTURE_COOLDOWN_SECS),
                ),
            },
            preview_path: file.preview_path,
            stats_interval: Duration::from_secs(
                file.stats_interval_secs
                    .unwrap_or(DEFAULT_STATS_INTERVAL_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("SAFETY_MONITOR_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(model) = std::env::var("SAFETY_MONITOR_MODEL") {
            if !model.trim().is_empty() {
                self.detection.model_path = Some(PathBuf::from(model));
            }
        }
        if let Ok(every) = std::env::var("SAFETY_MONITOR_DETECT_EVERY") {
            self.stream.detect_every = every
                .trim()
                .parse()
                .map_err(|_| anyhow!("SAFETY_MONITOR_DETECT_EVERY must be a positive integer"))?;
        }
        if let Ok(capacity) = std::env::var("SAFETY_MONITOR_LOG_CAPACITY") {
            self.stream.log_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("SAFETY_MONITOR_LOG_CAPACITY must be a positive integer"))?;
        }
        if let Ok(dir) = std::env::var("SAFETY_MONITOR_CAPTURE_DIR") {
            if !dir.trim().is_empty() {
                self.violations.capture_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.source = self.source.trim().to_string();
        self.descriptor()?;

        let det = &self.detection;
        if !(det.base_threshold > 0.0 && det.base_threshold <= 1.0) {
            return Err(anyhow!("detection.base_threshold must be in (0, 1]"));
        }
        if !(det.iou_threshold > 0.0 && det.iou_threshold <= 1.0) {
            return Err(anyhow!("detection.iou_threshold must be in (0, 1]"));
        }
        if det.input_size == 0 {
            return Err(anyhow!("detection.input_size must be greater than zero"));
        }
        if det.class_names.is_empty() {
            return Err(anyhow!("detection.class_names must not be empty"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.queue_capacity == 0 {
            return Err(anyhow!("capture.queue_capacity must be at least 1"));
        }
        if self.stream.detect_every == 0 {
            return Err(anyhow!("stream.detect_every must be at least 1"));
        }
        if self.stream.log_capacity == 0 {
            return Err(anyhow!("stream.log_capacity must be at least 1"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("stream.jpeg_quality must be between 1 and 100"));
        }
        if self.violations.max_images == 0 {
            return Err(anyhow!("violations.max_images must be at least 1"));
        }
        if self.stats_interval.is_zero() {
            return Err(anyhow!("stats_interval_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn descriptor(&self) -> Result<SourceDescriptor> {
        self.source
            .parse()
            .with_context(|| format!("invalid source {:?}", self.source))
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            width: self.capture.width,
            height: self.capture.height,
            target_fps: self.capture.target_fps,
            queue_capacity: self.capture.queue_capacity,
            ..CaptureSettings::default()
        }
    }

    pub fn model_descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            path: self.detection.model_path.clone(),
            input_size: self.detection.input_size,
            class_names: self.detection.class_names.clone(),
            iou_threshold: self.detection.iou_threshold,
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            detect_every: self.stream.detect_every,
            log_capacity: self.stream.log_capacity,
            jpeg_quality: self.stream.jpeg_quality,
            capture_cooldown: self.violations.cooldown,
            ..StreamConfig::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
