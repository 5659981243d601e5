//! Violation capture: persist annotated frames that contained violations.
//!
//! The coordinator only sees the `ViolationCapture` trait. `FilesystemCaptureStore`
//! writes `violation_<timestamp>.jpg` with a sibling `_metadata.json` and keeps at
//! most `max_images` captures on disk.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::detect::Violation;
use crate::frame::Frame;

pub const DEFAULT_MAX_IMAGES: usize = 1000;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureMetadata {
    pub timestamp: DateTime<Utc>,
    pub violations: Vec<Violation>,
    pub people_count: u32,
}

pub trait ViolationCapture: Send {
    /// Persist one annotated frame; returns where it was written.
    fn save(&mut self, frame: &Frame, metadata: &CaptureMetadata) -> Result<PathBuf>;
}

#[derive(Serialize)]
struct StoredMetadata<'a> {
    #[serde(flatten)]
    metadata: &'a CaptureMetadata,
    image: String,
    image_sha256: String,
    frame_sequence: u64,
}

#[derive(Clone, Debug)]
pub struct FilesystemCaptureStore {
    dir: PathBuf,
    jpeg_quality: u8,
    max_images: usize,
}

impl FilesystemCaptureStore {
    pub fn open(dir: impl Into<PathBuf>, jpeg_quality: u8, max_images: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create capture directory {}", dir.display()))?;
        Ok(Self {
            dir,
            jpeg_quality,
            max_images: max_images.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Captured images, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let mut images: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("read capture directory {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension().is_some_and(|ext| ext == "jpg")
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("violation_"))
            })
            .collect();
        images.sort();
        Ok(images)
    }

    fn unique_stem(&self, timestamp: DateTime<Utc>) -> String {
        let base = format!("violation_{}", timestamp.format("%Y%m%d_%H%M%S_%3f"));
        let mut stem = base.clone();
        let mut n = 1;
        while self.dir.join(format!("{stem}.jpg")).exists() {
            stem = format!("{base}_{n}");
            n += 1;
        }
        stem
    }

    fn prune(&self) -> Result<()> {
        let images = self.list()?;
        let excess = images.len().saturating_sub(self.max_images);
        for image in images.iter().take(excess) {
            fs::remove_file(image)
                .with_context(|| format!("remove old capture {}", image.display()))?;
            let metadata = metadata_path(image);
            if metadata.exists() {
                fs::remove_file(&metadata)
                    .with_context(|| format!("remove old capture {}", metadata.display()))?;
            }
            log::debug!("FilesystemCaptureStore: pruned {}", image.display());
        }
        Ok(())
    }
}

impl ViolationCapture for FilesystemCaptureStore {
    fn save(&mut self, frame: &Frame, metadata: &CaptureMetadata) -> Result<PathBuf> {
        let jpeg = frame.encode_jpeg(self.jpeg_quality)?;
        let stem = self.unique_stem(metadata.timestamp);
        let image_path = self.dir.join(format!("{stem}.jpg"));
        write_atomic(&image_path, &jpeg)?;

        let stored = StoredMetadata {
            metadata,
            image: format!("{stem}.jpg"),
            image_sha256: hex::encode(Sha256::digest(&jpeg)),
            frame_sequence: frame.sequence,
        };
        let json = serde_json::to_vec_pretty(&stored).context("serialize capture metadata")?;
        write_atomic(&metadata_path(&image_path), &json)?;

        self.prune()?;
        log::info!(
            "FilesystemCaptureStore: saved {} ({} violation(s))",
            image_path.display(),
            metadata.violations.len()
        );
        Ok(image_path)
    }
}

fn metadata_path(image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("violation");
    image.with_file_name(format!("{stem}_metadata.json"))
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}
