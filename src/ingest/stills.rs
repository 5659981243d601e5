//! Still image source: a single image file or a directory of images.
//!
//! Images are decoded with the `image` crate in name order and replayed at the
//! configured rate. The source is finite.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::backend::{CaptureBackend, Negotiated};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// True when the path names a still image this source can decode.
pub fn is_still_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub struct StillsSource {
    queue: Vec<PathBuf>,
    next_index: usize,
    target_fps: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_dimensions: (u32, u32),
}

impl StillsSource {
    pub fn open(path: &Path, target_fps: u32) -> Result<Self> {
        let queue = if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("read image directory {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_still_image(p))
                .collect();
            entries.sort();
            entries
        } else if is_still_image(path) {
            vec![path.to_path_buf()]
        } else {
            anyhow::bail!("{} is not a supported image", path.display());
        };
        if queue.is_empty() {
            anyhow::bail!("no images found in {}", path.display());
        }

        let (width, height) = image::image_dimensions(&queue[0])
            .with_context(|| format!("read dimensions of {}", queue[0].display()))?;
        log::info!(
            "StillsSource: {} image(s) from {} ({}x{})",
            queue.len(),
            path.display(),
            width,
            height
        );

        Ok(Self {
            queue,
            next_index: 0,
            target_fps,
            frame_count: 0,
            last_frame_at: None,
            last_dimensions: (width, height),
        })
    }

    pub fn remaining(&self) -> usize {
        self.queue.len() - self.next_index
    }

    fn pace(&mut self) {
        if self.target_fps > 0 {
            let interval = Duration::from_secs_f64(1.0 / f64::from(self.target_fps));
            if let Some(last) = self.last_frame_at {
                let elapsed = last.elapsed();
                if elapsed < interval {
                    thread::sleep(interval - elapsed);
                }
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl CaptureBackend for StillsSource {
    fn name(&self) -> &'static str {
        "stills"
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.queue.get(self.next_index).cloned() else {
            return Ok(None);
        };
        self.next_index += 1;

        let image = image::open(&path)
            .with_context(|| format!("decode image {}", path.display()))?
            .to_rgb8();
        self.pace();
        self.frame_count += 1;
        self.last_dimensions = image.dimensions();
        Ok(Some(Frame::from_rgb_image(image, self.frame_count)))
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn negotiated(&self) -> Negotiated {
        Negotiated {
            width: self.last_dimensions.0,
            height: self.last_dimensions.1,
            fps: self.target_fps,
        }
    }
}
