//! Synthetic frame source (`stub://name`).
//!
//! Generates a moving test pattern at the requested rate. Used by tests, the demo
//! binary, and deployments that want to exercise the pipeline without a camera.

use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};

use super::backend::{CaptureBackend, Negotiated};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Frames per second. 0 disables pacing.
    pub fps: u32,
    /// End of stream after this many frames.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            frame_limit: None,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    /// Simulated scene state; changes every 50 frames.
    scene_state: u8,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        log::info!(
            "SyntheticSource: {} ({}x{} @ {} fps)",
            config.name,
            config.width,
            config.height,
            config.fps
        );
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            last_frame_at: None,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn pace(&mut self) {
        if self.config.fps == 0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / f64::from(self.config.fps));
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    /// Diagonal gradient with a bright block sweeping across the frame.
    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let (width, height) = (self.config.width as usize, self.config.height as usize);
        let mut pixels = vec![0u8; width * height * 3];
        let block = (width / 8).max(1);
        let block_x = (self.frame_count as usize * 4) % width.max(1);
        let block_y = height / 3;
        let noise = rand::random::<u8>() % 8;

        for (idx, px) in pixels.chunks_exact_mut(3).enumerate() {
            let (x, y) = (idx % width, idx / width);
            let shade = ((x + y + self.scene_state as usize) % 128) as u8;
            px.copy_from_slice(&[shade / 2 + noise, shade / 2 + 40, shade / 3 + 60]);
            if x >= block_x && x < block_x + block && y >= block_y && y < block_y + block * 2 {
                px.copy_from_slice(&[230, 180, 40]);
            }
        }
        pixels
    }
}

impl CaptureBackend for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.pace();
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        let frame = Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )?;
        Ok(Some(frame))
    }

    fn is_finite(&self) -> bool {
        self.config.frame_limit.is_some()
    }

    fn negotiated(&self) -> Negotiated {
        Negotiated {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
        }
    }
}
