//! Frame container and the latest-frame hand-off queue.
//!
//! - `Frame`: immutable RGB24 image plus capture timestamps. Pixels are private and
//!   there is no mutable accessor; frames travel between threads as `Arc<Frame>`.
//! - `FrameQueue`: bounded single-producer/single-consumer hand-off between the
//!   capture loop and the processing loop. The producer never blocks: a full queue
//!   evicts its oldest entry.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{MonitorError, MonitorResult};

/// Default hand-off queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Captured video frame. Packed RGB24, row-major.
///
/// Deliberately not `Clone`: consumers share the capture through `Arc<Frame>`,
/// and rendering produces a new frame instead of touching this one.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Per-source capture sequence number (1-based).
    pub sequence: u64,
    captured_at: DateTime<Utc>,
    capture_instant: Instant,
}

impl Frame {
    /// Wrap an RGB24 buffer captured now. The buffer length must equal `width * height * 3`.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> MonitorResult<Self> {
        let expected = rgb_len(width, height)
            .ok_or_else(|| MonitorError::Render(format!("frame {width}x{height} overflows")))?;
        if pixels.len() != expected {
            return Err(MonitorError::Render(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Utc::now(),
            capture_instant: Instant::now(),
        })
    }

    /// Frame filled with a single colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> MonitorResult<Self> {
        let len = rgb_len(width, height)
            .ok_or_else(|| MonitorError::Render(format!("frame {width}x{height} overflows")))?;
        let pixels = rgb.iter().copied().cycle().take(len).collect();
        Self::new(pixels, width, height, sequence)
    }

    pub fn from_rgb_image(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: image.into_raw(),
            width,
            height,
            sequence,
            captured_at: Utc::now(),
            capture_instant: Instant::now(),
        }
    }

    /// Derived frame (e.g. an annotated copy) that keeps this frame's timestamps.
    pub(crate) fn derive(&self, image: RgbImage) -> MonitorResult<Self> {
        if image.dimensions() != (self.width, self.height) {
            return Err(MonitorError::Render(format!(
                "derived frame is {:?}, source is {}x{}",
                image.dimensions(),
                self.width,
                self.height
            )));
        }
        Ok(Self {
            pixels: image.into_raw(),
            width: self.width,
            height: self.height,
            sequence: self.sequence,
            captured_at: self.captured_at,
            capture_instant: self.capture_instant,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        self.capture_instant.elapsed()
    }

    /// Owned RGB image copy of the pixels.
    pub fn to_rgb_image(&self) -> MonitorResult<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            MonitorError::Render(format!(
                "pixel buffer does not match {}x{}",
                self.width, self.height
            ))
        })
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
            .encode(
                &self.pixels,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
        Ok(buffer)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}

fn rgb_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
}

// ----------------------------------------------------------------------------
// FrameQueue: bounded latest-frame hand-off
// ----------------------------------------------------------------------------

/// Bounded FIFO of captured frames.
///
/// Critical sections are single push/pop operations, so the capture thread is
/// never held up by a slow consumer. Capacity 1 behaves as a single latest-frame slot.
pub struct FrameQueue {
    frames: Mutex<VecDeque<Arc<Frame>>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    /// Push a frame, evicting the oldest entries while the queue is full.
    /// Returns the number of frames evicted.
    pub fn push(&self, frame: Arc<Frame>) -> usize {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let mut evicted = 0;
        while frames.len() >= self.capacity {
            frames.pop_front();
            evicted += 1;
        }
        frames.push_back(frame);
        drop(frames);
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Drain the queue and return only the newest frame.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let latest = frames.pop_back();
        frames.clear();
        latest
    }

    /// Ordered FIFO dequeue.
    pub fn pop(&self) -> Option<Arc<Frame>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn clear(&self) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted by full-queue pushes.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
