use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Reduced-capability backend used when no model could be loaded.
///
/// Reports no detections, so the pipeline keeps streaming frames with zero
/// people and no violations instead of refusing to start.
#[derive(Default)]
pub struct FallbackBackend {
    frames_seen: u64,
}

impl FallbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for FallbackBackend {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn detect(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        _confidence_floor: f32,
    ) -> Result<Vec<RawDetection>> {
        self.frames_seen += 1;
        Ok(Vec::new())
    }
}
