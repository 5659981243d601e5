use anyhow::Result;

use super::result::RawDetection;

/// Detector backend trait.
///
/// The detection model is opaque to the engine: a backend takes an RGB24 frame
/// and a confidence floor and returns labelled pixel boxes. Categorization and
/// per-category thresholds happen in `DetectionEngine`, not here.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class labels the model can emit.
    fn class_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run detection on a frame.
    ///
    /// `pixels` is packed RGB24, `width * height * 3` bytes, and must be treated as
    /// read-only. Detections below `confidence_floor` may be omitted.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        confidence_floor: f32,
    ) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
