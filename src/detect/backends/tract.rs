#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::detect::yolo;

/// Tract-based backend for YOLOv8 ONNX detection models.
///
/// Frames are resized to the square model input, normalized to `0..1`, and the
/// `[1, 4 + C, A]` head is decoded with per-class NMS.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    class_names: Vec<String>,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
        iou_threshold: f32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractBackend: loaded {} ({} classes, input {}x{})",
            model_path.display(),
            class_names.len(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            input_size,
            class_names,
            iou_threshold,
        })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let frame = RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| anyhow!("pixel buffer does not match {width}x{height}"))?;
        let resized = image::imageops::resize(
            &frame,
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0
        });
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_names(&self) -> Vec<String> {
        self.class_names.clone()
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        confidence_floor: f32,
    ) -> Result<Vec<RawDetection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = view.iter().copied().collect();

        let scale = (
            width as f32 / self.input_size as f32,
            height as f32 / self.input_size as f32,
        );
        let candidates = yolo::decode(&flat, self.class_names.len(), scale, confidence_floor)?;
        let kept = yolo::non_max_suppression(candidates, self.iou_threshold);
        Ok(yolo::to_raw_detections(&kept, &self.class_names, (width, height)))
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = vec![0u8; (side * side * 3) as usize];
        self.detect(&blank, side, side, 1.0).map(|_| ())
    }
}
