//! YOLOv8 output decoding.
//!
//! The detection head emits `[1, 4 + C, A]`: for each of `A` anchors, a box
//! `(cx, cy, w, h)` in model-input pixels followed by `C` class scores. Decoding
//! keeps each anchor's best class above the floor, rescales the box to frame
//! pixels, and runs greedy non-maximum suppression per class.

use std::cmp::Ordering;

use anyhow::{ensure, Result};

use super::result::{BoundingBox, RawDetection};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &Candidate) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Decode a channel-major `[4 + C, A]` head into scored candidates.
///
/// `scale` maps model-input pixels to frame pixels on each axis.
pub fn decode(
    output: &[f32],
    num_classes: usize,
    scale: (f32, f32),
    confidence_floor: f32,
) -> Result<Vec<Candidate>> {
    let channels = 4 + num_classes;
    ensure!(num_classes > 0, "model reports no classes");
    ensure!(
        output.len() % channels == 0,
        "output length {} is not a multiple of {} channels",
        output.len(),
        channels
    );
    let anchors = output.len() / channels;
    let at = |channel: usize, anchor: usize| output[channel * anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (0..num_classes)
            .map(|c| (c, at(4 + c, anchor)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .unwrap_or((0, 0.0));
        if !score.is_finite() || score < confidence_floor {
            continue;
        }
        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        candidates.push(Candidate {
            x1: (cx - w / 2.0) * scale.0,
            y1: (cy - h / 2.0) * scale.1,
            x2: (cx + w / 2.0) * scale.0,
            y2: (cy + h / 2.0) * scale.1,
            score,
            class_id,
        });
    }
    Ok(candidates)
}

/// Greedy per-class non-maximum suppression, highest score first.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut keep: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if keep
            .iter()
            .filter(|kept| kept.class_id == candidate.class_id)
            .all(|kept| kept.iou(&candidate) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

/// Attach class names and round to integer frame pixels.
pub fn to_raw_detections(
    candidates: &[Candidate],
    class_names: &[String],
    frame_size: (u32, u32),
) -> Vec<RawDetection> {
    let (max_x, max_y) = (frame_size.0 as f32, frame_size.1 as f32);
    candidates
        .iter()
        .map(|c| {
            let label = class_names
                .get(c.class_id)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", c.class_id));
            let bbox = BoundingBox::new(
                c.x1.clamp(0.0, max_x).round() as i32,
                c.y1.clamp(0.0, max_y).round() as i32,
                c.x2.clamp(0.0, max_x).round() as i32,
                c.y2.clamp(0.0, max_y).round() as i32,
            );
            RawDetection::new(label, c.score, bbox)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a channel-major head from per-anchor rows `[cx, cy, w, h, scores..]`.
    fn head(rows: &[Vec<f32>]) -> Vec<f32> {
        let channels = rows[0].len();
        let mut out = vec![0.0; channels * rows.len()];
        for (anchor, row) in rows.iter().enumerate() {
            for (channel, value) in row.iter().enumerate() {
                out[channel * rows.len() + anchor] = *value;
            }
        }
        out
    }

    #[test]
    fn decode_picks_best_class_and_scales_boxes() -> Result<()> {
        let output = head(&[
            vec![100.0, 100.0, 40.0, 80.0, 0.1, 0.9],
            vec![300.0, 300.0, 20.0, 20.0, 0.2, 0.1],
        ]);
        let candidates = decode(&output, 2, (0.5, 0.5), 0.3)?;
        assert_eq!(candidates.len(), 1);
        let c = candidates[0];
        assert_eq!(c.class_id, 1);
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (40.0, 30.0, 60.0, 70.0));
        Ok(())
    }

    #[test]
    fn decode_rejects_malformed_output() {
        assert!(decode(&[0.0; 7], 2, (1.0, 1.0), 0.3).is_err());
        assert!(decode(&[], 0, (1.0, 1.0), 0.3).is_err());
    }

    #[test]
    fn nms_suppresses_overlaps_within_a_class_only() {
        let boxed = |x: f32, score: f32, class_id: usize| Candidate {
            x1: x,
            y1: 0.0,
            x2: x + 10.0,
            y2: 10.0,
            score,
            class_id,
        };
        let kept = non_max_suppression(
            vec![
                boxed(0.0, 0.6, 0),
                boxed(1.0, 0.9, 0),
                boxed(1.0, 0.8, 1),
                boxed(50.0, 0.5, 0),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].score, 0.9);
        assert!(kept.iter().any(|c| c.class_id == 1));
        assert!(kept.iter().all(|c| c.score != 0.6));
    }

    #[test]
    fn raw_detections_are_named_and_clamped() {
        let candidates = [Candidate {
            x1: -5.0,
            y1: 2.4,
            x2: 700.0,
            y2: 20.6,
            score: 0.8,
            class_id: 3,
        }];
        let names = vec!["Person".to_string()];
        let raw = to_raw_detections(&candidates, &names, (640, 480));
        assert_eq!(raw[0].label, "class_3");
        assert_eq!(raw[0].bbox, BoundingBox::new(0, 2, 640, 21));
    }
}
