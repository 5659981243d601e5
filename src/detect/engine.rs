//! Detection engine: runs the detector backend, applies per-category
//! thresholds, and infers violations.
//!
//! Violation inference, per required equipment kind:
//! 1. explicit negative detections (`NO-Hardhat`, ...) are that kind's violations;
//! 2. otherwise, with people present, a positive count below 80% of the people
//!    count yields one count-only violation;
//! 3. independently, people present with no mask detection of either polarity
//!    yields a `missing_mask` violation covering everyone.
//!
//! Results are rebuilt from scratch on every call.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use super::backend::DetectorBackend;
use super::backends::FallbackBackend;
use super::category::{categorize, required_confidence, Category, DETECTOR_CONFIDENCE_FLOOR};
use super::result::{
    Detection, DetectionResult, EquipmentKind, EquipmentTally, RawDetection, Severity, Violation,
    ViolationKind,
};
use crate::error::{MonitorError, MonitorResult};
use crate::frame::Frame;

/// Minimum share of people that must show a required item before the ratio
/// rule stays quiet.
pub const RATIO_SLACK: f64 = 0.8;

/// Classes of the standard construction-site PPE YOLOv8 model.
pub const DEFAULT_PPE_CLASSES: [&str; 10] = [
    "Hardhat",
    "Mask",
    "NO-Hardhat",
    "NO-Mask",
    "NO-Safety Vest",
    "Person",
    "Safety Cone",
    "Safety Vest",
    "machinery",
    "vehicle",
];

/// Which model to load and how to read its output.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelDescriptor {
    pub path: Option<PathBuf>,
    /// Square model input side in pixels.
    pub input_size: u32,
    pub class_names: Vec<String>,
    pub iou_threshold: f32,
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self {
            path: None,
            input_size: 640,
            class_names: DEFAULT_PPE_CLASSES.iter().map(|c| c.to_string()).collect(),
            iou_threshold: 0.45,
        }
    }
}

pub struct DetectionEngine {
    backend: Box<dyn DetectorBackend>,
    base_threshold: f32,
    confidence_floor: f32,
}

impl DetectionEngine {
    /// Load the model a descriptor names, falling back to the reduced-capability
    /// detector when it cannot be loaded.
    pub fn initialize(model: &ModelDescriptor, base_threshold: f32) -> Self {
        let backend = match load_backend(model) {
            Ok(backend) => backend,
            Err(err) => {
                log::warn!("DetectionEngine: {err}; using reduced-capability detector");
                Box::new(FallbackBackend::new())
            }
        };
        Self::with_backend(backend, base_threshold)
    }

    pub fn with_backend(backend: Box<dyn DetectorBackend>, base_threshold: f32) -> Self {
        let classes = backend.class_names();
        if !classes.is_empty() && !classes.iter().any(|c| categorize(c).is_ppe_related()) {
            log::warn!(
                "DetectionEngine: model classes {:?} include no PPE-related class",
                classes
            );
        }
        log::info!(
            "DetectionEngine: using {} backend (base threshold {:.2})",
            backend.name(),
            base_threshold
        );
        Self {
            backend,
            base_threshold,
            confidence_floor: DETECTOR_CONFIDENCE_FLOOR,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn model_classes(&self) -> Vec<String> {
        self.backend.class_names()
    }

    pub fn base_threshold(&self) -> f32 {
        self.base_threshold
    }

    /// Run detection and violation inference on one frame.
    pub fn detect(&mut self, frame: &Frame) -> MonitorResult<DetectionResult> {
        let started = Instant::now();
        let raw = self.backend.detect(
            frame.pixels(),
            frame.width,
            frame.height,
            self.confidence_floor,
        )?;
        let raw_count = raw.len();
        let (detections, people_count, equipment) = classify(raw, self.base_threshold);
        let violations = infer_violations(&detections, people_count, &equipment);
        let processing_time = started.elapsed();

        log::debug!(
            "DetectionEngine: frame {} raw={} accepted={} people={} violations={} in {:?}",
            frame.sequence,
            raw_count,
            detections.len(),
            people_count,
            violations.len(),
            processing_time
        );

        Ok(DetectionResult {
            detections,
            people_count,
            equipment,
            violations,
            processing_time,
        })
    }
}

fn load_backend(model: &ModelDescriptor) -> Result<Box<dyn DetectorBackend>, MonitorError> {
    let path = model
        .path
        .as_ref()
        .ok_or_else(|| MonitorError::ModelLoad("no model path configured".to_string()))?;
    if !path.exists() {
        return Err(MonitorError::ModelLoad(format!(
            "model file {} not found",
            path.display()
        )));
    }

    #[cfg(feature = "backend-tract")]
    {
        let mut backend = super::backends::TractBackend::new(
            path,
            model.input_size,
            model.class_names.clone(),
            model.iou_threshold,
        )
        .map_err(|err| MonitorError::ModelLoad(format!("{err:#}")))?;
        backend
            .warm_up()
            .map_err(|err| MonitorError::ModelLoad(format!("warm-up failed: {err:#}")))?;
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(MonitorError::ModelLoad(format!(
            "{} requires the backend-tract feature",
            path.display()
        )))
    }
}

/// Categorize raw detections and drop those below their category threshold.
pub fn classify(
    raw: Vec<RawDetection>,
    base_threshold: f32,
) -> (Vec<Detection>, u32, EquipmentTally) {
    let mut detections = Vec::with_capacity(raw.len());
    let mut people_count = 0;
    let mut tally = EquipmentTally::new();

    for det in raw {
        let category = categorize(&det.label);
        if det.confidence < required_confidence(&category, base_threshold) {
            continue;
        }
        match &category {
            Category::Person => people_count += 1,
            Category::Equipment(kind) => tally.increment(*kind),
            Category::Missing(_) | Category::Other(_) => {}
        }
        detections.push(Detection {
            bbox: det.bbox,
            confidence: det.confidence,
            label: det.label,
            category,
        });
    }
    (detections, people_count, tally)
}

/// Infer violations from accepted detections.
pub fn infer_violations(
    detections: &[Detection],
    people_count: u32,
    tally: &EquipmentTally,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut negated = BTreeSet::new();

    for det in detections {
        let Category::Missing(kind) = det.category else {
            continue;
        };
        let Some(violation_kind) = ViolationKind::for_equipment(kind) else {
            continue;
        };
        negated.insert(kind);
        violations.push(Violation {
            kind: violation_kind,
            severity: Severity::High,
            description: format!("Person detected without {}", kind.title()),
            bbox: Some(det.bbox),
            count: None,
            confidence: Some(det.confidence),
        });
    }

    if people_count == 0 {
        return violations;
    }

    for kind in EquipmentKind::REQUIRED {
        if negated.contains(&kind) {
            continue;
        }
        let present = tally.get(kind);
        if f64::from(present) < f64::from(people_count) * RATIO_SLACK {
            let missing = people_count.saturating_sub(present);
            if let Some(violation_kind) = ViolationKind::for_equipment(kind) {
                violations.push(Violation {
                    kind: violation_kind,
                    severity: Severity::High,
                    description: format!("{missing} person(s) likely missing {}", kind.title()),
                    bbox: None,
                    count: Some(missing),
                    confidence: None,
                });
            }
        }
    }

    let mask_seen = detections.iter().any(|d| {
        matches!(
            d.category,
            Category::Equipment(EquipmentKind::Mask) | Category::Missing(EquipmentKind::Mask)
        )
    });
    if !mask_seen {
        violations.push(Violation {
            kind: ViolationKind::MissingMask,
            severity: Severity::High,
            description: format!("{people_count} person(s) not wearing Face Mask"),
            bbox: None,
            count: Some(people_count),
            confidence: None,
        });
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::detect::result::BoundingBox;

    fn raw(label: &str, confidence: f32, x: i32) -> RawDetection {
        RawDetection::new(label, confidence, BoundingBox::new(x, 10, x + 40, 120))
    }

    fn run(raw_detections: Vec<RawDetection>) -> DetectionResult {
        let mut engine =
            DetectionEngine::with_backend(Box::new(ScriptedBackend::repeating(raw_detections)), 0.5);
        let frame = Frame::solid(64, 48, [0, 0, 0], 1).unwrap();
        engine.detect(&frame).unwrap()
    }

    fn of_kind(result: &DetectionResult, kind: ViolationKind) -> Vec<&Violation> {
        result.violations.iter().filter(|v| v.kind == kind).collect()
    }

    #[test]
    fn zero_detections_yield_no_people_and_no_violations() {
        let result = run(vec![]);
        assert_eq!(result.people_count, 0);
        assert!(result.violations.is_empty());
        assert!(result.equipment.iter().all(|(_, n)| n == 0));
    }

    #[test]
    fn ratio_rule_counts_missing_hardhats() {
        let result = run(vec![
            raw("Person", 0.9, 0),
            raw("Person", 0.9, 100),
            raw("Person", 0.9, 200),
            raw("Hardhat", 0.9, 0),
            raw("Safety Vest", 0.9, 0),
            raw("Safety Vest", 0.9, 100),
            raw("Safety Vest", 0.9, 200),
            raw("Mask", 0.9, 0),
            raw("Mask", 0.9, 100),
            raw("Mask", 0.9, 200),
        ]);
        assert_eq!(result.people_count, 3);
        let hardhat = of_kind(&result, ViolationKind::MissingHardhat);
        assert_eq!(hardhat.len(), 1);
        assert_eq!(hardhat[0].count, Some(2));
        assert_eq!(hardhat[0].description, "2 person(s) likely missing Hardhat");
        assert!(hardhat[0].bbox.is_none());
        assert!(of_kind(&result, ViolationKind::MissingSafetyVest).is_empty());
        assert!(of_kind(&result, ViolationKind::MissingMask).is_empty());
    }

    #[test]
    fn negatives_replace_the_ratio_rule_for_their_kind() {
        let result = run(vec![
            raw("Person", 0.9, 0),
            raw("Person", 0.9, 100),
            raw("Person", 0.9, 200),
            raw("NO-Hardhat", 0.8, 100),
            raw("Mask", 0.9, 0),
            raw("Mask", 0.9, 100),
            raw("Mask", 0.9, 200),
        ]);
        let hardhat = of_kind(&result, ViolationKind::MissingHardhat);
        assert_eq!(hardhat.len(), 1);
        assert_eq!(hardhat[0].description, "Person detected without Hardhat");
        assert_eq!(hardhat[0].bbox, Some(BoundingBox::new(100, 10, 140, 120)));
        assert_eq!(hardhat[0].confidence, Some(0.8));
        // Vest has no negatives, so the ratio rule still applies to it.
        let vest = of_kind(&result, ViolationKind::MissingSafetyVest);
        assert_eq!(vest.len(), 1);
        assert_eq!(vest[0].count, Some(3));
    }

    #[test]
    fn mask_fallback_is_additive() {
        let result = run(vec![
            raw("Person", 0.9, 0),
            raw("Person", 0.9, 100),
            raw("Hardhat", 0.9, 0),
            raw("Hardhat", 0.9, 100),
            raw("Safety Vest", 0.9, 0),
            raw("Safety Vest", 0.9, 100),
        ]);
        let masks = of_kind(&result, ViolationKind::MissingMask);
        assert!(masks
            .iter()
            .any(|v| v.count == Some(2) && v.description == "2 person(s) not wearing Face Mask"));
        assert!(masks.iter().all(|v| v.count == Some(2)));
        assert!(of_kind(&result, ViolationKind::MissingHardhat).is_empty());
    }

    #[test]
    fn negative_mask_suppresses_the_mask_fallback() {
        let result = run(vec![
            raw("Person", 0.9, 0),
            raw("Person", 0.9, 100),
            raw("NO-Mask", 0.7, 0),
        ]);
        let masks = of_kind(&result, ViolationKind::MissingMask);
        assert_eq!(masks.len(), 1);
        assert!(masks[0].bbox.is_some());
    }

    #[test]
    fn negatives_without_people_still_report() {
        let result = run(vec![raw("NO-Safety Vest", 0.9, 5)]);
        assert_eq!(result.people_count, 0);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].kind, ViolationKind::MissingSafetyVest);
    }

    #[test]
    fn thresholds_reject_below_and_accept_at_boundary() {
        let result = run(vec![
            raw("Hardhat", 0.69, 0),
            raw("Hardhat", 0.7, 50),
            raw("Safety Vest", 0.74, 0),
            raw("Person", 0.49, 0),
            raw("Safety Cone", 0.5, 0),
        ]);
        assert_eq!(result.equipment.get(EquipmentKind::Hardhat), 1);
        assert_eq!(result.equipment.get(EquipmentKind::SafetyVest), 0);
        assert_eq!(result.people_count, 0);
        assert_eq!(result.detections.len(), 2);
        for det in &result.detections {
            assert!(det.confidence >= required_confidence(&det.category, 0.5));
        }
    }

    #[test]
    fn detector_failure_surfaces_as_error() {
        let backend = ScriptedBackend::repeating(vec![]).failing_on([1]);
        let mut engine = DetectionEngine::with_backend(Box::new(backend), 0.5);
        let frame = Frame::solid(8, 8, [0, 0, 0], 1).unwrap();
        assert!(matches!(engine.detect(&frame), Err(MonitorError::Other(_))));
        assert!(engine.detect(&frame).is_ok());
    }

    #[test]
    fn missing_model_falls_back_to_reduced_capability() {
        let descriptor = ModelDescriptor {
            path: Some(PathBuf::from("/nonexistent/ppe.onnx")),
            ..ModelDescriptor::default()
        };
        let mut engine = DetectionEngine::initialize(&descriptor, 0.5);
        assert_eq!(engine.backend_name(), "fallback");
        assert!(engine.model_classes().is_empty());
        let frame = Frame::solid(8, 8, [0, 0, 0], 1).unwrap();
        assert!(engine.detect(&frame).unwrap().detections.is_empty());
    }

    #[test]
    fn results_are_rebuilt_per_call() {
        let backend = ScriptedBackend::new(vec![
            vec![raw("Person", 0.9, 0), raw("NO-Hardhat", 0.9, 0)],
            vec![],
        ]);
        let mut engine = DetectionEngine::with_backend(Box::new(backend), 0.5);
        let frame = Frame::solid(8, 8, [0, 0, 0], 1).unwrap();
        assert!(!engine.detect(&frame).unwrap().violations.is_empty());
        let second = engine.detect(&frame).unwrap();
        assert_eq!(second.people_count, 0);
        assert!(second.violations.is_empty());
    }

    #[test]
    fn default_model_classes_are_ppe_related() {
        let descriptor = ModelDescriptor::default();
        assert_eq!(descriptor.class_names.len(), 10);
        assert!(descriptor
            .class_names
            .iter()
            .any(|c| categorize(c) == Category::Missing(EquipmentKind::SafetyVest)));
    }
}
