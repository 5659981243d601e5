//! Detection: opaque detector backends, label categorization, thresholds and
//! violation inference.

mod backend;
pub mod backends;
pub mod category;
mod engine;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::{FallbackBackend, ScriptedBackend};
pub use category::{categorize, required_confidence, Category};
pub use engine::{
    classify, infer_violations, DetectionEngine, ModelDescriptor, DEFAULT_PPE_CLASSES, RATIO_SLACK,
};
pub use result::{
    BoundingBox, Detection, DetectionResult, EquipmentKind, EquipmentTally, RawDetection, Severity,
    Violation, ViolationKind,
};
