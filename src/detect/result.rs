use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Serialize, Serializer};

use super::category::Category;

/// Axis-aligned box in integer pixel coordinates `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "[i32; 4]")]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1).max(0)
    }

    /// Manhattan distance between the two top-left corners, saturating at `i32::MAX`.
    pub fn origin_distance(&self, other: &BoundingBox) -> i32 {
        let distance = self
            .x1
            .abs_diff(other.x1)
            .saturating_add(self.y1.abs_diff(other.y1));
        i32::try_from(distance).unwrap_or(i32::MAX)
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Detection as reported by a backend, before categorization and thresholds.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub label: String,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            bbox,
            confidence,
            label: label.into(),
        }
    }
}

/// Accepted detection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub label: String,
    pub category: Category,
}

/// Protective-equipment kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    Hardhat,
    SafetyVest,
    Mask,
    SafetyGloves,
    SafetyGlasses,
    HearingProtection,
}

impl EquipmentKind {
    pub const ALL: [EquipmentKind; 6] = [
        EquipmentKind::Hardhat,
        EquipmentKind::SafetyVest,
        EquipmentKind::Mask,
        EquipmentKind::SafetyGloves,
        EquipmentKind::SafetyGlasses,
        EquipmentKind::HearingProtection,
    ];

    /// Kinds every person is expected to wear.
    pub const REQUIRED: [EquipmentKind; 3] = [
        EquipmentKind::Hardhat,
        EquipmentKind::SafetyVest,
        EquipmentKind::Mask,
    ];

    pub fn is_required(self) -> bool {
        Self::REQUIRED.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EquipmentKind::Hardhat => "hardhat",
            EquipmentKind::SafetyVest => "safety_vest",
            EquipmentKind::Mask => "mask",
            EquipmentKind::SafetyGloves => "safety_gloves",
            EquipmentKind::SafetyGlasses => "safety_glasses",
            EquipmentKind::HearingProtection => "hearing_protection",
        }
    }

    /// Human-readable name used in violation descriptions.
    pub fn title(self) -> &'static str {
        match self {
            EquipmentKind::Hardhat => "Hardhat",
            EquipmentKind::SafetyVest => "Safety Vest",
            EquipmentKind::Mask => "Mask",
            EquipmentKind::SafetyGloves => "Safety Gloves",
            EquipmentKind::SafetyGlasses => "Safety Glasses",
            EquipmentKind::HearingProtection => "Hearing Protection",
        }
    }
}

/// Positive-detection count per equipment kind. Every kind is always present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EquipmentTally(BTreeMap<EquipmentKind, u32>);

impl EquipmentTally {
    pub fn new() -> Self {
        Self(EquipmentKind::ALL.iter().map(|k| (*k, 0)).collect())
    }

    pub fn get(&self, kind: EquipmentKind) -> u32 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, kind: EquipmentKind) {
        *self.0.entry(kind).or_insert(0) += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = (EquipmentKind, u32)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn any_required(&self) -> bool {
        EquipmentKind::REQUIRED.iter().any(|k| self.get(*k) > 0)
    }
}

impl Default for EquipmentTally {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ViolationKind {
    #[serde(rename = "missing_hardhat")]
    MissingHardhat,
    #[serde(rename = "missing_safety_vest")]
    MissingSafetyVest,
    #[serde(rename = "missing_mask")]
    MissingMask,
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 3] = [
        ViolationKind::MissingHardhat,
        ViolationKind::MissingSafetyVest,
        ViolationKind::MissingMask,
    ];

    /// Violation kind for a missing piece of required equipment.
    pub fn for_equipment(kind: EquipmentKind) -> Option<Self> {
        match kind {
            EquipmentKind::Hardhat => Some(ViolationKind::MissingHardhat),
            EquipmentKind::SafetyVest => Some(ViolationKind::MissingSafetyVest),
            EquipmentKind::Mask => Some(ViolationKind::MissingMask),
            _ => None,
        }
    }

    pub fn equipment(self) -> EquipmentKind {
        match self {
            ViolationKind::MissingHardhat => EquipmentKind::Hardhat,
            ViolationKind::MissingSafetyVest => EquipmentKind::SafetyVest,
            ViolationKind::MissingMask => EquipmentKind::Mask,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::MissingHardhat => "missing_hardhat",
            ViolationKind::MissingSafetyVest => "missing_safety_vest",
            ViolationKind::MissingMask => "missing_mask",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Result of running detection on a frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub people_count: u32,
    #[serde(rename = "safety_equipment")]
    pub equipment: EquipmentTally,
    pub violations: Vec<Violation>,
    #[serde(serialize_with = "serialize_secs")]
    pub processing_time: Duration,
}

impl DetectionResult {
    /// Inference rate implied by the processing time (0 when unknown).
    pub fn fps(&self) -> f64 {
        let secs = self.processing_time.as_secs_f64();
        if secs > 0.0 {
            1.0 / secs
        } else {
            0.0
        }
    }

    pub fn is_compliant(&self) -> bool {
        self.violations.is_empty()
    }
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}
