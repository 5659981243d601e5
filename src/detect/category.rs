//! Label to category mapping and per-category confidence thresholds.
//!
//! Detector labels are free-form ("Hardhat", "NO-Safety Vest", "helmet"). They
//! are matched case-insensitively against a static table of variants:
//!
//! 1. exact match against any variant;
//! 2. the label contains a variant (longest contained variant wins);
//! 3. a variant contains the label (first in table order wins).
//!
//! Anything else becomes `Category::Other` and counts toward nothing.

use serde::{Serialize, Serializer};

use super::result::EquipmentKind;

/// Confidence floor handed to the detector itself.
pub const DETECTOR_CONFIDENCE_FLOOR: f32 = 0.3;

/// Default threshold for categories without an explicit one.
pub const DEFAULT_BASE_THRESHOLD: f32 = 0.5;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Person,
    /// Positive equipment detection.
    Equipment(EquipmentKind),
    /// Explicit "missing equipment" detection (e.g. `NO-Hardhat`).
    Missing(EquipmentKind),
    /// Unrecognized label, lowercased.
    Other(String),
}

impl Category {
    pub fn name(&self) -> String {
        match self {
            Category::Person => "person".to_string(),
            Category::Equipment(kind) => kind.as_str().to_string(),
            Category::Missing(kind) => format!("no_{}", kind.as_str()),
            Category::Other(label) => label.clone(),
        }
    }

    pub fn is_ppe_related(&self) -> bool {
        !matches!(self, Category::Other(_))
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

struct CategoryEntry {
    category: Category,
    variants: &'static [&'static str],
    threshold: Option<f32>,
}

fn table() -> &'static [CategoryEntry] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<Vec<CategoryEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use EquipmentKind::*;
        vec![
            CategoryEntry {
                category: Category::Person,
                variants: &["person"],
                threshold: Some(0.5),
            },
            CategoryEntry {
                category: Category::Equipment(Hardhat),
                variants: &["hardhat", "helmet", "hard hat"],
                threshold: Some(0.7),
            },
            CategoryEntry {
                category: Category::Equipment(SafetyVest),
                variants: &["safety vest", "vest", "safety-vest"],
                threshold: Some(0.75),
            },
            CategoryEntry {
                category: Category::Equipment(Mask),
                variants: &["mask"],
                threshold: Some(0.6),
            },
            CategoryEntry {
                category: Category::Equipment(SafetyGloves),
                variants: &["safety gloves", "safety-gloves", "gloves"],
                threshold: None,
            },
            CategoryEntry {
                category: Category::Equipment(SafetyGlasses),
                variants: &["safety glasses", "safety-glasses", "glasses"],
                threshold: None,
            },
            CategoryEntry {
                category: Category::Equipment(HearingProtection),
                variants: &["hearing protection", "hearing-protection", "ear protection"],
                threshold: None,
            },
            CategoryEntry {
                category: Category::Missing(Hardhat),
                variants: &["no-hardhat", "no hardhat", "no-helmet", "no_hardhat"],
                threshold: Some(0.6),
            },
            CategoryEntry {
                category: Category::Missing(SafetyVest),
                variants: &[
                    "no-safety vest",
                    "no-safety-vest",
                    "no safety vest",
                    "no_safety_vest",
                ],
                threshold: Some(0.6),
            },
            CategoryEntry {
                category: Category::Missing(Mask),
                variants: &["no-mask", "no mask", "no_mask"],
                threshold: Some(0.6),
            },
        ]
    })
}

/// Map a raw detector label to its category.
pub fn categorize(label: &str) -> Category {
    let lowered = label.trim().to_lowercase();
    if lowered.is_empty() {
        return Category::Other(lowered);
    }
    let entries = table();

    if let Some(entry) = entries
        .iter()
        .find(|e| e.variants.iter().any(|v| *v == lowered))
    {
        return entry.category.clone();
    }

    let contained = entries
        .iter()
        .flat_map(|e| e.variants.iter().map(move |v| (e, *v)))
        .filter(|(_, v)| lowered.contains(v))
        .fold(None::<(&CategoryEntry, &str)>, |best, candidate| match best {
            Some((_, v)) if v.len() >= candidate.1.len() => best,
            _ => Some(candidate),
        });
    if let Some((entry, _)) = contained {
        return entry.category.clone();
    }

    if let Some(entry) = entries
        .iter()
        .find(|e| e.variants.iter().any(|v| v.contains(lowered.as_str())))
    {
        return entry.category.clone();
    }

    Category::Other(lowered)
}

/// Minimum confidence an accepted detection of `category` must meet.
pub fn required_confidence(category: &Category, base_threshold: f32) -> f32 {
    table()
        .iter()
        .find(|e| &e.category == category)
        .and_then(|e| e.threshold)
        .unwrap_or(base_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use EquipmentKind::*;

    #[test]
    fn label_fixture() {
        let fixture: &[(&str, Category)] = &[
            ("person", Category::Person),
            ("Person", Category::Person),
            ("PERSON ", Category::Person),
            ("Hardhat", Category::Equipment(Hardhat)),
            ("helmet", Category::Equipment(Hardhat)),
            ("Hard Hat", Category::Equipment(Hardhat)),
            ("yellow helmet", Category::Equipment(Hardhat)),
            ("Safety Vest", Category::Equipment(SafetyVest)),
            ("vest", Category::Equipment(SafetyVest)),
            ("hi-vis vest", Category::Equipment(SafetyVest)),
            ("Mask", Category::Equipment(Mask)),
            ("face mask", Category::Equipment(Mask)),
            ("gloves", Category::Equipment(SafetyGloves)),
            ("Safety-Gloves", Category::Equipment(SafetyGloves)),
            ("safety glasses", Category::Equipment(SafetyGlasses)),
            ("goggles glasses", Category::Equipment(SafetyGlasses)),
            ("ear protection", Category::Equipment(HearingProtection)),
            ("NO-Hardhat", Category::Missing(Hardhat)),
            ("no hardhat", Category::Missing(Hardhat)),
            ("no_hardhat", Category::Missing(Hardhat)),
            ("NO-Helmet", Category::Missing(Hardhat)),
            ("worker no-hardhat zone", Category::Missing(Hardhat)),
            ("NO-Safety Vest", Category::Missing(SafetyVest)),
            ("no_safety_vest", Category::Missing(SafetyVest)),
            ("NO-Mask", Category::Missing(Mask)),
            ("no mask", Category::Missing(Mask)),
            // Label shorter than a variant: "hard" is inside "hardhat".
            ("hard", Category::Equipment(Hardhat)),
            ("safety", Category::Equipment(SafetyVest)),
            ("Safety Cone", Category::Other("safety cone".into())),
            ("machinery", Category::Other("machinery".into())),
            ("vehicle", Category::Other("vehicle".into())),
            ("", Category::Other(String::new())),
        ];
        for (label, expected) in fixture {
            assert_eq!(&categorize(label), expected, "label {label:?}");
        }
    }

    #[test]
    fn negative_labels_never_map_to_positive_equipment() {
        for label in ["NO-Hardhat", "NO-Safety Vest", "NO-Mask"] {
            assert!(
                matches!(categorize(label), Category::Missing(_)),
                "{label} mapped to {:?}",
                categorize(label)
            );
        }
    }

    #[test]
    fn thresholds_follow_category_table() {
        assert_eq!(required_confidence(&Category::Person, 0.5), 0.5);
        assert_eq!(required_confidence(&Category::Equipment(Hardhat), 0.5), 0.7);
        assert_eq!(required_confidence(&Category::Equipment(SafetyVest), 0.5), 0.75);
        assert_eq!(required_confidence(&Category::Equipment(Mask), 0.5), 0.6);
        assert_eq!(required_confidence(&Category::Missing(SafetyVest), 0.5), 0.6);
        assert_eq!(required_confidence(&Category::Equipment(SafetyGloves), 0.4), 0.4);
        assert_eq!(required_confidence(&Category::Other("cone".into()), 0.55), 0.55);
    }

    #[test]
    fn category_names() {
        assert_eq!(Category::Missing(SafetyVest).name(), "no_safety_vest");
        assert_eq!(Category::Equipment(HearingProtection).name(), "hearing_protection");
        assert!(!Category::Other("cone".into()).is_ppe_related());
    }
}
