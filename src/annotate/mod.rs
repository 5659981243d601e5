//! Compliance overlays.
//!
//! Rendering associates violations with people, then draws positive equipment
//! boxes and one status box per person onto a copy of the frame. The input
//! frame is never modified.

pub mod draw;
pub mod font;

use image::{Rgb, RgbImage};

use crate::detect::{
    BoundingBox, Category, DetectionResult, EquipmentKind, ViolationKind,
};
use crate::error::MonitorResult;
use crate::frame::Frame;

/// Violations with a box attach to the nearest person only within this
/// Manhattan distance between box origins.
pub const PROXIMITY_CUTOFF: i32 = 100;

/// Weight of the shadow/label-background layer in the final blend.
pub const OVERLAY_ALPHA: f32 = 0.15;

const SHADOW_OFFSET: i32 = 3;
const LABEL_PADDING: i32 = 8;
const LABEL_HEIGHT: i32 = font::GLYPH_HEIGHT * 2 + 12;
const OFFSCREEN_MARGIN: i32 = 1024;

mod palette {
    use image::Rgb;

    pub const HARDHAT: Rgb<u8> = Rgb([46, 204, 113]);
    pub const SAFETY_VEST: Rgb<u8> = Rgb([241, 196, 15]);
    pub const MASK: Rgb<u8> = Rgb([0, 191, 255]);
    pub const EQUIPMENT: Rgb<u8> = Rgb([52, 152, 219]);
    pub const PERSON_COMPLIANT: Rgb<u8> = Rgb([46, 204, 113]);
    pub const PERSON_VIOLATION: Rgb<u8> = Rgb([231, 76, 60]);
    pub const TEXT_BG: Rgb<u8> = Rgb([44, 62, 80]);
    pub const TEXT_PRIMARY: Rgb<u8> = Rgb([255, 255, 255]);
    pub const TEXT_SECONDARY: Rgb<u8> = Rgb([149, 165, 166]);
    pub const SHADOW: Rgb<u8> = Rgb([0, 0, 0]);
}

/// A detected person and the violations attributed to them for drawing.
#[derive(Clone, Debug, PartialEq)]
pub struct PersonRecord {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub violations: Vec<ViolationKind>,
}

impl PersonRecord {
    pub fn is_compliant(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Attribute a result's violations to its people.
///
/// - Boxed violations go to the nearest person within `PROXIMITY_CUTOFF`, or nowhere.
/// - Count-only violations go to every person.
/// - When the frame has people, no violations, and no required equipment at all,
///   every person is marked as missing every required item.
pub fn assign_people(result: &DetectionResult) -> Vec<PersonRecord> {
    let mut people: Vec<PersonRecord> = result
        .detections
        .iter()
        .filter(|d| d.category == Category::Person)
        .map(|d| PersonRecord {
            bbox: d.bbox,
            confidence: d.confidence,
            violations: Vec::new(),
        })
        .collect();

    for violation in &result.violations {
        match violation.bbox {
            Some(bbox) => {
                let nearest = people
                    .iter_mut()
                    .map(|p| (p.bbox.origin_distance(&bbox), p))
                    .min_by_key(|(distance, _)| *distance);
                if let Some((distance, person)) = nearest {
                    if distance < PROXIMITY_CUTOFF {
                        person.violations.push(violation.kind);
                    }
                }
            }
            None => {
                for person in &mut people {
                    person.violations.push(violation.kind);
                }
            }
        }
    }

    let required_seen = result
        .detections
        .iter()
        .any(|d| matches!(d.category, Category::Equipment(kind) if kind.is_required()));
    if result.violations.is_empty() && !people.is_empty() && !required_seen {
        for person in &mut people {
            person.violations = ViolationKind::ALL.to_vec();
        }
    }

    people
}

#[derive(Clone, Debug)]
pub struct AnnotationRenderer {
    alpha: f32,
}

impl Default for AnnotationRenderer {
    fn default() -> Self {
        Self {
            alpha: OVERLAY_ALPHA,
        }
    }
}

impl AnnotationRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw `result` onto a copy of `frame`.
    pub fn render(&self, frame: &Frame, result: &DetectionResult) -> MonitorResult<Frame> {
        let base = frame.to_rgb_image()?;
        let mut overlay = base.clone();
        let mut canvas = base;

        for det in &result.detections {
            let Category::Equipment(kind) = det.category else {
                continue;
            };
            let (color, label) = equipment_style(kind);
            draw_labelled_box(
                &mut overlay,
                &mut canvas,
                det.bbox,
                color,
                label,
                det.confidence,
                1,
            );
        }

        for person in assign_people(result) {
            let (color, label) = if person.is_compliant() {
                (palette::PERSON_COMPLIANT, "PERSON - COMPLIANT")
            } else {
                (palette::PERSON_VIOLATION, "PERSON - VIOLATION")
            };
            draw_labelled_box(
                &mut overlay,
                &mut canvas,
                person.bbox,
                color,
                label,
                person.confidence,
                2,
            );
        }

        frame.derive(draw::blend(&overlay, &canvas, self.alpha))
    }
}

fn equipment_style(kind: EquipmentKind) -> (Rgb<u8>, &'static str) {
    match kind {
        EquipmentKind::Hardhat => (palette::HARDHAT, "HARD HAT"),
        EquipmentKind::SafetyVest => (palette::SAFETY_VEST, "SAFETY VEST"),
        EquipmentKind::Mask => (palette::MASK, "FACE MASK"),
        _ => (palette::EQUIPMENT, "SAFETY EQUIPMENT"),
    }
}

/// Pull far off-canvas edges in to a fixed margin so offset arithmetic cannot
/// overflow. Everything visible draws the same.
fn bound_to_canvas(canvas: &RgbImage, bbox: BoundingBox) -> BoundingBox {
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    let x = |v: i32| v.clamp(-OFFSCREEN_MARGIN, width.saturating_add(OFFSCREEN_MARGIN));
    let y = |v: i32| v.clamp(-OFFSCREEN_MARGIN, height.saturating_add(OFFSCREEN_MARGIN));
    BoundingBox::new(x(bbox.x1), y(bbox.y1), x(bbox.x2), y(bbox.y2))
}

/// Box outline and corner accents on the canvas; offset shadow and label
/// background on the overlay.
fn draw_labelled_box(
    overlay: &mut RgbImage,
    canvas: &mut RgbImage,
    bbox: BoundingBox,
    color: Rgb<u8>,
    label: &str,
    confidence: f32,
    thickness: i32,
) {
    if draw::clip(canvas, bbox).is_none() {
        return;
    }
    let bbox = bound_to_canvas(canvas, bbox);

    let shadow = BoundingBox::new(
        bbox.x1 + SHADOW_OFFSET,
        bbox.y1 + SHADOW_OFFSET,
        bbox.x2 + SHADOW_OFFSET,
        bbox.y2 + SHADOW_OFFSET,
    );
    draw::stroke_rect(overlay, shadow, palette::SHADOW, 2);
    draw::stroke_rect(canvas, bbox, color, thickness);
    let corner = 20.min(bbox.width() / 4).min(bbox.height() / 4);
    draw::corner_accents(canvas, bbox, corner, color, thickness);

    let confidence_text = format!("{:.1}%", confidence * 100.0);
    let label_width =
        font::text_width(label).max(font::text_width(&confidence_text)) + LABEL_PADDING * 2;
    let frame_width = canvas.width() as i32;

    let label_y = if bbox.y1 - LABEL_HEIGHT - 5 > 0 {
        bbox.y1 - LABEL_HEIGHT - 5
    } else {
        bbox.y2 + 5
    };
    let mut label_x = bbox.x1;
    if label_x + label_width > frame_width {
        label_x = frame_width - label_width - 5;
    }
    if label_x < 0 {
        label_x = 5;
    }

    let label_box = BoundingBox::new(
        label_x,
        label_y,
        label_x + label_width,
        label_y + LABEL_HEIGHT,
    );
    draw::fill_rect(overlay, label_box, palette::TEXT_BG);
    draw::fill_rect(
        canvas,
        BoundingBox::new(label_x, label_y, label_x + label_width, label_y + 4),
        color,
    );
    draw::stroke_rect(canvas, label_box, color, 1);

    let text_y = label_y + 6;
    font::draw_text(canvas, label_x + LABEL_PADDING, text_y, label, palette::TEXT_PRIMARY);
    font::draw_text(
        canvas,
        label_x + LABEL_PADDING,
        text_y + font::GLYPH_HEIGHT + 3,
        &confidence_text,
        palette::TEXT_SECONDARY,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{classify, infer_violations, RawDetection};

    fn result_for(raw: Vec<RawDetection>) -> DetectionResult {
        let (detections, people_count, equipment) = classify(raw, 0.5);
        let violations = infer_violations(&detections, people_count, &equipment);
        DetectionResult {
            detections,
            people_count,
            equipment,
            violations,
            ..DetectionResult::default()
        }
    }

    fn raw(label: &str, x1: i32, y1: i32) -> RawDetection {
        RawDetection::new(label, 0.9, BoundingBox::new(x1, y1, x1 + 60, y1 + 150))
    }

    #[test]
    fn boxed_violation_goes_to_nearest_person_only() {
        let result = result_for(vec![
            raw("Person", 10, 10),
            raw("Person", 300, 10),
            raw("NO-Hardhat", 305, 12),
            raw("Hardhat", 10, 10),
            raw("Safety Vest", 10, 10),
            raw("Safety Vest", 300, 10),
            raw("Mask", 10, 10),
            raw("Mask", 300, 10),
        ]);
        let people = assign_people(&result);
        assert_eq!(people.len(), 2);
        assert!(people[0].is_compliant());
        assert_eq!(people[1].violations, vec![ViolationKind::MissingHardhat]);
    }

    #[test]
    fn distant_boxed_violation_is_dropped() {
        let result = result_for(vec![
            raw("Person", 10, 10),
            raw("NO-Hardhat", 200, 200),
            raw("Safety Vest", 10, 10),
            raw("Mask", 10, 10),
        ]);
        assert_eq!(result.violations.len(), 1);
        let people = assign_people(&result);
        assert!(people[0].is_compliant());
    }

    #[test]
    fn count_only_violations_are_broadcast() {
        let result = result_for(vec![
            raw("Person", 10, 10),
            raw("Person", 300, 10),
            raw("Hardhat", 10, 10),
            raw("Hardhat", 300, 10),
            raw("Mask", 10, 10),
            raw("Mask", 300, 10),
        ]);
        let people = assign_people(&result);
        for person in &people {
            assert_eq!(person.violations, vec![ViolationKind::MissingSafetyVest]);
        }
    }

    #[test]
    fn people_without_any_equipment_or_violations_get_full_set() {
        let mut result = result_for(vec![raw("Person", 10, 10)]);
        result.violations.clear();
        let people = assign_people(&result);
        assert_eq!(people[0].violations, ViolationKind::ALL.to_vec());
    }

    #[test]
    fn render_leaves_input_untouched() {
        let frame = Frame::solid(320, 240, [90, 90, 90], 4).unwrap();
        let before = frame.pixels().to_vec();
        let result = result_for(vec![raw("Person", 40, 60), raw("Hardhat", 45, 62)]);

        let rendered = AnnotationRenderer::new().render(&frame, &result).unwrap();
        assert_eq!(frame.pixels(), &before[..]);
        assert_eq!((rendered.width, rendered.height), (320, 240));
        assert_eq!(rendered.sequence, 4);
        assert_ne!(rendered.pixels(), frame.pixels());
    }

    #[test]
    fn violating_person_is_drawn_in_red() {
        let frame = Frame::solid(320, 240, [0, 0, 0], 1).unwrap();
        let result = result_for(vec![raw("Person", 100, 60)]);
        let rendered = AnnotationRenderer::new().render(&frame, &result).unwrap();
        let image = rendered.to_rgb_image().unwrap();
        // Left edge of the person box, below the corner accent.
        let px = image.get_pixel(100, 140).0;
        assert!(px[0] > 150 && px[1] < 100, "unexpected colour {px:?}");
    }

    #[test]
    fn boxes_outside_the_frame_draw_nothing() {
        let frame = Frame::solid(64, 48, [20, 30, 40], 1).unwrap();
        let result = result_for(vec![raw("Person", 500, 500), raw("Hardhat", 500, 500)]);
        let rendered = AnnotationRenderer::new().render(&frame, &result).unwrap();
        assert_eq!(rendered.pixels(), frame.pixels());
    }

    #[test]
    fn extreme_boxes_render_without_overflow() {
        let frame = Frame::solid(64, 48, [20, 30, 40], 1).unwrap();
        let huge = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        let raw = vec![
            RawDetection::new("Person", 0.9, huge),
            RawDetection::new("Person", 0.9, BoundingBox::new(i32::MAX - 1, 0, i32::MAX, 10)),
            RawDetection::new("Hardhat", 0.9, BoundingBox::new(i32::MIN, 5, 10, 20)),
        ];
        let result = result_for(raw);
        assert_eq!(assign_people(&result).len(), 2);
        let rendered = AnnotationRenderer::new().render(&frame, &result).unwrap();
        assert_ne!(rendered.pixels(), frame.pixels());
    }
}
