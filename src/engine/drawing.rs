// src/engine/drawing.rs

//! Drawing exercise checks.
//!
//! A drawing passes when every required shape is present and, if a color is
//! required, at least one object is stroked or filled with it. The score is
//! progress display only and never decides pass/fail.

use crate::engine::color;
use crate::engine::{GradeResult, Reason};
use crate::rules::ValidationRules;
use crate::submission::DrawnObject;

const SCORE_NON_EMPTY: u32 = 10;
const SCORE_PER_SHAPE: u32 = 20;
const SCORE_COLOR: u32 = 20;

pub fn validate(rules: &ValidationRules, objects: &[DrawnObject]) -> GradeResult {
    if objects.is_empty() {
        return GradeResult::fail(vec![Reason::NothingDrawn]).with_score(0);
    }

    // Resolve the rule color first: a bad rule is a setup problem, not the
    // student's.
    let wanted_color = match rules.require_color.as_deref() {
        Some(raw) => match color::resolve(raw) {
            Some(rgb) => Some((raw, rgb)),
            None => {
                return GradeResult::fail(vec![Reason::InvalidRuleColor {
                    color: raw.to_string(),
                }])
                .with_score(0)
            }
        },
        None => None,
    };

    let mut score = SCORE_NON_EMPTY;
    let mut violations = Vec::new();

    for shape in &rules.require_shape {
        if objects.iter().any(|o| matches_shape(o, shape)) {
            score += SCORE_PER_SHAPE;
        } else {
            violations.push(Reason::MissingShape { shape: shape.clone() });
        }
    }

    if let Some((raw, wanted)) = wanted_color {
        let used = objects.iter().any(|o| {
            [o.stroke_color.as_deref(), o.fill_color.as_deref()]
                .into_iter()
                .flatten()
                .filter_map(color::resolve)
                .any(|c| c == wanted)
        });

        if used {
            score += SCORE_COLOR;
        } else {
            violations.push(Reason::MissingColor {
                color: raw.to_string(),
            });
        }
    }

    tracing::debug!(objects = objects.len(), score, violations = violations.len(), "drawing checked");

    GradeResult::from_violations(violations).with_score(score)
}

/// Detection rule for a required shape name against one canvas object.
pub fn matches_shape(object: &DrawnObject, shape: &str) -> bool {
    let kind = object.kind.trim().to_lowercase();

    match shape {
        "circle" => kind == "circle",
        "ellipse" | "oval" => kind == "ellipse" || kind == "circle",
        "rectangle" | "rect" | "square" => kind == "rect" || kind == "rectangle",
        "triangle" => kind == "triangle",
        "line" => kind == "line",
        "star" | "polygon" => kind == "polygon" || kind == "star",
        "text" => matches!(kind.as_str(), "text" | "i-text" | "textbox"),
        "path" | "freehand" | "scribble" => {
            kind == "path" && object.path_length.map_or(true, |len| len > 0.0)
        }
        "rainbow" => kind == "path" && is_rainbow_stroke(object),
        other => kind == other,
    }
}

/// A rainbow stroke comes from the hue-cycling brush. A path carries a
/// single stroke color, so any color on its own (`hsl()` included) is a
/// fixed one.
fn is_rainbow_stroke(object: &DrawnObject) -> bool {
    object
        .brush
        .as_deref()
        .is_some_and(|b| b.eq_ignore_ascii_case("rainbow"))
}
