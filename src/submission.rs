// src/submission.rs

//! What the exercise UI hands over at grading time.
//!
//! A payload is built fresh for every attempt and is never persisted here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scripting language of `student_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    #[serde(alias = "js")]
    Javascript,
    #[serde(alias = "py")]
    Python,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Python => "python",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionPayload {
    /// Raw program text generated from the student's workspace.
    #[serde(default, alias = "studentCode")]
    pub student_code: Option<String>,

    #[serde(default)]
    pub language: Language,

    /// Serialised block tree (Blockly XML or JSON). Either a string or an
    /// inline JSON document.
    #[serde(default, alias = "studentMarkup")]
    pub student_markup: Option<Value>,

    /// Directly typed answer, used when no code is submitted.
    #[serde(default)]
    pub answer: Option<String>,

    #[serde(default, alias = "drawingObjects")]
    pub drawing_objects: Vec<DrawnObject>,
}

impl SubmissionPayload {
    pub fn code(&self) -> Option<&str> {
        self.student_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
    }

    /// Markup as text, or `None` when nothing usable was submitted.
    pub fn markup(&self) -> Option<MarkupSource<'_>> {
        match self.student_markup.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(MarkupSource::Text(s)),
            other => Some(MarkupSource::Json(other)),
        }
    }
}

/// Borrowed view of the submitted markup.
#[derive(Debug, Clone, Copy)]
pub enum MarkupSource<'a> {
    Text(&'a str),
    Json(&'a Value),
}

/// One object on the drawing canvas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawnObject {
    #[serde(alias = "type")]
    pub kind: String,

    #[serde(default, alias = "strokeColor", alias = "stroke")]
    pub stroke_color: Option<String>,

    #[serde(default, alias = "fillColor", alias = "fill")]
    pub fill_color: Option<String>,

    #[serde(default, alias = "pathLength")]
    pub path_length: Option<f64>,

    /// Brush that produced a freehand path (`"pencil"`, `"rainbow"`, ...).
    #[serde(default)]
    pub brush: Option<String>,
}

impl DrawnObject {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    pub fn stroke(mut self, color: &str) -> Self {
        self.stroke_color = Some(color.to_string());
        self
    }

    pub fn fill(mut self, color: &str) -> Self {
        self.fill_color = Some(color.to_string());
        self
    }
}
