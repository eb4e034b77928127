// src/rules.rs

//! Rule normalisation.
//!
//! Exercise rules arrive from the lesson builder in whatever shape the
//! editor happened to save them:
//! - a JSON object, or a JSON string holding that object (sometimes twice)
//! - `must_use` / `forbidden` as an array, a single token or a CSV string
//! - snake_case or camelCase keys
//!
//! [`normalize`] turns all of that into one strict [`ValidationRules`]
//! record. Nothing past this module ever sees raw rule input.
//!
//! Normalisation never fails: unusable input becomes the empty record and
//! the dispatcher reports the missing grading type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How many times a JSON string is unwrapped before giving up.
const MAX_JSON_DEPTH: usize = 3;

/// The category of check an exercise declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingType {
    Numeric,
    String,
    Boolean,
    Behavior,
    CodeStructure,
    MustUse,
    Drawing,
}

impl GradingType {
    /// Parse a declared grading type, accepting the aliases the editor has
    /// used over time. Unknown names yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase().replace(['-', ' '], "_");

        match key.as_str() {
            "numeric" | "number" => Some(Self::Numeric),
            "string" | "text" => Some(Self::String),
            "boolean" | "bool" => Some(Self::Boolean),
            "behavior" | "behaviour" => Some(Self::Behavior),
            "code_structure" | "codestructure" | "structure" => Some(Self::CodeStructure),
            "must_use" | "mustuse" | "forbidden" | "must_use_forbidden" => Some(Self::MustUse),
            "drawing" | "canvas" => Some(Self::Drawing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Behavior => "behavior",
            Self::CodeStructure => "code_structure",
            Self::MustUse => "must_use",
            Self::Drawing => "drawing",
        }
    }

    /// Scalar types compare a single answer and need `expected_answer`.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Numeric | Self::String | Self::Boolean)
    }
}

/// Canonical validation rules for one exercise block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    pub grading_type: Option<GradingType>,

    /// Expected scalar answer in string form. Coerced per grading type.
    pub expected_answer: Option<String>,

    /// Required block kinds / code tokens. Set semantics, stable order.
    #[serde(default)]
    pub must_use: Vec<String>,

    /// Disallowed block kinds / code tokens.
    #[serde(default)]
    pub forbidden: Vec<String>,

    pub max_blocks: Option<usize>,

    /// Required shape kinds (lowercase).
    #[serde(default)]
    pub require_shape: Vec<String>,

    pub require_color: Option<String>,
}

impl ValidationRules {
    pub fn expected_answer(&self) -> Option<&str> {
        self.expected_answer
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Normalise a raw rule payload.
pub fn normalize(raw: &Value) -> ValidationRules {
    match unwrap_json(raw) {
        Some(Value::Object(obj)) => from_object(&obj),
        Some(other) => {
            tracing::warn!(kind = value_kind(&other), "rule payload is not an object; using empty rules");
            ValidationRules::default()
        }
        None => ValidationRules::default(),
    }
}

/// Normalise rules delivered as text (JSON, possibly double encoded).
pub fn normalize_str(raw: &str) -> ValidationRules {
    normalize(&Value::String(raw.to_string()))
}

/// Decode JSON strings until a non-string value is reached.
fn unwrap_json(raw: &Value) -> Option<Value> {
    let mut current = raw.clone();

    for _ in 0..MAX_JSON_DEPTH {
        let Value::String(text) = &current else {
            return Some(current);
        };

        if text.trim().is_empty() {
            return None;
        }

        match serde_json::from_str::<Value>(text) {
            Ok(parsed) => current = parsed,
            Err(e) => {
                tracing::warn!(error = %e, "rule payload is not valid JSON; using empty rules");
                return None;
            }
        }
    }

    match current {
        Value::String(_) => None,
        other => Some(other),
    }
}

fn from_object(obj: &Map<String, Value>) -> ValidationRules {
    let grading_type = field(obj, &["grading_type", "gradingType"])
        .and_then(Value::as_str)
        .and_then(|raw| {
            let parsed = GradingType::parse(raw);
            if parsed.is_none() {
                tracing::warn!(grading_type = raw, "unknown grading type");
            }
            parsed
        });

    ValidationRules {
        grading_type,
        expected_answer: field(obj, &["expected_answer", "expectedAnswer"]).and_then(scalar_string),
        must_use: field(obj, &["must_use", "mustUse"]).map(token_list).unwrap_or_default(),
        forbidden: field(obj, &["forbidden"]).map(token_list).unwrap_or_default(),
        max_blocks: field(obj, &["max_blocks", "maxBlocks"]).and_then(block_limit),
        require_shape: field(obj, &["require_shape", "requireShape"])
            .map(token_list)
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.to_lowercase())
            .fold(Vec::new(), push_unique),
        require_color: field(obj, &["require_color", "requireColor"])
            .and_then(scalar_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    }
}

/// First present, non-null value among the key aliases.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce a scalar / CSV / array value into a trimmed token list.
pub fn token_list(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Number(_) | Value::Bool(_) => scalar_string(value).into_iter().collect(),
        _ => Vec::new(),
    };

    raw.iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .fold(Vec::new(), push_unique)
}

fn push_unique(mut acc: Vec<String>, item: String) -> Vec<String> {
    if !acc.contains(&item) {
        acc.push(item);
    }
    acc
}

fn block_limit(value: &Value) -> Option<usize> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    if parsed.is_none() {
        tracing::warn!(max_blocks = %value, "ignoring unusable max_blocks");
    }

    parsed.and_then(|n| usize::try_from(n).ok())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
