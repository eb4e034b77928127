use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier attached to every graded envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeId(pub String);

impl GradeId {
    pub fn new() -> Self {
        Self(format!("grade_{}", Uuid::new_v4()))
    }
}

impl Default for GradeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_prefixed_and_unique() {
        let a = GradeId::new();
        let b = GradeId::new();
        assert!(a.0.starts_with("grade_"));
        assert_ne!(a, b);
        assert_eq!(serde_json::to_value(&a).unwrap(), serde_json::json!(a.0));
    }
}
