//! Loose field shapes
//!
//! Sources disagree on whether fields like `division` are objects or bare
//! strings. The tagged `RawField` type makes that explicit at the ingress
//! boundary so the normalizer can dispatch on it instead of guessing.

use serde_json::{Map, Value};

/// A field that is either a structured object or a bare string
#[derive(Debug, Clone, PartialEq)]
pub enum RawField {
    Structured(Map<String, Value>),
    Bare(String),
}

impl RawField {
    /// Classify a JSON value; anything other than an object or string is
    /// unusable
    #[must_use]
    pub fn from_value(value: &Value) -> Option<RawField> {
        match value {
            Value::Object(map) => Some(RawField::Structured(map.clone())),
            Value::String(s) => Some(RawField::Bare(s.clone())),
            _ => None,
        }
    }

    /// The `name` of the field: the `name` property of a structured object,
    /// or the bare string itself
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            RawField::Structured(map) => map.get("name").and_then(Value::as_str),
            RawField::Bare(s) => Some(s.as_str()),
        }
    }

    #[must_use]
    pub fn is_bare(&self) -> bool {
        matches!(self, RawField::Bare(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_object_exposes_name_property() {
        let field = RawField::from_value(&json!({"name": "Ottawa Centre", "id": 42})).unwrap();
        assert_eq!(field.name(), Some("Ottawa Centre"));
        assert!(!field.is_bare());
    }

    #[test]
    fn bare_string_is_its_own_name() {
        let field = RawField::from_value(&json!("Ottawa Centre")).unwrap();
        assert_eq!(field.name(), Some("Ottawa Centre"));
        assert!(field.is_bare());
    }

    #[test]
    fn structured_object_without_name_yields_none() {
        let field = RawField::from_value(&json!({"id": 42})).unwrap();
        assert_eq!(field.name(), None);
    }

    #[test]
    fn other_json_shapes_are_unusable() {
        assert!(RawField::from_value(&json!(42)).is_none());
        assert!(RawField::from_value(&json!([1, 2])).is_none());
        assert!(RawField::from_value(&json!(null)).is_none());
    }
}
