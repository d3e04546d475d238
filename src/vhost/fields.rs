// ============================================================================
// src/vhost/fields.rs – Typed views over the plain field mapping
// ============================================================================

use crate::error::{AdminError, AdminResult};
use serde_json::{Map, Value};

/// Field-name-to-value mapping handed in by the boundary layer.
pub type Fields = Map<String, Value>;

/// State of one optional string field in a partial update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Absent,
    /// `null` or blank: remove the directive / fall back to the default.
    Clear,
    Set(String),
}

impl Field {
    pub fn value(&self) -> Option<&str> {
        match self {
            Field::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Apply this field over an existing optional value.
    pub fn merge(self, existing: Option<String>) -> Option<String> {
        match self {
            Field::Absent => existing,
            Field::Clear => None,
            Field::Set(s) => Some(s),
        }
    }
}

pub fn string_field(fields: &Fields, key: &str) -> AdminResult<Field> {
    match fields.get(key) {
        None => Ok(Field::Absent),
        Some(Value::Null) => Ok(Field::Clear),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Field::Clear),
        Some(Value::String(s)) => Ok(Field::Set(s.trim().to_string())),
        Some(other) => Err(AdminError::validation(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

/// true/false, 0/1 and their string spellings; `null` counts as absent.
pub fn bool_field(fields: &Fields, key: &str) -> AdminResult<Option<bool>> {
    let invalid = || AdminError::validation(format!("{key} must be a boolean"));
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(invalid()),
        },
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(invalid()),
        },
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn string_fields_distinguish_absent_clear_and_set() {
        let f = fields(json!({"a": null, "b": "  ", "c": " x ", "d": 3}));
        assert_eq!(string_field(&f, "missing").unwrap(), Field::Absent);
        assert_eq!(string_field(&f, "a").unwrap(), Field::Clear);
        assert_eq!(string_field(&f, "b").unwrap(), Field::Clear);
        assert_eq!(string_field(&f, "c").unwrap(), Field::Set("x".into()));
        assert_eq!(string_field(&f, "d").unwrap_err().status_code(), 400);

        assert_eq!(Field::Absent.merge(Some("old".into())).as_deref(), Some("old"));
        assert_eq!(Field::Clear.merge(Some("old".into())), None);
    }

    #[test]
    fn booleans_accept_common_spellings() {
        let f = fields(json!({"a": true, "b": "false", "c": 1, "d": "maybe", "e": null}));
        assert_eq!(bool_field(&f, "a").unwrap(), Some(true));
        assert_eq!(bool_field(&f, "b").unwrap(), Some(false));
        assert_eq!(bool_field(&f, "c").unwrap(), Some(true));
        assert!(bool_field(&f, "d").is_err());
        assert_eq!(bool_field(&f, "e").unwrap(), None);
        assert_eq!(bool_field(&f, "zzz").unwrap(), None);
    }
}
