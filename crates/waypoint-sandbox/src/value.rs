//! Runtime values.
//!
//! Scripts see a JSON-shaped value universe. Maps preserve insertion order
//! is not required; `BTreeMap` keeps behavior deterministic across runs.

use std::collections::BTreeMap;

/// A script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Truthiness for conditions: JS-shaped but stricter — only booleans
    /// and null are accepted where a condition is required, so scripts
    /// don't silently rely on coercions.
    #[must_use]
    pub const fn as_condition(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Null => Some(false),
            _ => None,
        }
    }

    /// Numeric view, if this is a number.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// One-word description for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Approximate heap footprint in bytes, used for the allocation
    /// watermark. Deliberately rough; it only needs to scale with real
    /// memory use.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        match self {
            Self::Null | Self::Bool(_) | Self::Number(_) => 16,
            Self::Str(s) => 24 + s.len(),
            Self::List(items) => 24 + items.iter().map(Self::approx_size).sum::<usize>(),
            Self::Map(entries) => {
                24 + entries
                    .iter()
                    .map(|(k, v)| 24 + k.len() + v.approx_size())
                    .sum::<usize>()
            }
        }
    }

    /// Convert from JSON (capability results, params).
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON (return values, render payloads).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// String form used by `+` concatenation and `str()`.
    ///
    /// Whole numbers print without a trailing `.0` so labels read naturally.
    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Str(s) => s.clone(),
            Self::List(_) | Self::Map(_) => self.to_json().to_string(),
        }
    }
}

/// Format a number the way scripts expect: integers bare, floats as-is.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let json = json!({
            "date": "2025-03-14",
            "metrics": {"fitbit.steps": 10234},
            "tags": ["focus", "health"],
            "done": true,
            "note": null
        });
        let value = Value::from_json(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_number_display() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(0.75), "0.75");
        assert_eq!(format_number(-2.0), "-2");
    }

    #[test]
    fn test_condition_rules() {
        assert_eq!(Value::Bool(true).as_condition(), Some(true));
        assert_eq!(Value::Null.as_condition(), Some(false));
        assert_eq!(Value::Number(1.0).as_condition(), None);
    }

    #[test]
    fn test_approx_size_scales() {
        let small = Value::Str("x".into());
        let big = Value::Str("x".repeat(1000));
        assert!(big.approx_size() > small.approx_size() + 900);
    }
}
