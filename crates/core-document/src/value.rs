//! Simple values and the conversion rules between JSON storage and the
//! concrete types exposed by the document getters/setters.
//!
//! The store keeps JSON primitives; a [`SimpleValue`] is the unpacked form
//! held by cache entries. Conversions are deliberately forgiving — the rule
//! engine treats everything as text or numbers at the edges, so numeric
//! strings parse as numbers and any scalar renders as a string. Containers
//! render as the placeholders `{Array}` / `{Object}` when forced to text.

use serde_json::{Number, Value};

/// A scalar document value.
#[derive(Debug, Clone, PartialEq)]
pub enum SimpleValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// True if `s` looks like a plain decimal number (optional sign, at most one
/// decimal point). Used to decide whether a string participates in numeric
/// conversion.
pub fn is_numeric_str(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().filter(|&c| c == '.').count() <= 1
        && body != "."
}

impl SimpleValue {
    /// Unpacks a JSON scalar. Objects, arrays and null have no simple form.
    pub fn from_json(v: &Value) -> Option<SimpleValue> {
        match v {
            Value::Bool(b) => Some(SimpleValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(SimpleValue::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Some(SimpleValue::UInt(u))
                } else {
                    n.as_f64().map(SimpleValue::Float)
                }
            }
            Value::String(s) => Some(SimpleValue::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SimpleValue::Int(i) => Value::Number((*i).into()),
            SimpleValue::UInt(u) => Value::Number((*u).into()),
            SimpleValue::Float(f) => Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SimpleValue::Bool(b) => Value::Bool(*b),
            SimpleValue::Str(s) => Value::String(s.clone()),
        }
    }

    /// Numeric view of the value. Numeric strings parse; everything else
    /// that has no number form reads as 0.0.
    pub fn as_f64(&self) -> f64 {
        match self {
            SimpleValue::Int(i) => *i as f64,
            SimpleValue::UInt(u) => *u as f64,
            SimpleValue::Float(f) => *f,
            SimpleValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            SimpleValue::Str(s) => {
                if is_numeric_str(s) {
                    s.trim().parse().unwrap_or(0.0)
                } else {
                    0.0
                }
            }
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            SimpleValue::Int(i) => i.to_string(),
            SimpleValue::UInt(u) => u.to_string(),
            SimpleValue::Float(f) => f.to_string(),
            SimpleValue::Bool(b) => (if *b { "true" } else { "false" }).to_string(),
            SimpleValue::Str(s) => s.clone(),
        }
    }
}

/// Conversion between document storage and the concrete getter/setter types.
pub trait DocValue: Sized {
    fn from_simple(v: &SimpleValue) -> Option<Self>;
    /// Conversion from an arbitrary JSON node (read fallback when the value
    /// is not a scalar, e.g. strings rendering containers as placeholders).
    fn from_json(v: &Value) -> Option<Self> {
        SimpleValue::from_json(v).and_then(|sv| Self::from_simple(&sv))
    }
    fn into_simple(self) -> SimpleValue;
}

impl DocValue for f64 {
    fn from_simple(v: &SimpleValue) -> Option<Self> {
        match v {
            SimpleValue::Str(s) if !is_numeric_str(s) => None,
            other => Some(other.as_f64()),
        }
    }
    fn into_simple(self) -> SimpleValue {
        SimpleValue::Float(self)
    }
}

impl DocValue for i64 {
    fn from_simple(v: &SimpleValue) -> Option<Self> {
        match v {
            SimpleValue::Int(i) => Some(*i),
            SimpleValue::UInt(u) => i64::try_from(*u).ok(),
            SimpleValue::Float(f) => Some(*f as i64),
            SimpleValue::Bool(b) => Some(i64::from(*b)),
            SimpleValue::Str(s) => s.trim().parse().ok(),
        }
    }
    fn into_simple(self) -> SimpleValue {
        SimpleValue::Int(self)
    }
}

impl DocValue for i32 {
    fn from_simple(v: &SimpleValue) -> Option<Self> {
        i64::from_simple(v).map(|i| i as i32)
    }
    fn into_simple(self) -> SimpleValue {
        SimpleValue::Int(i64::from(self))
    }
}

impl DocValue for u64 {
    fn from_simple(v: &SimpleValue) -> Option<Self> {
        match v {
            SimpleValue::Int(i) => u64::try_from(*i).ok(),
            SimpleValue::UInt(u) => Some(*u),
            SimpleValue::Float(f) if *f >= 0.0 => Some(*f as u64),
            SimpleValue::Bool(b) => Some(u64::from(*b)),
            SimpleValue::Str(s) => s.trim().parse().ok(),
            SimpleValue::Float(_) => None,
        }
    }
    fn into_simple(self) -> SimpleValue {
        SimpleValue::UInt(self)
    }
}

impl DocValue for u32 {
    fn from_simple(v: &SimpleValue) -> Option<Self> {
        u64::from_simple(v).and_then(|u| u32::try_from(u).ok())
    }
    fn into_simple(self) -> SimpleValue {
        SimpleValue::UInt(u64::from(self))
    }
}

impl DocValue for bool {
    fn from_simple(v: &SimpleValue) -> Option<Self> {
        match v {
            SimpleValue::Bool(b) => Some(*b),
            SimpleValue::Int(i) => Some(*i != 0),
            SimpleValue::UInt(u) => Some(*u != 0),
            SimpleValue::Float(f) => Some(f.abs() > f64::EPSILON),
            SimpleValue::Str(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
        }
    }
    fn into_simple(self) -> SimpleValue {
        SimpleValue::Bool(self)
    }
}

impl DocValue for String {
    fn from_simple(v: &SimpleValue) -> Option<Self> {
        Some(v.to_display_string())
    }
    fn from_json(v: &Value) -> Option<Self> {
        match v {
            Value::Null => Some("null".to_string()),
            Value::Array(_) => Some("{Array}".to_string()),
            Value::Object(_) => Some("{Object}".to_string()),
            other => SimpleValue::from_json(other).map(|sv| sv.to_display_string()),
        }
    }
    fn into_simple(self) -> SimpleValue {
        SimpleValue::Str(self)
    }
}

impl DocValue for SimpleValue {
    fn from_simple(v: &SimpleValue) -> Option<Self> {
        Some(v.clone())
    }
    fn into_simple(self) -> SimpleValue {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_strings_parse_as_numbers() {
        assert_eq!(SimpleValue::Str("3.5".into()).as_f64(), 3.5);
        assert_eq!(SimpleValue::Str(" -2 ".into()).as_f64(), -2.0);
        assert_eq!(SimpleValue::Str("hp".into()).as_f64(), 0.0);
    }

    #[test]
    fn containers_render_as_placeholders() {
        assert_eq!(
            String::from_json(&json!([1, 2])).unwrap(),
            "{Array}".to_string()
        );
        assert_eq!(
            String::from_json(&json!({"a": 1})).unwrap(),
            "{Object}".to_string()
        );
        assert_eq!(String::from_json(&Value::Null).unwrap(), "null".to_string());
    }

    #[test]
    fn float_display_is_minimal() {
        assert_eq!(SimpleValue::Float(2.0).to_display_string(), "2");
        assert_eq!(SimpleValue::Float(7.25).to_display_string(), "7.25");
    }

    #[test]
    fn is_numeric_str_rules() {
        assert!(is_numeric_str("10"));
        assert!(is_numeric_str("-0.5"));
        assert!(!is_numeric_str("1.2.3"));
        assert!(!is_numeric_str("10a"));
        assert!(!is_numeric_str(""));
        assert!(!is_numeric_str("-"));
    }
}
