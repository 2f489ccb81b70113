//! Field value types and validation

use crate::core::key::Key;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

/// A polymorphic property value stored on an entity
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Key(Key),
    List(Vec<FieldValue>),
    Structured(IndexMap<String, FieldValue>),
    Null,
}

impl FieldValue {
    /// Get the value as a string if possible
    pub fn as_string(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer if possible
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            FieldValue::Key(k) => Some(k),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Compare two values of compatible types
    ///
    /// Integers and floats compare numerically; everything else only
    /// compares within its own variant.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        use FieldValue::*;
        match (self, other) {
            (String(a), String(b)) => Some(a.cmp(b)),
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Key(a), Key(b)) => Some(a.cmp(b)),
            (Null, Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// URL-safe representation of a scalar value
    pub fn to_url_string(&self) -> Option<String> {
        match self {
            FieldValue::String(s) => Some(s.clone()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Boolean(b) => Some(if *b { "t" } else { "f" }.to_string()),
            FieldValue::DateTime(dt) => Some(dt.to_rfc3339()),
            FieldValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            FieldValue::Key(k) => Some(k.urlsafe()),
            FieldValue::List(_) | FieldValue::Structured(_) | FieldValue::Null => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Key(k) => write!(f, "{}", k),
            FieldValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
            FieldValue::Structured(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{}", parts.join(", "))
            }
            FieldValue::Null => Ok(()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<Key> for FieldValue {
    fn from(value: Key) -> Self {
        FieldValue::Key(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::DateTime(value)
    }
}

/// How a raw URL argument is coerced into a [`FieldValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Text,
    Integer,
    Float,
    Boolean,
    Key,
}

impl ValueType {
    /// Parse a raw argument; `None` when it is empty or does not coerce
    pub fn parse(&self, raw: &str) -> Option<FieldValue> {
        if raw.is_empty() {
            return None;
        }
        match self {
            ValueType::Text => Some(FieldValue::String(raw.to_string())),
            ValueType::Integer => raw.trim().parse().ok().map(FieldValue::Integer),
            ValueType::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(FieldValue::Float),
            ValueType::Boolean => match raw {
                "t" | "true" | "1" | "y" => Some(FieldValue::Boolean(true)),
                "f" | "false" | "0" | "n" => Some(FieldValue::Boolean(false)),
                _ => None,
            },
            ValueType::Key => Key::from_urlsafe(raw).ok().map(FieldValue::Key),
        }
    }

    /// Render a value of this type for a URL
    pub fn to_url(&self, value: &FieldValue) -> Option<String> {
        match (self, value) {
            (ValueType::Text, FieldValue::String(_))
            | (ValueType::Integer, FieldValue::Integer(_))
            | (ValueType::Float, FieldValue::Float(_))
            | (ValueType::Boolean, FieldValue::Boolean(_))
            | (ValueType::Key, FieldValue::Key(_)) => value.to_url_string(),
            _ => None,
        }
    }
}

/// Field format validators for automatic validation
#[derive(Debug, Clone)]
pub enum FieldFormat {
    Email,
    Url,
    Phone,
    Custom(Regex),
}

impl FieldFormat {
    /// Validate a field value against this format
    pub fn validate(&self, value: &FieldValue) -> bool {
        let string_value = match value.as_string() {
            Some(s) => s,
            None => return false,
        };

        match self {
            FieldFormat::Email => Self::is_valid_email(string_value),
            FieldFormat::Url => Self::is_valid_url(string_value),
            FieldFormat::Phone => Self::is_valid_phone(string_value),
            FieldFormat::Custom(regex) => regex.is_match(string_value),
        }
    }

    /// Message shown next to a field that fails this format
    pub fn message(&self) -> &'static str {
        match self {
            FieldFormat::Email => "Invalid email address.",
            FieldFormat::Url => "Invalid URL.",
            FieldFormat::Phone => "Invalid phone number.",
            FieldFormat::Custom(_) => "Invalid input.",
        }
    }

    fn is_valid_email(email: &str) -> bool {
        static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = EMAIL_REGEX.get_or_init(|| {
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
        });
        regex.is_match(email)
    }

    fn is_valid_url(url: &str) -> bool {
        static URL_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = URL_REGEX.get_or_init(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").unwrap());
        regex.is_match(url)
    }

    fn is_valid_phone(phone: &str) -> bool {
        static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = PHONE_REGEX.get_or_init(|| {
            // At least 8 digits, max 15 (E.164 standard)
            Regex::new(r"^\+?[1-9]\d{7,14}$").unwrap()
        });
        regex.is_match(phone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_field_value_accessors() {
        let value = FieldValue::String("test".to_string());
        assert_eq!(value.as_string(), Some("test"));
        assert_eq!(value.as_integer(), None);
        assert!(!value.is_null());
        assert!(FieldValue::Null.is_null());
        assert_eq!(FieldValue::Boolean(true).as_bool(), Some(true));
    }

    #[test]
    fn test_compare_numeric_across_variants() {
        assert_eq!(
            FieldValue::Integer(2).compare(&FieldValue::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            FieldValue::Float(3.0).compare(&FieldValue::Integer(3)),
            Some(Ordering::Equal)
        );
        assert_eq!(FieldValue::Integer(1).compare(&FieldValue::from("1")), None);
    }

    #[test]
    fn test_compare_datetimes() {
        let a = Utc.with_ymd_and_hms(2023, 6, 15, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2023, 6, 16, 0, 0, 0).unwrap();
        assert_eq!(
            FieldValue::DateTime(a).compare(&FieldValue::DateTime(b)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_value_type_url_roundtrip() {
        let key = Key::new("Author", 5);
        let cases = vec![
            (ValueType::Text, FieldValue::from("hello world")),
            (ValueType::Integer, FieldValue::Integer(-42)),
            (ValueType::Float, FieldValue::Float(0.1)),
            (ValueType::Boolean, FieldValue::Boolean(false)),
            (ValueType::Key, FieldValue::Key(key)),
        ];
        for (value_type, value) in cases {
            let url = value_type.to_url(&value).expect("valid value");
            assert_eq!(value_type.parse(&url), Some(value));
        }
    }

    #[test]
    fn test_value_type_rejects_invalid() {
        assert_eq!(ValueType::Integer.parse("abc"), None);
        assert_eq!(ValueType::Integer.parse(""), None);
        assert_eq!(ValueType::Float.parse("NaN"), None);
        assert_eq!(ValueType::Boolean.parse("maybe"), None);
        assert_eq!(ValueType::Key.parse("???"), None);
        assert_eq!(ValueType::Integer.to_url(&FieldValue::from("5")), None);
    }

    #[test]
    fn test_display_list() {
        let value = FieldValue::List(vec![FieldValue::from("a"), FieldValue::Integer(1)]);
        assert_eq!(value.to_string(), "a, 1");
    }

    #[test]
    fn test_email_format() {
        let format = FieldFormat::Email;
        assert!(format.validate(&FieldValue::from("a@example.com")));
        assert!(!format.validate(&FieldValue::from("not-an-email")));
        assert!(!format.validate(&FieldValue::Integer(1)));
    }

    #[test]
    fn test_custom_format() {
        let format = FieldFormat::Custom(Regex::new(r"^[A-Z]{3}$").unwrap());
        assert!(format.validate(&FieldValue::from("ABC")));
        assert!(!format.validate(&FieldValue::from("abcd")));
    }
}
