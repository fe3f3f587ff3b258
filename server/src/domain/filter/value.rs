//! Typed field values and value parsing

use std::cmp::Ordering;

use super::types::FieldType;

/// A field value as seen by the matcher
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
}

/// Anything the in-memory matcher can evaluate a filter against
pub trait Filterable {
    /// Value of a built-in field, or of a tag stored under `field_type`;
    /// `None` when absent
    fn field_value(&self, name: &str, field_type: FieldType) -> Option<FieldValue>;
}

impl FieldValue {
    pub fn zero(field_type: FieldType) -> Self {
        match field_type {
            FieldType::String => Self::String(String::new()),
            FieldType::Long => Self::Long(0),
            FieldType::Double => Self::Double(0.0),
            FieldType::Bool => Self::Bool(false),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::Long(v) => *v == 0,
            Self::Double(v) => *v == 0.0,
            Self::Bool(v) => !*v,
        }
    }

    /// Convert to the filter's field type; `None` when the value cannot be
    /// read as that type
    pub fn coerce(self, field_type: FieldType) -> Option<Self> {
        match (field_type, self) {
            (FieldType::String, Self::String(s)) => Some(Self::String(s)),
            (FieldType::String, Self::Long(v)) => Some(Self::String(v.to_string())),
            (FieldType::String, Self::Double(v)) => Some(Self::String(v.to_string())),
            (FieldType::String, Self::Bool(v)) => Some(Self::String(v.to_string())),

            (FieldType::Long, Self::Long(v)) => Some(Self::Long(v)),
            (FieldType::Long, Self::String(s)) => parse_long(&s).map(Self::Long),
            (FieldType::Long, Self::Double(v)) => {
                (v.fract() == 0.0 && v.is_finite()).then_some(Self::Long(v as i64))
            }
            (FieldType::Long, Self::Bool(v)) => Some(Self::Long(v as i64)),

            (FieldType::Double, Self::Double(v)) => Some(Self::Double(v)),
            (FieldType::Double, Self::Long(v)) => Some(Self::Double(v as f64)),
            (FieldType::Double, Self::String(s)) => parse_double(&s).map(Self::Double),
            (FieldType::Double, Self::Bool(_)) => None,

            (FieldType::Bool, Self::Bool(v)) => Some(Self::Bool(v)),
            (FieldType::Bool, Self::String(s)) => parse_bool(&s).map(Self::Bool),
            (FieldType::Bool, Self::Long(v)) => Some(Self::Bool(v != 0)),
            (FieldType::Bool, Self::Double(_)) => None,
        }
    }

    /// Ordering between two values of the same type
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Long(a), Self::Long(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Base-10 signed 64-bit integer
pub fn parse_long(s: &str) -> Option<i64> {
    s.parse().ok()
}

pub fn parse_double(s: &str) -> Option<f64> {
    s.parse().ok()
}

/// The usual spellings of true and false
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Parse one filter value under a field type
pub fn parse_value(field_type: FieldType, raw: &str) -> Option<FieldValue> {
    match field_type {
        FieldType::String => Some(FieldValue::String(raw.to_string())),
        FieldType::Long => parse_long(raw).map(FieldValue::Long),
        FieldType::Double => parse_double(raw).map(FieldValue::Double),
        FieldType::Bool => parse_bool(raw).map(FieldValue::Bool),
    }
}
