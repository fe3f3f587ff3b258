//! In-memory filter evaluation
//!
//! Missing values read as the zero of the filter's field type, except for
//! `exist`/`not_exist` which test presence and non-zero-ness directly.

use std::cmp::Ordering;

use super::types::{FieldType, FilterField, FilterFields, QueryAndOr, QueryType};
use super::value::{FieldValue, Filterable, parse_value};

impl FilterFields {
    /// AND over an empty list is true, OR over an empty list is false
    pub fn matches<T: Filterable + ?Sized>(&self, obj: &T) -> bool {
        match self.op() {
            QueryAndOr::And => self.filter_fields.iter().all(|f| f.matches(obj)),
            QueryAndOr::Or => self.filter_fields.iter().any(|f| f.matches(obj)),
        }
    }
}

impl FilterField {
    pub fn matches<T: Filterable + ?Sized>(&self, obj: &T) -> bool {
        let leaf = match self.query_type {
            QueryType::AlwaysTrue => true,
            _ => self.matches_value(obj.field_value(&self.field_name, self.field_type)),
        };
        leaf && self.sub_filter.as_ref().is_none_or(|sub| sub.matches(obj))
    }

    /// Evaluate the leaf predicate alone against a looked-up value
    pub fn matches_value(&self, value: Option<FieldValue>) -> bool {
        let value = value.and_then(|v| v.coerce(self.field_type));
        match self.query_type {
            QueryType::AlwaysTrue => return true,
            QueryType::Exist => return value.is_some_and(|v| !v.is_zero()),
            QueryType::NotExist => return value.is_none_or(|v| v.is_zero()),
            _ => {}
        }
        let value = value.unwrap_or_else(|| FieldValue::zero(self.field_type));

        // Any unparseable operand makes the leaf false
        let Some(operands) = self.parsed_values() else {
            return false;
        };

        if self.field_type == FieldType::Bool {
            let Some(first) = operands.first() else {
                return false;
            };
            return match self.query_type {
                QueryType::Eq => value == *first,
                QueryType::NotEq => value != *first,
                _ => false,
            };
        }

        match self.query_type {
            QueryType::Match => match &value {
                FieldValue::String(s) => operands.iter().any(|op| match op {
                    FieldValue::String(needle) => s.contains(needle.as_str()),
                    _ => false,
                }),
                _ => false,
            },
            QueryType::In => operands.iter().any(|op| value.compare(op) == Some(Ordering::Equal)),
            QueryType::NotIn => operands.iter().all(|op| value.compare(op) != Some(Ordering::Equal)),
            QueryType::Eq => compare_first(&value, &operands, |o| o == Ordering::Equal),
            QueryType::NotEq => compare_first(&value, &operands, |o| o != Ordering::Equal),
            QueryType::Lt => compare_first(&value, &operands, |o| o == Ordering::Less),
            QueryType::Lte => compare_first(&value, &operands, |o| o != Ordering::Greater),
            QueryType::Gt => compare_first(&value, &operands, |o| o == Ordering::Greater),
            QueryType::Gte => compare_first(&value, &operands, |o| o != Ordering::Less),
            QueryType::Exist => !value.is_zero(),
            QueryType::NotExist => value.is_zero(),
            QueryType::AlwaysTrue => true,
        }
    }

    fn parsed_values(&self) -> Option<Vec<FieldValue>> {
        self.values
            .iter()
            .map(|raw| parse_value(self.field_type, raw))
            .collect()
    }
}

fn compare_first(
    value: &FieldValue,
    operands: &[FieldValue],
    pred: impl Fn(Ordering) -> bool,
) -> bool {
    operands
        .first()
        .and_then(|op| value.compare(op))
        .is_some_and(pred)
}
