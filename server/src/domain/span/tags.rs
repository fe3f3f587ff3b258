//! Splitting untyped producer tags into the typed tag maps

use std::collections::BTreeMap;

use serde_json::Value;

use super::model::Span;
use crate::domain::error::{TraceError, TraceResult};

/// Typed view of a producer-supplied tag bag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedTags {
    pub strings: BTreeMap<String, String>,
    pub longs: BTreeMap<String, i64>,
    pub doubles: BTreeMap<String, f64>,
    pub bools: BTreeMap<String, bool>,
}

/// Split untyped tags by their JSON runtime type.
///
/// Integers that fit `i64` go to longs, every other number to doubles.
/// Null, array and object values are rejected rather than coerced.
pub fn split_tags<'a, I>(tags: I) -> TraceResult<TypedTags>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let mut typed = TypedTags::default();
    for (key, value) in tags {
        match value {
            Value::String(s) => {
                typed.strings.insert(key.clone(), s.clone());
            }
            Value::Bool(b) => {
                typed.bools.insert(key.clone(), *b);
            }
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    typed.longs.insert(key.clone(), i);
                } else if let Some(f) = n.as_f64() {
                    typed.doubles.insert(key.clone(), f);
                } else {
                    return Err(unsupported(key, "number"));
                }
            }
            Value::Null => return Err(unsupported(key, "null")),
            Value::Array(_) => return Err(unsupported(key, "array")),
            Value::Object(_) => return Err(unsupported(key, "object")),
        }
    }
    Ok(typed)
}

fn unsupported(key: &str, kind: &str) -> TraceError {
    TraceError::InvalidParam(format!("tag {key:?} has unsupported {kind} value"))
}

impl Span {
    /// Merge typed tags into the custom tag maps, replacing existing keys
    pub fn merge_tags(&mut self, tags: TypedTags) {
        self.tags_string.extend(tags.strings);
        self.tags_long.extend(tags.longs);
        self.tags_double.extend(tags.doubles);
        self.tags_bool.extend(tags.bools);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_split_by_type() {
        let tags = bag(json!({
            "model": "gpt",
            "tokens": 42,
            "temperature": 0.7,
            "stream": true,
            "big": u64::MAX,
        }));
        let typed = split_tags(&tags).unwrap();

        assert_eq!(typed.strings["model"], "gpt");
        assert_eq!(typed.longs["tokens"], 42);
        assert_eq!(typed.doubles["temperature"], 0.7);
        assert!(typed.bools["stream"]);
        // Beyond i64 range falls back to double
        assert!(typed.doubles.contains_key("big"));
    }

    #[test]
    fn test_rejects_structured_values() {
        for value in [json!({"k": null}), json!({"k": [1]}), json!({"k": {"a": 1}})] {
            let err = split_tags(&bag(value)).unwrap_err();
            assert_eq!(err.code(), "common.invalid_param");
            assert!(err.to_string().contains("\"k\""));
        }
    }

    #[test]
    fn test_merge_into_span() {
        let mut span = Span::default();
        span.tags_string.insert("model".into(), "old".into());
        let typed = split_tags(&bag(json!({"model": "new", "n": 1}))).unwrap();
        span.merge_tags(typed);

        assert_eq!(span.tags_string["model"], "new");
        assert_eq!(span.tags_long["n"], 1);
    }
}
