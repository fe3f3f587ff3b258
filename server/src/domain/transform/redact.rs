//! Per-config redaction rules

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::span::Span;

/// Tag keys removed from every custom tag map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagFilter {
    #[serde(default)]
    pub key_black_list: Vec<String>,
}

/// Top-level JSON keys kept in input or output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonKeyFilter {
    #[serde(default)]
    pub key_white_list: Vec<String>,
}

impl TagFilter {
    pub fn apply(&self, span: &mut Span) {
        for key in &self.key_black_list {
            span.remove_custom_tag(key);
        }
    }
}

impl JsonKeyFilter {
    /// Filtered JSON, or `None` when `raw` is not a JSON object
    pub fn apply(&self, raw: &str) -> Option<String> {
        let mut object = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            _ => return None,
        };
        object.retain(|key, _| self.key_white_list.iter().any(|k| k == key));
        serde_json::to_string(&Value::Object(object)).ok()
    }
}

pub(super) fn redact_payload(filter: &JsonKeyFilter, payload: &mut String, field: &str, span_id: &str) {
    match filter.apply(payload) {
        Some(filtered) => *payload = filtered,
        None => tracing::debug!(
            span_id,
            field,
            "Payload is not a JSON object, leaving unredacted"
        ),
    }
}
