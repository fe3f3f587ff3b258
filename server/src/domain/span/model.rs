//! Span data model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::filter::{FieldType, FieldValue, Filterable};

/// Built-in span field names, as used by filters and field metadata
pub mod fields {
    pub const START_TIME: &str = "start_time";
    pub const SPAN_ID: &str = "span_id";
    pub const PARENT_ID: &str = "parent_id";
    pub const TRACE_ID: &str = "trace_id";
    pub const DURATION: &str = "duration";
    pub const WORKSPACE_ID: &str = "workspace_id";
    pub const SPAN_NAME: &str = "span_name";
    pub const SPAN_TYPE: &str = "span_type";
    pub const STATUS_CODE: &str = "status_code";
    pub const CALL_TYPE: &str = "call_type";
    pub const PSM: &str = "psm";
    pub const LOG_ID: &str = "logid";
    pub const METHOD: &str = "method";
    pub const INPUT: &str = "input";
    pub const OUTPUT: &str = "output";
    pub const OBJECT_STORAGE: &str = "object_storage";
    pub const LOGIC_DELETE_TIME: &str = "logic_delete_time";

    /// Every built-in field; anything else is a tag key
    pub const ALL: &[&str] = &[
        START_TIME,
        SPAN_ID,
        PARENT_ID,
        TRACE_ID,
        DURATION,
        WORKSPACE_ID,
        SPAN_NAME,
        SPAN_TYPE,
        STATUS_CODE,
        CALL_TYPE,
        PSM,
        LOG_ID,
        METHOD,
        INPUT,
        OUTPUT,
        OBJECT_STORAGE,
        LOGIC_DELETE_TIME,
    ];

    pub fn is_builtin(name: &str) -> bool {
        ALL.contains(&name)
    }
}

/// Parent id of a root span
pub const ROOT_PARENT_ID: &str = "0";

/// Presigned URLs for a span's offloaded payloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrTos {
    pub input_data_url: String,
    pub output_data_url: String,
    /// Object key of each multimodal attachment to its URL
    pub multimodal_data: BTreeMap<String, String>,
}

/// A single unit of traced work
///
/// Times are microseconds since the Unix epoch. Tag maps are ordered so
/// serialized spans are byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Span {
    pub start_time: i64,
    pub span_id: String,
    pub parent_id: String,
    pub trace_id: String,
    pub duration_micros: i64,
    pub workspace_id: String,
    pub span_name: String,
    pub span_type: String,
    pub status_code: i32,
    pub call_type: String,
    pub psm: String,
    pub log_id: String,
    pub method: String,
    pub input: String,
    pub output: String,
    /// JSON document locating offloaded payloads and attachments
    pub object_storage: String,

    pub tags_string: BTreeMap<String, String>,
    pub tags_long: BTreeMap<String, i64>,
    pub tags_double: BTreeMap<String, f64>,
    pub tags_bool: BTreeMap<String, bool>,
    pub tags_byte: BTreeMap<String, String>,

    pub system_tags_string: BTreeMap<String, String>,
    pub system_tags_long: BTreeMap<String, i64>,
    pub system_tags_double: BTreeMap<String, f64>,

    /// Read-side tombstone time (microseconds)
    pub logic_delete_time: i64,

    /// Populated on the query path only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr_tos: Option<AttrTos>,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty() || self.parent_id == ROOT_PARENT_ID
    }

    /// Number of custom (non-system) tag entries
    pub fn custom_tag_count(&self) -> usize {
        self.tags_string.len()
            + self.tags_long.len()
            + self.tags_double.len()
            + self.tags_bool.len()
            + self.tags_byte.len()
    }

    /// Remove a custom tag from whichever map holds it
    pub fn remove_custom_tag(&mut self, key: &str) {
        self.tags_string.remove(key);
        self.tags_long.remove(key);
        self.tags_double.remove(key);
        self.tags_bool.remove(key);
        self.tags_byte.remove(key);
    }

    fn builtin_value(&self, name: &str) -> Option<FieldValue> {
        use fields::*;

        let value = match name {
            START_TIME => FieldValue::Long(self.start_time),
            SPAN_ID => FieldValue::String(self.span_id.clone()),
            PARENT_ID => FieldValue::String(self.parent_id.clone()),
            TRACE_ID => FieldValue::String(self.trace_id.clone()),
            DURATION => FieldValue::Long(self.duration_micros),
            WORKSPACE_ID => FieldValue::String(self.workspace_id.clone()),
            SPAN_NAME => FieldValue::String(self.span_name.clone()),
            SPAN_TYPE => FieldValue::String(self.span_type.clone()),
            STATUS_CODE => FieldValue::Long(self.status_code as i64),
            CALL_TYPE => FieldValue::String(self.call_type.clone()),
            PSM => FieldValue::String(self.psm.clone()),
            LOG_ID => FieldValue::String(self.log_id.clone()),
            METHOD => FieldValue::String(self.method.clone()),
            INPUT => FieldValue::String(self.input.clone()),
            OUTPUT => FieldValue::String(self.output.clone()),
            OBJECT_STORAGE => FieldValue::String(self.object_storage.clone()),
            LOGIC_DELETE_TIME => FieldValue::Long(self.logic_delete_time),
            _ => return None,
        };
        Some(value)
    }
}

impl Filterable for Span {
    /// Built-in fields first, then the custom map of the requested type,
    /// then its system map. String lookups also read `tags_byte`.
    fn field_value(&self, name: &str, field_type: FieldType) -> Option<FieldValue> {
        if let Some(value) = self.builtin_value(name) {
            return Some(value);
        }
        match field_type {
            FieldType::String => self
                .tags_string
                .get(name)
                .or_else(|| self.tags_byte.get(name))
                .or_else(|| self.system_tags_string.get(name))
                .map(|v| FieldValue::String(v.clone())),
            FieldType::Long => self
                .tags_long
                .get(name)
                .or_else(|| self.system_tags_long.get(name))
                .map(|v| FieldValue::Long(*v)),
            FieldType::Double => self
                .tags_double
                .get(name)
                .or_else(|| self.system_tags_double.get(name))
                .map(|v| FieldValue::Double(*v)),
            FieldType::Bool => self.tags_bool.get(name).map(|v| FieldValue::Bool(*v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_builtin_and_tags() {
        let mut span = Span {
            span_name: "llm_call".into(),
            status_code: 500,
            ..Default::default()
        };
        span.tags_string.insert("service".into(), "api".into());
        span.tags_long.insert("tokens".into(), 12);
        span.system_tags_string.insert("env".into(), "prod".into());

        assert_eq!(
            span.field_value("span_name", FieldType::String),
            Some(FieldValue::String("llm_call".into()))
        );
        assert_eq!(
            span.field_value("status_code", FieldType::Long),
            Some(FieldValue::Long(500))
        );
        assert_eq!(
            span.field_value("service", FieldType::String),
            Some(FieldValue::String("api".into()))
        );
        assert_eq!(
            span.field_value("tokens", FieldType::Long),
            Some(FieldValue::Long(12))
        );
        assert_eq!(
            span.field_value("env", FieldType::String),
            Some(FieldValue::String("prod".into()))
        );
        assert_eq!(span.field_value("missing", FieldType::String), None);
    }

    #[test]
    fn test_tag_lookup_follows_field_type() {
        let mut span = Span::default();
        span.tags_long.insert("tokens".into(), 12);
        span.tags_byte.insert("blob".into(), "payload".into());
        span.tags_string.insert("dup".into(), "text".into());
        span.tags_long.insert("dup".into(), 7);
        span.system_tags_double.insert("ratio".into(), 0.5);

        assert_eq!(span.field_value("tokens", FieldType::String), None);
        assert_eq!(
            span.field_value("blob", FieldType::String),
            Some(FieldValue::String("payload".into()))
        );
        assert_eq!(span.field_value("blob", FieldType::Long), None);
        assert_eq!(
            span.field_value("dup", FieldType::String),
            Some(FieldValue::String("text".into()))
        );
        assert_eq!(span.field_value("dup", FieldType::Long), Some(FieldValue::Long(7)));
        assert_eq!(
            span.field_value("ratio", FieldType::Double),
            Some(FieldValue::Double(0.5))
        );
        assert_eq!(span.field_value("ratio", FieldType::Bool), None);
    }

    #[test]
    fn test_builtin_shadows_tag() {
        let mut span = Span {
            span_type: "model".into(),
            ..Default::default()
        };
        span.tags_string.insert("span_type".into(), "tag".into());
        assert_eq!(
            span.field_value("span_type", FieldType::String),
            Some(FieldValue::String("model".into()))
        );
    }

    #[test]
    fn test_is_root() {
        let mut span = Span::default();
        assert!(span.is_root());
        span.parent_id = "0".into();
        assert!(span.is_root());
        span.parent_id = "0123456789abcdef".into();
        assert!(!span.is_root());
    }

    #[test]
    fn test_remove_custom_tag() {
        let mut span = Span::default();
        span.tags_string.insert("k".into(), "v".into());
        span.tags_bool.insert("k".into(), true);
        span.tags_long.insert("other".into(), 1);
        assert_eq!(span.custom_tag_count(), 3);

        span.remove_custom_tag("k");
        assert_eq!(span.custom_tag_count(), 1);
    }

    #[test]
    fn test_serde_skips_missing_attr_tos() {
        let span = Span::default();
        let json = serde_json::to_string(&span).unwrap();
        assert!(!json.contains("attr_tos"));
        let back: Span = serde_json::from_str(&json).unwrap();
        assert_eq!(back, span);
    }
}
