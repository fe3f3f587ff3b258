//! Ingest-side span validation and clipping
//!
//! `validate_and_clip` rejects spans with malformed identity or an
//! implausible start time, then bounds every free-form field. Clipping is
//! idempotent: a span that went through it once is left untouched by a
//! second pass.

use std::collections::BTreeMap;

use super::model::Span;
use crate::domain::error::{TraceError, TraceResult};
use crate::utils::string::{is_lower_hex, truncate_chars, truncate_utf8};
use crate::utils::time::{MICROS_PER_DAY, MICROS_PER_HOUR, now_micros};

pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
pub const MAX_FIELD_BYTES: usize = 1024;
pub const MAX_TAG_KEY_CHARS: usize = 100;
pub const MAX_CUSTOM_TAGS: usize = 50;

/// System tag recording which fields and keys were clipped (JSON list)
pub const CLIP_FIELDS_TAG: &str = "clip_fields";

/// Accepted start time window relative to ingest time
pub const MAX_START_TIME_LAG: i64 = MICROS_PER_DAY;
pub const MAX_START_TIME_LEAD: i64 = MICROS_PER_HOUR;

/// Latency-style tags that must not be negative
pub const TIME_TAGS: &[&str] = &[
    "start_time_first_resp",
    "latency_first_resp",
    "start_time_first_token_resp",
    "latency_first_token_resp",
    "reasoning_duration",
    "tokens",
];

/// System tag keys producers may set
pub const SYSTEM_TAG_ALLOW_LIST: &[&str] = &[
    "dc",
    "pod_name",
    "cluster",
    "deploy_stage",
    "env",
    "language",
    "runtime",
    "cut_off",
    CLIP_FIELDS_TAG,
];

impl Span {
    /// Validate against the current wall clock, then clip in place
    pub fn validate_and_clip(&mut self) -> TraceResult<()> {
        self.validate_and_clip_at(now_micros())
    }

    pub fn validate_and_clip_at(&mut self, now_us: i64) -> TraceResult<()> {
        self.validate_identity()?;

        if self.start_time < now_us - MAX_START_TIME_LAG
            || self.start_time > now_us + MAX_START_TIME_LEAD
        {
            return Err(TraceError::InvalidParam(format!(
                "span {} start_time {} outside accepted window",
                self.span_id, self.start_time
            )));
        }

        if self.duration_micros < 0 {
            self.duration_micros = 0;
        }
        for tag in TIME_TAGS {
            if let Some(v) = self.tags_long.get_mut(*tag)
                && *v < 0
            {
                *v = 0;
            }
        }

        let allowed = |k: &String| SYSTEM_TAG_ALLOW_LIST.contains(&k.as_str());
        self.system_tags_string.retain(|k, _| allowed(k));
        self.system_tags_long.retain(|k, _| allowed(k));
        self.system_tags_double.retain(|k, _| allowed(k));

        self.clip();
        Ok(())
    }

    fn validate_identity(&self) -> TraceResult<()> {
        if !is_lower_hex(&self.span_id, 16) || self.span_id.bytes().all(|b| b == b'0') {
            return Err(TraceError::InvalidParam(format!(
                "invalid span_id {:?}: expected 16 lowercase hex chars, not all zero",
                self.span_id
            )));
        }
        if !is_lower_hex(&self.trace_id, 32) || self.trace_id.bytes().all(|b| b == b'0') {
            return Err(TraceError::InvalidParam(format!(
                "invalid trace_id {:?}: expected 32 lowercase hex chars, not all zero",
                self.trace_id
            )));
        }
        Ok(())
    }

    fn clip(&mut self) {
        let mut clipped: Vec<String> = Vec::new();

        clip_field(&mut self.input, "input", MAX_PAYLOAD_BYTES, &mut clipped);
        clip_field(&mut self.output, "output", MAX_PAYLOAD_BYTES, &mut clipped);
        clip_field(&mut self.span_name, "span_name", MAX_FIELD_BYTES, &mut clipped);
        clip_field(&mut self.span_type, "span_type", MAX_FIELD_BYTES, &mut clipped);
        clip_field(&mut self.call_type, "call_type", MAX_FIELD_BYTES, &mut clipped);
        clip_field(&mut self.psm, "psm", MAX_FIELD_BYTES, &mut clipped);
        clip_field(&mut self.log_id, "logid", MAX_FIELD_BYTES, &mut clipped);
        clip_field(&mut self.method, "method", MAX_FIELD_BYTES, &mut clipped);

        clip_keys(&mut self.tags_string, &mut clipped);
        clip_keys(&mut self.tags_long, &mut clipped);
        clip_keys(&mut self.tags_double, &mut clipped);
        clip_keys(&mut self.tags_bool, &mut clipped);
        clip_keys(&mut self.tags_byte, &mut clipped);

        clip_values(&mut self.tags_string, &mut clipped);
        clip_values(&mut self.tags_byte, &mut clipped);
        for (key, value) in self.system_tags_string.iter_mut() {
            if key != CLIP_FIELDS_TAG
                && let Some(cut) = truncate_utf8(value, MAX_FIELD_BYTES)
            {
                *value = cut.to_string();
                clipped.push(key.clone());
            }
        }

        self.limit_custom_tags(&mut clipped);

        if clipped.is_empty() {
            return;
        }
        if let Some(existing) = self.system_tags_string.get(CLIP_FIELDS_TAG)
            && let Ok(previous) = serde_json::from_str::<Vec<String>>(existing)
        {
            clipped.extend(previous);
        }
        clipped.sort();
        clipped.dedup();
        match serde_json::to_string(&clipped) {
            Ok(json) => {
                self.system_tags_string
                    .insert(CLIP_FIELDS_TAG.to_string(), json);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode clip_fields"),
        }
    }

    /// Keep the first entries across maps in a fixed order, drop the rest
    fn limit_custom_tags(&mut self, clipped: &mut Vec<String>) {
        if self.custom_tag_count() <= MAX_CUSTOM_TAGS {
            return;
        }
        let mut budget = MAX_CUSTOM_TAGS;
        budget = retain_first(&mut self.tags_string, budget, clipped);
        budget = retain_first(&mut self.tags_long, budget, clipped);
        budget = retain_first(&mut self.tags_double, budget, clipped);
        budget = retain_first(&mut self.tags_bool, budget, clipped);
        retain_first(&mut self.tags_byte, budget, clipped);
    }
}

fn clip_field(value: &mut String, name: &str, max_bytes: usize, clipped: &mut Vec<String>) {
    if let Some(cut) = truncate_utf8(value, max_bytes) {
        *value = cut.to_string();
        clipped.push(name.to_string());
    }
}

fn clip_keys<V>(map: &mut BTreeMap<String, V>, clipped: &mut Vec<String>) {
    if map.keys().all(|k| k.chars().count() <= MAX_TAG_KEY_CHARS) {
        return;
    }
    let entries = std::mem::take(map);
    for (key, value) in entries {
        match truncate_chars(&key, MAX_TAG_KEY_CHARS) {
            Some(cut) => {
                map.insert(cut.to_string(), value);
                clipped.push(key);
            }
            None => {
                map.insert(key, value);
            }
        }
    }
}

fn clip_values(map: &mut BTreeMap<String, String>, clipped: &mut Vec<String>) {
    for (key, value) in map.iter_mut() {
        if let Some(cut) = truncate_utf8(value, MAX_FIELD_BYTES) {
            *value = cut.to_string();
            clipped.push(key.clone());
        }
    }
}

fn retain_first<V>(
    map: &mut BTreeMap<String, V>,
    budget: usize,
    clipped: &mut Vec<String>,
) -> usize {
    if map.len() <= budget {
        return budget - map.len();
    }
    if let Some(pivot) = map.keys().nth(budget).cloned() {
        clipped.extend(map.split_off(&pivot).into_keys());
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000_000;

    fn valid_span() -> Span {
        Span {
            start_time: NOW - 1_000,
            span_id: "0123456789abcdef".into(),
            parent_id: "0".into(),
            trace_id: "0123456789abcdef0123456789abcdef".into(),
            workspace_id: "ws".into(),
            span_name: "root".into(),
            span_type: "model".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_minimal_ids_and_time_window() {
        let mut span = valid_span();
        span.trace_id = "00000000000000000000000000000001".into();
        span.span_id = "0000000000000001".into();
        span.start_time = NOW - 12 * MICROS_PER_HOUR;
        assert!(span.clone().validate_and_clip_at(NOW).is_ok());

        let mut future = span.clone();
        future.start_time = NOW + 2 * MICROS_PER_HOUR;
        assert!(future.validate_and_clip_at(NOW).is_err());

        let mut zero = span;
        zero.trace_id = "0".repeat(32);
        assert!(zero.validate_and_clip_at(NOW).is_err());
    }

    #[test]
    fn test_valid_span_passes_unchanged() {
        let mut span = valid_span();
        let before = span.clone();
        span.validate_and_clip_at(NOW).unwrap();
        assert_eq!(span, before);
    }

    #[test]
    fn test_rejects_bad_ids() {
        for bad in ["", "0000000000000000", "0123456789ABCDEF", "0123456789abcde", "xyz"] {
            let mut span = valid_span();
            span.span_id = bad.into();
            let err = span.validate_and_clip_at(NOW).unwrap_err();
            assert_eq!(err.code(), "common.invalid_param", "span_id {bad:?}");
        }

        let mut span = valid_span();
        span.trace_id = "0".repeat(32);
        assert!(span.validate_and_clip_at(NOW).is_err());
    }

    #[test]
    fn test_start_time_window() {
        let mut old = valid_span();
        old.start_time = NOW - MAX_START_TIME_LAG - 1;
        assert!(old.validate_and_clip_at(NOW).is_err());

        let mut future = valid_span();
        future.start_time = NOW + MAX_START_TIME_LEAD + 1;
        assert!(future.validate_and_clip_at(NOW).is_err());

        let mut edge = valid_span();
        edge.start_time = NOW + MAX_START_TIME_LEAD;
        assert!(edge.validate_and_clip_at(NOW).is_ok());
    }

    #[test]
    fn test_negative_durations_coerced() {
        let mut span = valid_span();
        span.duration_micros = -5;
        span.tags_long.insert("latency_first_resp".into(), -10);
        span.tags_long.insert("other".into(), -10);
        span.validate_and_clip_at(NOW).unwrap();

        assert_eq!(span.duration_micros, 0);
        assert_eq!(span.tags_long["latency_first_resp"], 0);
        assert_eq!(span.tags_long["other"], -10);
    }

    #[test]
    fn test_system_tags_outside_allow_list_dropped() {
        let mut span = valid_span();
        span.system_tags_string.insert("env".into(), "prod".into());
        span.system_tags_string.insert("secret".into(), "x".into());
        span.system_tags_long.insert("unknown".into(), 1);
        span.validate_and_clip_at(NOW).unwrap();

        assert_eq!(span.system_tags_string.len(), 1);
        assert!(span.system_tags_long.is_empty());
    }

    #[test]
    fn test_clipping_records_fields_and_is_idempotent() {
        let mut span = valid_span();
        span.input = "a".repeat(MAX_PAYLOAD_BYTES + 10);
        span.span_name = "n".repeat(MAX_FIELD_BYTES * 2);
        let long_key = "k".repeat(MAX_TAG_KEY_CHARS + 5);
        span.tags_string.insert(long_key.clone(), "v".into());
        span.tags_byte.insert("blob".into(), "b".repeat(MAX_FIELD_BYTES + 1));

        span.validate_and_clip_at(NOW).unwrap();
        assert_eq!(span.input.len(), MAX_PAYLOAD_BYTES);
        assert_eq!(span.span_name.len(), MAX_FIELD_BYTES);
        assert!(span.tags_string.contains_key(&"k".repeat(MAX_TAG_KEY_CHARS)));
        assert_eq!(span.tags_byte["blob"].len(), MAX_FIELD_BYTES);

        let recorded: Vec<String> =
            serde_json::from_str(&span.system_tags_string[CLIP_FIELDS_TAG]).unwrap();
        assert!(recorded.contains(&"input".to_string()));
        assert!(recorded.contains(&"span_name".to_string()));
        assert!(recorded.contains(&long_key));
        assert!(recorded.contains(&"blob".to_string()));

        let once = span.clone();
        span.validate_and_clip_at(NOW).unwrap();
        assert_eq!(span, once);
    }

    #[test]
    fn test_custom_tag_count_limited() {
        let mut span = valid_span();
        for i in 0..40 {
            span.tags_string.insert(format!("s{i:02}"), "v".into());
        }
        for i in 0..20 {
            span.tags_long.insert(format!("l{i:02}"), i);
        }
        span.validate_and_clip_at(NOW).unwrap();

        assert_eq!(span.custom_tag_count(), MAX_CUSTOM_TAGS);
        assert_eq!(span.tags_string.len(), 40);
        assert_eq!(span.tags_long.len(), 10);
        assert!(span.tags_long.contains_key("l09"));
        assert!(!span.tags_long.contains_key("l10"));

        let once = span.clone();
        span.validate_and_clip_at(NOW).unwrap();
        assert_eq!(span, once);
    }

    #[test]
    fn test_clip_respects_utf8_boundaries() {
        let mut span = valid_span();
        span.method = "é".repeat(MAX_FIELD_BYTES);
        span.validate_and_clip_at(NOW).unwrap();
        assert!(span.method.len() <= MAX_FIELD_BYTES);
        assert!(span.method.chars().all(|c| c == 'é'));
    }
}
