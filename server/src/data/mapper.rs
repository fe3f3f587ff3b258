//! Domain ↔ row mapping for the column store
//!
//! Tag maps are copied into fresh collections in both directions, so rows
//! handed to a writer and spans handed to processors never share storage.

use std::collections::BTreeMap;

use crate::data::error::DataError;
use crate::data::types::{AnnotationRow, SpanRow};
use crate::domain::span::{
    Annotation, AnnotationMetadata, AnnotationStatus, AnnotationType, AnnotationValue,
    AnnotationValueType, Correction, Span,
};
use crate::domain::tenant::TtlClass;
use crate::utils::time::micros_to_date_string;

fn pairs<V: Clone>(map: &BTreeMap<String, V>) -> Vec<(String, V)> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Row for `span`, deletable after `ttl` (three days when unset)
pub fn span_to_row(span: &Span, ttl: Option<TtlClass>, now_us: i64) -> SpanRow {
    SpanRow {
        start_time: span.start_time,
        span_id: span.span_id.clone(),
        parent_id: span.parent_id.clone(),
        trace_id: span.trace_id.clone(),
        duration: span.duration_micros,
        space_id: span.workspace_id.clone(),
        span_name: span.span_name.clone(),
        span_type: span.span_type.clone(),
        status_code: span.status_code,
        call_type: non_empty(&span.call_type),
        psm: non_empty(&span.psm),
        logid: non_empty(&span.log_id),
        method: non_empty(&span.method),
        input: span.input.clone(),
        output: span.output.clone(),
        object_storage: non_empty(&span.object_storage),
        tags_string: pairs(&span.tags_string),
        tags_long: pairs(&span.tags_long),
        tags_float: pairs(&span.tags_double),
        tags_bool: span
            .tags_bool
            .iter()
            .map(|(k, v)| (k.clone(), u8::from(*v)))
            .collect(),
        tags_byte: pairs(&span.tags_byte),
        system_tags_string: pairs(&span.system_tags_string),
        system_tags_long: pairs(&span.system_tags_long),
        system_tags_float: pairs(&span.system_tags_double),
        logic_delete_date: ttl.unwrap_or_default().delete_time_after(now_us),
    }
}

pub fn row_to_span(row: &SpanRow) -> Span {
    Span {
        start_time: row.start_time,
        span_id: row.span_id.clone(),
        parent_id: row.parent_id.clone(),
        trace_id: row.trace_id.clone(),
        duration_micros: row.duration,
        workspace_id: row.space_id.clone(),
        span_name: row.span_name.clone(),
        span_type: row.span_type.clone(),
        status_code: row.status_code,
        call_type: row.call_type.clone().unwrap_or_default(),
        psm: row.psm.clone().unwrap_or_default(),
        log_id: row.logid.clone().unwrap_or_default(),
        method: row.method.clone().unwrap_or_default(),
        input: row.input.clone(),
        output: row.output.clone(),
        object_storage: row.object_storage.clone().unwrap_or_default(),
        tags_string: row.tags_string.iter().cloned().collect(),
        tags_long: row.tags_long.iter().cloned().collect(),
        tags_double: row.tags_float.iter().cloned().collect(),
        tags_bool: row
            .tags_bool
            .iter()
            .map(|(k, v)| (k.clone(), *v != 0))
            .collect(),
        tags_byte: row.tags_byte.iter().cloned().collect(),
        system_tags_string: row.system_tags_string.iter().cloned().collect(),
        system_tags_long: row.system_tags_long.iter().cloned().collect(),
        system_tags_double: row.system_tags_float.iter().cloned().collect(),
        logic_delete_time: row.logic_delete_date,
        attr_tos: None,
    }
}

pub fn annotation_to_row(annotation: &Annotation) -> Result<AnnotationRow, DataError> {
    let correction = serde_json::to_string(&annotation.corrections)
        .map_err(|e| DataError::Mapping(format!("encode corrections: {e}")))?;
    let metadata = match &annotation.metadata {
        Some(metadata) => metadata
            .encode()
            .map_err(|e| DataError::Mapping(format!("encode metadata: {e}")))?,
        None => String::new(),
    };

    let mut row = AnnotationRow {
        id: annotation.id.clone(),
        span_id: annotation.span_id.clone(),
        trace_id: annotation.trace_id.clone(),
        start_time: annotation.start_time,
        space_id: annotation.workspace_id.clone(),
        annotation_type: annotation.annotation_type.as_str().to_string(),
        annotation_index: annotation.annotation_index.clone(),
        key: annotation.key.clone(),
        value_type: annotation.value.value_type().as_str().to_string(),
        reasoning: annotation.reasoning.clone(),
        correction,
        metadata,
        status: annotation.status.as_str().to_string(),
        created_by: annotation.created_by.clone(),
        created_at: annotation.created_at,
        updated_by: annotation.updated_by.clone(),
        updated_at: annotation.updated_at,
        deleted_at: annotation.deleted_at,
        start_date: micros_to_date_string(annotation.start_time),
        ..Default::default()
    };
    match &annotation.value {
        AnnotationValue::String(v) => row.value_string = v.clone(),
        AnnotationValue::Long(v) => row.value_long = *v,
        AnnotationValue::Double(v) => row.value_float = *v,
        AnnotationValue::Bool(v) => row.value_bool = u8::from(*v),
    }
    Ok(row)
}

pub fn row_to_annotation(row: &AnnotationRow) -> Result<Annotation, DataError> {
    let annotation_type = AnnotationType::parse(&row.annotation_type).ok_or_else(|| {
        DataError::Mapping(format!("unknown annotation type: {}", row.annotation_type))
    })?;
    let value = match AnnotationValueType::parse(&row.value_type) {
        Some(AnnotationValueType::String) => AnnotationValue::String(row.value_string.clone()),
        Some(AnnotationValueType::Long) => AnnotationValue::Long(row.value_long),
        Some(AnnotationValueType::Double) => AnnotationValue::Double(row.value_float),
        Some(AnnotationValueType::Bool) => AnnotationValue::Bool(row.value_bool != 0),
        None => {
            return Err(DataError::Mapping(format!(
                "unknown annotation value type: {}",
                row.value_type
            )));
        }
    };
    let corrections: Vec<Correction> = if row.correction.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&row.correction).unwrap_or_else(|e| {
            tracing::warn!(id = %row.id, error = %e, "Dropping undecodable annotation corrections");
            Vec::new()
        })
    };

    Ok(Annotation {
        id: row.id.clone(),
        span_id: row.span_id.clone(),
        trace_id: row.trace_id.clone(),
        start_time: row.start_time,
        workspace_id: row.space_id.clone(),
        annotation_type,
        annotation_index: row.annotation_index.clone(),
        key: row.key.clone(),
        value,
        reasoning: row.reasoning.clone(),
        corrections,
        metadata: AnnotationMetadata::decode(annotation_type, &row.metadata),
        status: AnnotationStatus::parse(&row.status),
        created_at: row.created_at,
        created_by: row.created_by.clone(),
        updated_at: row.updated_at,
        updated_by: row.updated_by.clone(),
        deleted_at: row.deleted_at,
        is_deleted: row.deleted_at > 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::span::{AutoEvaluateMetadata, CorrectionType, NewAnnotation};
    use crate::utils::time::MICROS_PER_DAY;

    fn sample_span() -> Span {
        let mut span = Span {
            start_time: 1_700_000_000_000_000,
            span_id: "0000000000000001".into(),
            parent_id: "0".into(),
            trace_id: "00000000000000000000000000000001".into(),
            workspace_id: "ws".into(),
            call_type: "PromptPlayground".into(),
            status_code: 1,
            ..Default::default()
        };
        span.tags_bool.insert("stream".into(), true);
        span.tags_bool.insert("cached".into(), false);
        span.tags_double.insert("temperature".into(), 0.5);
        span.system_tags_string.insert("env".into(), "prod".into());
        span
    }

    #[test]
    fn test_span_row_columns() {
        let row = span_to_row(&sample_span(), None, 100);
        assert_eq!(row.space_id, "ws");
        assert_eq!(row.call_type.as_deref(), Some("PromptPlayground"));
        assert_eq!(row.psm, None);
        assert_eq!(row.logid, None);
        assert!(row.tags_bool.contains(&("stream".to_string(), 1)));
        assert!(row.tags_bool.contains(&("cached".to_string(), 0)));
        assert_eq!(row.tags_float, vec![("temperature".to_string(), 0.5)]);
        assert_eq!(row.logic_delete_date, 100 + 3 * MICROS_PER_DAY);

        let row = span_to_row(&sample_span(), Some(TtlClass::Days30), 100);
        assert_eq!(row.logic_delete_date, 100 + 30 * MICROS_PER_DAY);
    }

    #[test]
    fn test_span_restored_from_row() {
        let span = sample_span();
        let restored = row_to_span(&span_to_row(&span, None, 0));
        assert_eq!(restored.tags_bool, span.tags_bool);
        assert_eq!(restored.psm, "");
        assert_eq!(restored.logic_delete_time, 3 * MICROS_PER_DAY);

        let mut row = span_to_row(&span, None, 0);
        row.tags_bool.push(("odd".into(), 7));
        assert_eq!(row_to_span(&row).tags_bool.get("odd"), Some(&true));
    }

    #[test]
    fn test_restored_span_is_independent_of_row() {
        let row = span_to_row(&sample_span(), None, 0);
        let mut span = row_to_span(&row);
        span.remove_custom_tag("stream");
        assert!(row.tags_bool.iter().any(|(k, _)| k == "stream"));
    }

    fn sample_annotation() -> Annotation {
        let mut annotation = Annotation::new(
            NewAnnotation {
                span_id: "s".into(),
                trace_id: "t".into(),
                start_time: 1_700_000_000_000_000,
                workspace_id: "ws".into(),
                annotation_type: AnnotationType::AutoEvaluate,
                key: "accuracy".into(),
                value: AnnotationValue::Double(0.8),
                reasoning: "close".into(),
                created_by: "u1".into(),
            },
            1,
        );
        annotation.metadata = Some(AnnotationMetadata::AutoEvaluate(AutoEvaluateMetadata {
            task_id: 1,
            evaluator_record_id: 2,
            evaluator_version_id: 3,
        }));
        annotation
    }

    #[test]
    fn test_annotation_value_columns() {
        let row = annotation_to_row(&sample_annotation()).unwrap();
        assert_eq!(row.value_type, "double");
        assert_eq!(row.value_float, 0.8);
        assert_eq!(row.value_string, "");
        assert_eq!(row.start_date, "2023-11-14");
        assert_eq!(row.annotation_type, "auto-evaluate");
        assert_eq!(row.correction, "[]");
    }

    #[test]
    fn test_annotation_restored() {
        let mut annotation = sample_annotation();
        annotation.apply_correction(Correction {
            reasoning: "fixed".into(),
            value: AnnotationValue::Double(0.9),
            correction_type: CorrectionType::Manual,
            update_at: 5,
            updated_by: "u2".into(),
        });
        let restored = row_to_annotation(&annotation_to_row(&annotation).unwrap()).unwrap();
        assert_eq!(restored, annotation);
        assert_eq!(
            restored.metadata.as_ref().and_then(|m| m.auto_evaluate()).map(|m| m.task_id),
            Some(1)
        );
    }

    #[test]
    fn test_only_selected_value_column_is_read() {
        let mut row = annotation_to_row(&sample_annotation()).unwrap();
        row.value_type = "bool".into();
        row.value_bool = 1;
        let restored = row_to_annotation(&row).unwrap();
        assert_eq!(restored.value, AnnotationValue::Bool(true));
    }

    #[test]
    fn test_unrecognized_metadata_is_kept_raw() {
        let mut row = annotation_to_row(&sample_annotation()).unwrap();
        row.metadata = r#"{"unexpected":true}"#.into();
        row.correction = "not json".into();
        let restored = row_to_annotation(&row).unwrap();
        assert_eq!(
            restored.metadata,
            Some(AnnotationMetadata::Unknown(r#"{"unexpected":true}"#.into()))
        );
        assert!(restored.metadata.unwrap().auto_evaluate().is_none());
        assert!(restored.corrections.is_empty());
    }

    #[test]
    fn test_deleted_flag_from_deleted_at() {
        let mut annotation = sample_annotation();
        annotation.mark_deleted(10, "u3");
        let restored = row_to_annotation(&annotation_to_row(&annotation).unwrap()).unwrap();
        assert!(restored.is_deleted);
        assert_eq!(restored.status, AnnotationStatus::Deleted);

        let mut row = annotation_to_row(&sample_annotation()).unwrap();
        row.annotation_type = "bogus".into();
        assert!(row_to_annotation(&row).is_err());
    }
}
