//! Annotations: evaluator or user judgements attached to a span

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::filter::{FieldType, FieldValue, Filterable};
use crate::utils::crypto::sha256_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationType {
    AutoEvaluate,
    ManualEvaluationSet,
    ManualDataset,
    ManualFeedback,
    CozeFeedback,
}

impl AnnotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoEvaluate => "auto-evaluate",
            Self::ManualEvaluationSet => "manual-evaluation-set",
            Self::ManualDataset => "manual-dataset",
            Self::ManualFeedback => "manual-feedback",
            Self::CozeFeedback => "coze-feedback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto-evaluate" => Some(Self::AutoEvaluate),
            "manual-evaluation-set" => Some(Self::ManualEvaluationSet),
            "manual-dataset" => Some(Self::ManualDataset),
            "manual-feedback" => Some(Self::ManualFeedback),
            "coze-feedback" => Some(Self::CozeFeedback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationValueType {
    String,
    Long,
    Double,
    Bool,
}

impl AnnotationValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Long => "long",
            Self::Double => "double",
            Self::Bool => "bool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "long" => Some(Self::Long),
            "double" => Some(Self::Double),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }
}

/// Scalar annotation value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_type", content = "value", rename_all = "snake_case")]
pub enum AnnotationValue {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl Default for AnnotationValue {
    fn default() -> Self {
        Self::String(String::new())
    }
}

impl AnnotationValue {
    pub fn value_type(&self) -> AnnotationValueType {
        match self {
            Self::String(_) => AnnotationValueType::String,
            Self::Long(_) => AnnotationValueType::Long,
            Self::Double(_) => AnnotationValueType::Double,
            Self::Bool(_) => AnnotationValueType::Bool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    Llm,
    Manual,
}

/// A prior value revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub reasoning: String,
    pub value: AnnotationValue,
    #[serde(rename = "type")]
    pub correction_type: CorrectionType,
    pub update_at: i64,
    pub updated_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoEvaluateMetadata {
    pub task_id: i64,
    pub evaluator_record_id: i64,
    pub evaluator_version_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub dataset_id: i64,
    #[serde(default)]
    pub dataset_item_id: i64,
}

/// Metadata selected by annotation type
///
/// `Unknown` keeps the raw JSON of anything that did not decode into the
/// shape expected for the type, so reads never fail on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationMetadata {
    AutoEvaluate(AutoEvaluateMetadata),
    Dataset(DatasetMetadata),
    Unknown(String),
}

impl AnnotationMetadata {
    pub fn decode(annotation_type: AnnotationType, raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let decoded = match annotation_type {
            AnnotationType::AutoEvaluate => serde_json::from_str(raw).ok().map(Self::AutoEvaluate),
            AnnotationType::ManualEvaluationSet | AnnotationType::ManualDataset => {
                serde_json::from_str(raw).ok().map(Self::Dataset)
            }
            AnnotationType::ManualFeedback | AnnotationType::CozeFeedback => None,
        };
        Some(decoded.unwrap_or_else(|| {
            tracing::debug!(annotation_type = annotation_type.as_str(), "Unrecognized annotation metadata");
            Self::Unknown(raw.to_string())
        }))
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::AutoEvaluate(m) => serde_json::to_string(m),
            Self::Dataset(m) => serde_json::to_string(m),
            Self::Unknown(raw) => Ok(raw.clone()),
        }
    }

    pub fn auto_evaluate(&self) -> Option<&AutoEvaluateMetadata> {
        match self {
            Self::AutoEvaluate(m) => Some(m),
            _ => None,
        }
    }

    pub fn dataset(&self) -> Option<&DatasetMetadata> {
        match self {
            Self::Dataset(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    #[default]
    Normal,
    Inactive,
    Deleted,
}

impl AnnotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Inactive => "inactive",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inactive" => Self::Inactive,
            "deleted" => Self::Deleted,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: String,
    pub span_id: String,
    pub trace_id: String,
    pub start_time: i64,
    pub workspace_id: String,
    pub annotation_type: AnnotationType,
    pub annotation_index: Vec<String>,
    pub key: String,
    pub value: AnnotationValue,
    pub reasoning: String,
    pub corrections: Vec<Correction>,
    pub metadata: Option<AnnotationMetadata>,
    pub status: AnnotationStatus,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
    /// Hard-delete stamp in microseconds; zero while live
    pub deleted_at: i64,
    pub is_deleted: bool,
}

/// Fields an annotation is created from
pub struct NewAnnotation {
    pub span_id: String,
    pub trace_id: String,
    pub start_time: i64,
    pub workspace_id: String,
    pub annotation_type: AnnotationType,
    pub key: String,
    pub value: AnnotationValue,
    pub reasoning: String,
    pub created_by: String,
}

impl Annotation {
    /// Reproducible id over the identity fields
    pub fn generate_id(
        span_id: &str,
        trace_id: &str,
        annotation_type: AnnotationType,
        key: &str,
    ) -> String {
        sha256_hex(&format!(
            "{}:{}:{}:{}",
            span_id,
            trace_id,
            annotation_type.as_str(),
            key
        ))
    }

    pub fn new(fields: NewAnnotation, now_us: i64) -> Self {
        let id = Self::generate_id(
            &fields.span_id,
            &fields.trace_id,
            fields.annotation_type,
            &fields.key,
        );
        Self {
            id,
            span_id: fields.span_id,
            trace_id: fields.trace_id,
            start_time: fields.start_time,
            workspace_id: fields.workspace_id,
            annotation_type: fields.annotation_type,
            annotation_index: Vec::new(),
            key: fields.key,
            value: fields.value,
            reasoning: fields.reasoning,
            corrections: Vec::new(),
            metadata: None,
            status: AnnotationStatus::Normal,
            created_at: now_us,
            created_by: fields.created_by.clone(),
            updated_at: now_us,
            updated_by: fields.created_by,
            deleted_at: 0,
            is_deleted: false,
        }
    }

    /// Record a revision and make its value current
    pub fn apply_correction(&mut self, correction: Correction) {
        self.value = correction.value.clone();
        self.reasoning = correction.reasoning.clone();
        self.updated_at = correction.update_at;
        self.updated_by = correction.updated_by.clone();
        self.corrections.push(correction);
    }

    /// Stamp a hard delete; later stamps never move it backwards
    pub fn mark_deleted(&mut self, now_us: i64, by: &str) {
        self.deleted_at = self.deleted_at.max(now_us);
        self.is_deleted = true;
        self.status = AnnotationStatus::Deleted;
        self.updated_at = now_us;
        self.updated_by = by.to_string();
    }
}

impl Filterable for Annotation {
    fn field_value(&self, name: &str, _field_type: FieldType) -> Option<FieldValue> {
        let value = match name {
            "id" => FieldValue::String(self.id.clone()),
            "span_id" => FieldValue::String(self.span_id.clone()),
            "trace_id" => FieldValue::String(self.trace_id.clone()),
            "start_time" => FieldValue::Long(self.start_time),
            "workspace_id" => FieldValue::String(self.workspace_id.clone()),
            "annotation_type" => FieldValue::String(self.annotation_type.as_str().to_string()),
            "key" => FieldValue::String(self.key.clone()),
            "status" => FieldValue::String(self.status.as_str().to_string()),
            "value" => match &self.value {
                AnnotationValue::String(s) => FieldValue::String(s.clone()),
                AnnotationValue::Long(v) => FieldValue::Long(*v),
                AnnotationValue::Double(v) => FieldValue::Double(*v),
                AnnotationValue::Bool(v) => FieldValue::Bool(*v),
            },
            _ => return None,
        };
        Some(value)
    }
}

/// Collapse duplicate (span, key, type) rows, keeping the latest update
///
/// Output order follows the first occurrence of each identity.
pub fn dedup_annotations(annotations: Vec<Annotation>) -> Vec<Annotation> {
    let mut slots: HashMap<(String, String, AnnotationType), usize> = HashMap::new();
    let mut out: Vec<Annotation> = Vec::with_capacity(annotations.len());
    for annotation in annotations {
        let identity = (
            annotation.span_id.clone(),
            annotation.key.clone(),
            annotation.annotation_type,
        );
        match slots.get(&identity) {
            Some(&idx) => {
                if annotation.updated_at > out[idx].updated_at {
                    out[idx] = annotation;
                }
            }
            None => {
                slots.insert(identity, out.len());
                out.push(annotation);
            }
        }
    }
    out
}
