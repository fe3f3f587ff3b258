//! Span and annotation data model

mod annotation;
mod model;
mod tags;
mod validate;

pub use annotation::{
    Annotation, AnnotationMetadata, AnnotationStatus, AnnotationType, AnnotationValue,
    AnnotationValueType, AutoEvaluateMetadata, Correction, CorrectionType, DatasetMetadata,
    NewAnnotation, dedup_annotations,
};
pub use model::{AttrTos, ROOT_PARENT_ID, Span, fields};
pub use tags::{TypedTags, split_tags};
pub use validate::{
    CLIP_FIELDS_TAG, MAX_CUSTOM_TAGS, MAX_FIELD_BYTES, MAX_PAYLOAD_BYTES, MAX_TAG_KEY_CHARS,
};
