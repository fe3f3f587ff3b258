//! Annotation writes
//!
//! Every write appends the full current state of an annotation under its
//! stable id; readers keep the most recently updated row. Writes and the
//! reads they depend on use the annotation table of the ingest tenant.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::data::SpanStore;
use crate::data::mapper::{annotation_to_row, row_to_annotation};
use crate::data::types::AnnotationQuery;
use crate::domain::error::{TraceError, TraceResult};
use crate::domain::query::MAX_ANNOTATIONS;
use crate::domain::span::{
    Annotation, AnnotationMetadata, AnnotationType, AnnotationValue, Correction, CorrectionType,
    NewAnnotation, dedup_annotations,
};
use crate::domain::tenant::{TenantProvider, TenantTableConfig};
use crate::utils::time::now_micros;

/// Identity of an existing annotation
#[derive(Debug, Clone)]
pub struct AnnotationRef {
    pub workspace_id: String,
    pub span_id: String,
    pub trace_id: String,
    /// Start time of the annotated span (microseconds)
    pub start_time: i64,
    pub annotation_type: AnnotationType,
    pub key: String,
}

impl AnnotationRef {
    pub fn id(&self) -> String {
        Annotation::generate_id(&self.span_id, &self.trace_id, self.annotation_type, &self.key)
    }
}

#[derive(Debug, Clone)]
pub struct CorrectAnnotationParams {
    pub target: AnnotationRef,
    pub value: AnnotationValue,
    pub reasoning: String,
    pub correction_type: CorrectionType,
    pub updated_by: String,
}

#[derive(Debug, Clone)]
pub struct DeleteAnnotationParams {
    pub target: AnnotationRef,
    pub deleted_by: String,
}

pub struct AnnotationService {
    store: Arc<dyn SpanStore>,
    tenants: Arc<dyn TenantProvider>,
    tables: Arc<TenantTableConfig>,
}

impl AnnotationService {
    pub fn new(
        store: Arc<dyn SpanStore>,
        tenants: Arc<dyn TenantProvider>,
        tables: Arc<TenantTableConfig>,
    ) -> Self {
        Self {
            store,
            tenants,
            tables,
        }
    }

    /// Store a new annotation
    ///
    /// Fails when a live annotation with the same identity exists; a deleted
    /// one is replaced.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        fields: NewAnnotation,
        metadata: Option<AnnotationMetadata>,
    ) -> TraceResult<Annotation> {
        for (name, value) in [
            ("workspace_id", &fields.workspace_id),
            ("span_id", &fields.span_id),
            ("trace_id", &fields.trace_id),
            ("key", &fields.key),
        ] {
            if value.is_empty() {
                return Err(TraceError::InvalidParam(format!("{name} is required")));
            }
        }

        let target = AnnotationRef {
            workspace_id: fields.workspace_id.clone(),
            span_id: fields.span_id.clone(),
            trace_id: fields.trace_id.clone(),
            start_time: fields.start_time,
            annotation_type: fields.annotation_type,
            key: fields.key.clone(),
        };
        let existing = self.load(cancel, &target).await?;
        if existing.as_ref().is_some_and(|a| !a.is_deleted) {
            return Err(TraceError::InvalidParam(format!(
                "annotation {} already exists on span {}",
                target.key, target.span_id
            )));
        }

        let mut now = now_micros();
        if let Some(prev) = &existing {
            now = now.max(prev.updated_at + 1);
        }
        let mut annotation = Annotation::new(fields, now);
        annotation.metadata = metadata;
        self.write(cancel, &annotation).await?;

        tracing::debug!(
            id = %annotation.id,
            span_id = %annotation.span_id,
            key = %annotation.key,
            "Annotation created"
        );
        Ok(annotation)
    }

    /// Replace the value of a live annotation, keeping the revision history
    pub async fn correct(
        &self,
        cancel: &CancellationToken,
        params: CorrectAnnotationParams,
    ) -> TraceResult<Annotation> {
        let mut annotation = self.load_live(cancel, &params.target).await?;

        // Later revisions must sort after earlier ones
        let now = now_micros().max(annotation.updated_at + 1);
        annotation.apply_correction(Correction {
            reasoning: params.reasoning,
            value: params.value,
            correction_type: params.correction_type,
            update_at: now,
            updated_by: params.updated_by,
        });
        self.write(cancel, &annotation).await?;

        tracing::debug!(
            id = %annotation.id,
            corrections = annotation.corrections.len(),
            "Annotation corrected"
        );
        Ok(annotation)
    }

    pub async fn delete(
        &self,
        cancel: &CancellationToken,
        params: DeleteAnnotationParams,
    ) -> TraceResult<()> {
        let mut annotation = self.load_live(cancel, &params.target).await?;
        let now = now_micros().max(annotation.updated_at + 1);
        annotation.mark_deleted(now, &params.deleted_by);
        self.write(cancel, &annotation).await?;

        tracing::debug!(id = %annotation.id, "Annotation deleted");
        Ok(())
    }

    fn table(&self) -> TraceResult<&str> {
        let tenant = self.tenants.ingest_tenant(&[]);
        self.tables.annotation_table(&tenant)
    }

    /// Latest revision of the annotation, deleted or not
    async fn load(
        &self,
        cancel: &CancellationToken,
        target: &AnnotationRef,
    ) -> TraceResult<Option<Annotation>> {
        let query = AnnotationQuery {
            tables: vec![self.table()?.to_string()],
            workspace_id: target.workspace_id.clone(),
            span_ids: vec![target.span_id.clone()],
            start_time: target.start_time,
            end_time: target.start_time,
            include_deleted: true,
            limit: MAX_ANNOTATIONS,
        };
        let id = target.id();
        let annotations = fetch_annotations(self.store.as_ref(), cancel, &query).await?;
        Ok(annotations.into_iter().find(|a| a.id == id))
    }

    async fn load_live(
        &self,
        cancel: &CancellationToken,
        target: &AnnotationRef,
    ) -> TraceResult<Annotation> {
        match self.load(cancel, target).await? {
            Some(annotation) if !annotation.is_deleted => Ok(annotation),
            _ => Err(TraceError::InvalidParam(format!(
                "annotation {} not found on span {}",
                target.key, target.span_id
            ))),
        }
    }

    async fn write(&self, cancel: &CancellationToken, annotation: &Annotation) -> TraceResult<()> {
        let table = self.table()?;
        let row = annotation_to_row(annotation)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TraceError::Cancelled),
            result = self.store.insert_annotations(table, std::slice::from_ref(&row)) => Ok(result?),
        }
    }
}

/// Read annotation rows and keep the latest revision of each
pub(crate) async fn fetch_annotations(
    store: &dyn SpanStore,
    cancel: &CancellationToken,
    query: &AnnotationQuery,
) -> TraceResult<Vec<Annotation>> {
    let rows = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TraceError::Cancelled),
        rows = store.list_annotations(query) => rows?,
    };
    let annotations = rows
        .iter()
        .map(row_to_annotation)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(dedup_annotations(annotations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::data::InMemorySpanStore;
    use crate::domain::span::{AnnotationStatus, AutoEvaluateMetadata};
    use crate::domain::tenant::{ConfigTenantProvider, PlatformTenantsConfig};

    const START: i64 = 1_700_000_000_000_000;

    fn service() -> (Arc<InMemorySpanStore>, AnnotationService) {
        let store = Arc::new(InMemorySpanStore::new());
        let tenants = ConfigTenantProvider::new(PlatformTenantsConfig {
            default_ingest_tenant: "spans".into(),
            config: HashMap::from([("cozeloop".to_string(), vec!["spans".to_string()])]),
        });
        let tables: TenantTableConfig = serde_json::from_value(serde_json::json!({
            "insert_table": {"spans": {"3d": "spans_3d"}},
            "annotation_table": {"spans": "annotations"}
        }))
        .unwrap();
        let service = AnnotationService::new(store.clone(), Arc::new(tenants), Arc::new(tables));
        (store, service)
    }

    fn new_annotation(value: &str) -> NewAnnotation {
        NewAnnotation {
            span_id: "0000000000000001".into(),
            trace_id: "00000000000000000000000000000001".into(),
            start_time: START,
            workspace_id: "ws1".into(),
            annotation_type: AnnotationType::ManualFeedback,
            key: "quality".into(),
            value: AnnotationValue::String(value.into()),
            reasoning: String::new(),
            created_by: "alice".into(),
        }
    }

    fn target() -> AnnotationRef {
        AnnotationRef {
            workspace_id: "ws1".into(),
            span_id: "0000000000000001".into(),
            trace_id: "00000000000000000000000000000001".into(),
            start_time: START,
            annotation_type: AnnotationType::ManualFeedback,
            key: "quality".into(),
        }
    }

    async fn stored(store: &InMemorySpanStore, include_deleted: bool) -> Vec<Annotation> {
        let query = AnnotationQuery {
            tables: vec!["annotations".into()],
            workspace_id: "ws1".into(),
            span_ids: vec!["0000000000000001".into()],
            start_time: START,
            end_time: START,
            include_deleted,
            limit: MAX_ANNOTATIONS,
        };
        fetch_annotations(store, &CancellationToken::new(), &query)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_writes_to_ingest_tenant_table() {
        let (store, service) = service();
        let cancel = CancellationToken::new();
        let metadata = AnnotationMetadata::AutoEvaluate(AutoEvaluateMetadata {
            task_id: 1,
            evaluator_record_id: 2,
            evaluator_version_id: 3,
        });

        let created = service
            .create(&cancel, new_annotation("good"), Some(metadata.clone()))
            .await
            .unwrap();
        assert_eq!(created.id, target().id());

        let rows = stored(&store, false).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, AnnotationValue::String("good".into()));
        assert_eq!(rows[0].metadata, Some(metadata));

        let err = service
            .create(&cancel, new_annotation("again"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "common.invalid_param");
    }

    #[tokio::test]
    async fn test_create_requires_identity() {
        let (_, service) = service();
        let mut fields = new_annotation("good");
        fields.key.clear();
        let err = service
            .create(&CancellationToken::new(), fields, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("key is required"));
    }

    #[tokio::test]
    async fn test_correct_appends_revision() {
        let (store, service) = service();
        let cancel = CancellationToken::new();
        let created = service
            .create(&cancel, new_annotation("bad"), None)
            .await
            .unwrap();

        let corrected = service
            .correct(
                &cancel,
                CorrectAnnotationParams {
                    target: target(),
                    value: AnnotationValue::String("good".into()),
                    reasoning: "re-read the output".into(),
                    correction_type: CorrectionType::Manual,
                    updated_by: "bob".into(),
                },
            )
            .await
            .unwrap();
        assert!(corrected.updated_at > created.updated_at);
        assert_eq!(corrected.created_by, "alice");

        let rows = stored(&store, false).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, AnnotationValue::String("good".into()));
        assert_eq!(rows[0].updated_by, "bob");
        assert_eq!(rows[0].corrections.len(), 1);
        assert_eq!(rows[0].corrections[0].reasoning, "re-read the output");
    }

    #[tokio::test]
    async fn test_correct_missing_annotation() {
        let (_, service) = service();
        let err = service
            .correct(
                &CancellationToken::new(),
                CorrectAnnotationParams {
                    target: target(),
                    value: AnnotationValue::Long(1),
                    reasoning: String::new(),
                    correction_type: CorrectionType::Llm,
                    updated_by: "bob".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_delete_hides_and_allows_recreate() {
        let (store, service) = service();
        let cancel = CancellationToken::new();
        service
            .create(&cancel, new_annotation("bad"), None)
            .await
            .unwrap();

        service
            .delete(
                &cancel,
                DeleteAnnotationParams {
                    target: target(),
                    deleted_by: "bob".into(),
                },
            )
            .await
            .unwrap();

        let all = stored(&store, true).await;
        assert_eq!(all.len(), 1);
        assert!(all[0].is_deleted);
        assert_eq!(all[0].status, AnnotationStatus::Deleted);
        assert!(all[0].deleted_at > 0);

        let err = service
            .delete(
                &cancel,
                DeleteAnnotationParams {
                    target: target(),
                    deleted_by: "bob".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "common.invalid_param");

        let recreated = service
            .create(&cancel, new_annotation("fine"), None)
            .await
            .unwrap();
        assert!(!recreated.is_deleted);
        let latest = stored(&store, true).await;
        assert_eq!(latest[0].value, AnnotationValue::String("fine".into()));
        assert!(!latest[0].is_deleted);
    }

    #[tokio::test]
    async fn test_cancelled_write() {
        let (store, service) = service();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service
            .create(&cancel, new_annotation("good"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::Cancelled));
        assert!(stored(&store, true).await.is_empty());
    }
}
