//! Span query service
//!
//! Composes the platform scope with the caller's filter, reads every table
//! of the platform's query tenants, and runs the processor chain over the
//! mapped spans.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::data::SpanStore;
use crate::data::mapper::row_to_span;
use crate::data::types::{AnnotationQuery, SpanQuery};
use crate::domain::error::{TraceError, TraceResult};
use crate::domain::annotate::fetch_annotations;
use crate::domain::filter::{FieldType, FilterField, FilterFields, QueryType};
use crate::domain::platform::{PlatformFilterFactory, PlatformType, SpanEnv, SpanListType};
use crate::domain::processor::{ProcessorFactory, Settings};
use crate::domain::span::{Annotation, Span, fields};
use crate::domain::tenant::{TenantProvider, TenantTableConfig};
use crate::utils::time::now_micros;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 1000;
pub const MAX_TRACE_SPANS: u32 = 10_000;
pub const MAX_ANNOTATIONS: u32 = 5000;

/// Type and operators of one discoverable field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub field_type: FieldType,
    #[serde(default)]
    pub query_types: Vec<QueryType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
}

/// `available_fields` plus the per-platform `field_metas` listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldMetaConfig {
    /// Field name to its metadata
    #[serde(default)]
    pub available_fields: HashMap<String, FieldMeta>,
    /// Platform to the fields offered for each list type
    #[serde(default)]
    pub field_metas: HashMap<String, HashMap<SpanListType, Vec<String>>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListSpansParams {
    pub workspace_id: String,
    pub platform: String,
    pub span_list_type: SpanListType,
    pub start_time: i64,
    pub end_time: i64,
    pub filters: Option<FilterFields>,
    /// Zero selects [`DEFAULT_PAGE_SIZE`]
    pub limit: u32,
    pub order_desc: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListSpansResult {
    pub spans: Vec<Span>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GetTraceParams {
    pub workspace_id: String,
    pub platform: String,
    pub trace_id: String,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ListAnnotationsParams {
    pub workspace_id: String,
    pub platform: String,
    pub span_ids: Vec<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub include_deleted: bool,
}

pub struct TraceQueryService {
    store: Arc<dyn SpanStore>,
    tenants: Arc<dyn TenantProvider>,
    tables: Arc<TenantTableConfig>,
    platform_filters: Arc<PlatformFilterFactory>,
    processors: Arc<ProcessorFactory>,
    field_meta: Arc<FieldMetaConfig>,
}

impl TraceQueryService {
    pub fn new(
        store: Arc<dyn SpanStore>,
        tenants: Arc<dyn TenantProvider>,
        tables: Arc<TenantTableConfig>,
        platform_filters: Arc<PlatformFilterFactory>,
        processors: Arc<ProcessorFactory>,
        field_meta: Arc<FieldMetaConfig>,
    ) -> Self {
        Self {
            store,
            tenants,
            tables,
            platform_filters,
            processors,
            field_meta,
        }
    }

    pub async fn list_spans(
        &self,
        cancel: &CancellationToken,
        params: ListSpansParams,
    ) -> TraceResult<ListSpansResult> {
        check_time_range(params.start_time, params.end_time)?;
        let limit = match params.limit {
            0 => DEFAULT_PAGE_SIZE,
            n if n > MAX_PAGE_SIZE => {
                return Err(TraceError::InvalidParam(format!(
                    "limit {n} exceeds {MAX_PAGE_SIZE}"
                )));
            }
            n => n,
        };
        if let Some(filters) = &params.filters {
            filters.validate()?;
        }

        let platform = self.platform_filters.get(&params.platform)?;
        let env = SpanEnv {
            workspace_id: params.workspace_id.clone(),
        };
        let mut scope = platform.build_list_filter(&env, params.span_list_type);
        if let Some(filters) = params.filters.filter(|f| !f.is_empty()) {
            scope.filter_fields.push(FilterField::wrap(filters));
        }

        let (tables, tenants) = self.query_tables(&params.platform)?;
        let query = SpanQuery {
            tables,
            start_time: params.start_time,
            end_time: params.end_time,
            filters: Some(scope),
            limit: limit + 1,
            order_desc: params.order_desc,
            now: now_micros(),
            select_all_fields: false,
        };
        let mut spans = self.fetch(cancel, &query).await?;
        let has_more = spans.len() > limit as usize;
        spans.truncate(limit as usize);

        let settings = Settings {
            workspace_id: params.workspace_id,
            platform_type: platform.platform(),
            query_start_time: params.start_time,
            query_end_time: params.end_time,
            tenants,
        };
        let spans = self
            .processors
            .query_chain()
            .run(cancel, &settings, spans)
            .await?;

        tracing::debug!(
            workspace_id = %settings.workspace_id,
            platform = %settings.platform_type,
            count = spans.len(),
            has_more,
            "Listed spans"
        );
        Ok(ListSpansResult { spans, has_more })
    }

    /// Every span of one trace inside the time window, oldest first
    pub async fn get_trace(
        &self,
        cancel: &CancellationToken,
        params: GetTraceParams,
    ) -> TraceResult<Vec<Span>> {
        check_time_range(params.start_time, params.end_time)?;
        if params.trace_id.is_empty() {
            return Err(TraceError::InvalidParam("trace_id is required".to_string()));
        }

        let platform = self.platform_filters.get(&params.platform)?;
        let env = SpanEnv {
            workspace_id: params.workspace_id.clone(),
        };
        let mut filters = platform.build_basic_span_filter(&env);
        filters.push(FilterField::new(
            fields::TRACE_ID,
            FieldType::String,
            QueryType::Eq,
            [params.trace_id.as_str()],
        ));

        let (tables, tenants) = self.query_tables(&params.platform)?;
        let query = SpanQuery {
            tables,
            start_time: params.start_time,
            end_time: params.end_time,
            filters: Some(FilterFields::and(filters)),
            limit: MAX_TRACE_SPANS,
            order_desc: false,
            now: now_micros(),
            select_all_fields: true,
        };
        let spans = self.fetch(cancel, &query).await?;

        let settings = Settings {
            workspace_id: params.workspace_id,
            platform_type: platform.platform(),
            query_start_time: params.start_time,
            query_end_time: params.end_time,
            tenants,
        };
        self.processors
            .query_chain()
            .run(cancel, &settings, spans)
            .await
    }

    /// Annotations of the given spans, one per (span, key, type)
    ///
    /// Rows are deduplicated before deleted ones are dropped, so a delete
    /// hides every earlier revision of the annotation.
    pub async fn list_annotations(
        &self,
        cancel: &CancellationToken,
        params: ListAnnotationsParams,
    ) -> TraceResult<Vec<Annotation>> {
        check_time_range(params.start_time, params.end_time)?;
        if params.span_ids.is_empty() {
            return Ok(Vec::new());
        }

        let tenants = self.tenants.query_tenants(&params.platform)?;
        let tables = self.tables.annotation_tables_for(&tenants);
        if tables.is_empty() {
            return Err(TraceError::Config(format!(
                "no annotation table for platform {}",
                params.platform
            )));
        }

        let query = AnnotationQuery {
            tables,
            workspace_id: params.workspace_id,
            span_ids: params.span_ids,
            start_time: params.start_time,
            end_time: params.end_time,
            include_deleted: true,
            limit: MAX_ANNOTATIONS,
        };
        let mut annotations = fetch_annotations(self.store.as_ref(), cancel, &query).await?;
        if !params.include_deleted {
            annotations.retain(|a| !a.is_deleted);
        }
        Ok(annotations)
    }

    /// Fields a platform offers for a list type, with the operators each allows
    pub fn field_metas(
        &self,
        platform: &str,
        span_list_type: SpanListType,
    ) -> TraceResult<Vec<(String, FieldMeta)>> {
        let platform = PlatformType::parse(platform)
            .ok_or_else(|| TraceError::PlatformNotConfigured(platform.to_string()))?;
        let names = self
            .field_meta
            .field_metas
            .get(platform.as_str())
            .and_then(|by_type| by_type.get(&span_list_type))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut metas = Vec::with_capacity(names.len());
        for name in names {
            let Some(meta) = self.field_meta.available_fields.get(name) else {
                tracing::debug!(field = %name, platform = %platform, "Listed field has no metadata");
                continue;
            };
            let mut meta = meta.clone();
            meta.query_types.retain(|q| meta.field_type.supports(*q));
            metas.push((name.clone(), meta));
        }
        Ok(metas)
    }

    fn query_tables(&self, platform: &str) -> TraceResult<(Vec<String>, Vec<String>)> {
        let tenants = self.tenants.query_tenants(platform)?;
        let tables = self.tables.tables_for(&tenants);
        if tables.is_empty() {
            return Err(TraceError::Config(format!(
                "no query table for platform {platform}"
            )));
        }
        Ok((tables, tenants))
    }

    async fn fetch(&self, cancel: &CancellationToken, query: &SpanQuery) -> TraceResult<Vec<Span>> {
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TraceError::Cancelled),
            rows = self.store.query_spans(query) => rows?,
        };
        Ok(rows.iter().map(row_to_span).collect())
    }
}

fn check_time_range(start_time: i64, end_time: i64) -> TraceResult<()> {
    if start_time > end_time {
        return Err(TraceError::InvalidParam(format!(
            "start_time {start_time} is after end_time {end_time}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemorySpanStore;
    use crate::data::mapper::{annotation_to_row, span_to_row};
    use crate::domain::processor::test_support::{FakeSigner, FixedBenefit};
    use crate::domain::span::{AnnotationType, AnnotationValue, NewAnnotation};
    use crate::domain::tenant::{ConfigTenantProvider, PlatformTenantsConfig};
    use crate::domain::transform::TransCfgList;
    use crate::utils::time::MICROS_PER_HOUR;

    const TABLE: &str = "spans_3d";

    struct Fixture {
        store: Arc<InMemorySpanStore>,
        service: TraceQueryService,
        now: i64,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemorySpanStore::new());
        let tenants = ConfigTenantProvider::new(PlatformTenantsConfig {
            default_ingest_tenant: "spans".into(),
            config: HashMap::from([
                ("cozeloop".to_string(), vec!["spans".to_string()]),
                ("evaluator".to_string(), vec!["spans".to_string()]),
            ]),
        });
        let tables: TenantTableConfig = serde_json::from_value(serde_json::json!({
            "query_tables": {"spans": [TABLE]},
            "insert_table": {"spans": {"3d": TABLE}},
            "annotation_table": {"spans": "annotations"}
        }))
        .unwrap();
        let platform_cfg: Arc<HashMap<String, TransCfgList>> = Arc::new(HashMap::new());
        let processors = ProcessorFactory::new(
            Arc::new(FixedBenefit(7)),
            Arc::new(FakeSigner { fail: false }),
            Arc::clone(&platform_cfg),
        );
        let field_meta: FieldMetaConfig = serde_json::from_value(serde_json::json!({
            "available_fields": {
                "span_name": {"field_type": "string", "query_types": ["match", "eq", "gt"]},
                "duration": {"field_type": "long", "query_types": ["gte", "lte"]}
            },
            "field_metas": {
                "cozeloop": {"root_span": ["span_name", "duration", "missing"]}
            }
        }))
        .unwrap();

        let service = TraceQueryService::new(
            store.clone(),
            Arc::new(tenants),
            Arc::new(tables),
            Arc::new(PlatformFilterFactory::new(&platform_cfg)),
            Arc::new(processors),
            Arc::new(field_meta),
        );
        Fixture {
            store,
            service,
            now: now_micros(),
        }
    }

    fn span(id: &str, parent: &str, start_time: i64) -> Span {
        Span {
            span_id: id.into(),
            parent_id: parent.into(),
            trace_id: "t1".into(),
            workspace_id: "ws1".into(),
            span_name: format!("op-{id}"),
            span_type: "tool".into(),
            start_time,
            ..Default::default()
        }
    }

    async fn seed(fx: &Fixture, spans: &[Span]) {
        let rows: Vec<_> = spans
            .iter()
            .map(|s| span_to_row(s, None, fx.now))
            .collect();
        fx.store.insert_spans(TABLE, &rows).await.unwrap();
    }

    fn list_params(fx: &Fixture) -> ListSpansParams {
        ListSpansParams {
            workspace_id: "ws1".into(),
            platform: "cozeloop".into(),
            start_time: fx.now - MICROS_PER_HOUR,
            end_time: fx.now,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_root_spans_with_caller_filter() {
        let fx = fixture();
        let t = fx.now - 1000;
        let mut other_ws = span("d", "0", t);
        other_ws.workspace_id = "ws2".into();
        seed(&fx, &[span("a", "0", t), span("b", "a", t), span("c", "0", t + 1), other_ws]).await;

        let result = fx
            .service
            .list_spans(&CancellationToken::new(), list_params(&fx))
            .await
            .unwrap();
        let ids: Vec<_> = result.spans.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(!result.has_more);

        let mut params = list_params(&fx);
        params.filters = Some(FilterFields::and(vec![FilterField::new(
            fields::SPAN_NAME,
            FieldType::String,
            QueryType::Eq,
            ["op-c"],
        )]));
        let result = fx
            .service
            .list_spans(&CancellationToken::new(), params)
            .await
            .unwrap();
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].span_id, "c");
    }

    #[tokio::test]
    async fn test_list_pagination_reports_more() {
        let fx = fixture();
        let spans: Vec<Span> = (0..3)
            .map(|i| span(&format!("s{i}"), "0", fx.now - 1000 + i))
            .collect();
        seed(&fx, &spans).await;

        let mut params = list_params(&fx);
        params.limit = 2;
        params.order_desc = true;
        let result = fx
            .service
            .list_spans(&CancellationToken::new(), params)
            .await
            .unwrap();
        let ids: Vec<_> = result.spans.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
        assert!(result.has_more);
    }

    #[tokio::test]
    async fn test_invalid_caller_filter_rejected() {
        let fx = fixture();
        let mut params = list_params(&fx);
        params.filters = Some(FilterFields::and(vec![FilterField::new(
            fields::DURATION,
            FieldType::Long,
            QueryType::Gt,
            ["ten"],
        )]));
        let err = fx
            .service
            .list_spans(&CancellationToken::new(), params)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "filter.invalid");
    }

    #[tokio::test]
    async fn test_unknown_platform_and_bad_range() {
        let fx = fixture();
        let mut params = list_params(&fx);
        params.platform = "nowhere".into();
        let err = fx
            .service
            .list_spans(&CancellationToken::new(), params)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "config.platform_not_configured");

        let mut params = list_params(&fx);
        params.start_time = params.end_time + 1;
        let err = fx
            .service
            .list_spans(&CancellationToken::new(), params)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "common.invalid_param");
    }

    #[tokio::test]
    async fn test_empty_result_past_retention_expires() {
        let fx = fixture();
        let mut params = list_params(&fx);
        params.end_time = fx.now - 8 * 24 * MICROS_PER_HOUR;
        params.start_time = params.end_time - MICROS_PER_HOUR;
        let err = fx
            .service
            .list_spans(&CancellationToken::new(), params)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "trace.expired");
    }

    #[tokio::test]
    async fn test_cancelled_query() {
        let fx = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fx
            .service
            .list_spans(&cancel, list_params(&fx))
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::Cancelled));
    }

    #[tokio::test]
    async fn test_get_trace_returns_whole_tree() {
        let fx = fixture();
        let t = fx.now - 1000;
        let mut other_trace = span("x", "0", t);
        other_trace.trace_id = "t2".into();
        seed(&fx, &[span("b", "a", t + 1), span("a", "0", t), other_trace]).await;

        let spans = fx
            .service
            .get_trace(
                &CancellationToken::new(),
                GetTraceParams {
                    workspace_id: "ws1".into(),
                    platform: "cozeloop".into(),
                    trace_id: "t1".into(),
                    start_time: fx.now - MICROS_PER_HOUR,
                    end_time: fx.now,
                },
            )
            .await
            .unwrap();
        let ids: Vec<_> = spans.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_list_annotations_deduplicated() {
        let fx = fixture();
        let new = |value: &str| NewAnnotation {
            span_id: "a".into(),
            trace_id: "t1".into(),
            start_time: fx.now - 1000,
            workspace_id: "ws1".into(),
            annotation_type: AnnotationType::ManualFeedback,
            key: "quality".into(),
            value: AnnotationValue::String(value.into()),
            reasoning: String::new(),
            created_by: "user".into(),
        };
        let older = Annotation::new(new("bad"), fx.now - 10);
        let newer = Annotation::new(new("good"), fx.now);
        let rows = vec![
            annotation_to_row(&older).unwrap(),
            annotation_to_row(&newer).unwrap(),
        ];
        fx.store.insert_annotations("annotations", &rows).await.unwrap();

        let annotations = fx
            .service
            .list_annotations(
                &CancellationToken::new(),
                ListAnnotationsParams {
                    workspace_id: "ws1".into(),
                    platform: "cozeloop".into(),
                    span_ids: vec!["a".into()],
                    start_time: fx.now - MICROS_PER_HOUR,
                    end_time: fx.now,
                    include_deleted: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].value, AnnotationValue::String("good".into()));
    }

    #[tokio::test]
    async fn test_deleted_annotation_hides_older_revisions() {
        let fx = fixture();
        let live = Annotation::new(
            NewAnnotation {
                span_id: "a".into(),
                trace_id: "t1".into(),
                start_time: fx.now - 1000,
                workspace_id: "ws1".into(),
                annotation_type: AnnotationType::ManualFeedback,
                key: "quality".into(),
                value: AnnotationValue::Bool(true),
                reasoning: String::new(),
                created_by: "user".into(),
            },
            fx.now - 10,
        );
        let mut deleted = live.clone();
        deleted.mark_deleted(fx.now, "user");
        let rows = vec![
            annotation_to_row(&live).unwrap(),
            annotation_to_row(&deleted).unwrap(),
        ];
        fx.store.insert_annotations("annotations", &rows).await.unwrap();

        let params = ListAnnotationsParams {
            workspace_id: "ws1".into(),
            platform: "cozeloop".into(),
            span_ids: vec!["a".into()],
            start_time: fx.now - MICROS_PER_HOUR,
            end_time: fx.now,
            include_deleted: false,
        };
        let cancel = CancellationToken::new();
        let visible = fx
            .service
            .list_annotations(&cancel, params.clone())
            .await
            .unwrap();
        assert!(visible.is_empty());

        let all = fx
            .service
            .list_annotations(
                &cancel,
                ListAnnotationsParams {
                    include_deleted: true,
                    ..params
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_deleted);
    }

    #[test]
    fn test_field_metas_filtered_by_validity() {
        let fx = fixture();
        let metas = fx
            .service
            .field_metas("cozeloop", SpanListType::RootSpan)
            .unwrap();
        let names: Vec<_> = metas.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["span_name", "duration"]);
        assert_eq!(metas[0].1.query_types, vec![QueryType::Match, QueryType::Eq]);
        assert_eq!(metas[1].1.query_types, vec![QueryType::Gte, QueryType::Lte]);

        assert!(
            fx.service
                .field_metas("evaluator", SpanListType::AllSpan)
                .unwrap()
                .is_empty()
        );
        assert!(fx.service.field_metas("nowhere", SpanListType::AllSpan).is_err());
    }
}
