use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Settings, SpanProcessor};
use crate::domain::error::TraceResult;
use crate::domain::span::Span;
use crate::domain::transform::TransCfgList;

/// Applies the platform's transformation rules to query results
pub struct RedactProcessor {
    platform_cfg: Arc<HashMap<String, TransCfgList>>,
}

impl RedactProcessor {
    pub fn new(platform_cfg: Arc<HashMap<String, TransCfgList>>) -> Self {
        Self { platform_cfg }
    }
}

#[async_trait]
impl SpanProcessor for RedactProcessor {
    fn name(&self) -> &'static str {
        "redact"
    }

    async fn transform(&self, spans: Vec<Span>, settings: &Settings) -> TraceResult<Vec<Span>> {
        match self.platform_cfg.get(settings.platform_type.as_str()) {
            Some(cfg) => Ok(cfg.transform(spans)),
            None => Ok(spans),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::domain::platform::PlatformType;

    #[tokio::test]
    async fn test_platform_rules_drop_and_reparent() {
        let cfg: TransCfgList = serde_json::from_str(
            r#"[{
                "span_filter": {"query_and_or": "and", "filter_fields": [
                    {"field_name": "span_type", "field_type": "string",
                     "query_type": "in", "values": ["model"]}
                ]},
                "tag_filter": {"key_black_list": ["api_key"]}
            }]"#,
        )
        .unwrap();
        let processor = RedactProcessor::new(Arc::new(HashMap::from([(
            "prompt".to_string(),
            cfg,
        )])));

        let mut root = span("a", "0", "ws1");
        root.tags_string.insert("api_key".into(), "secret".into());
        let mut middle = span("b", "a", "ws1");
        middle.span_type = "tool".into();
        let leaf = span("c", "b", "ws1");

        let out = processor
            .transform(vec![root, middle, leaf], &settings(PlatformType::Prompt))
            .await
            .unwrap();
        let mut out: Vec<_> = out
            .into_iter()
            .map(|s| (s.span_id, s.parent_id, s.tags_string.len()))
            .collect();
        out.sort();
        assert_eq!(
            out,
            vec![("a".into(), "0".into(), 0), ("c".into(), "a".into(), 0)]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_platform_passes_through() {
        let processor = RedactProcessor::new(Arc::new(HashMap::new()));
        let out = processor
            .transform(vec![span("a", "0", "ws1")], &settings(PlatformType::Cozeloop))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
    }
}
