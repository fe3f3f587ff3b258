use async_trait::async_trait;

use super::{Settings, SpanProcessor};
use crate::domain::error::{TraceError, TraceResult};
use crate::domain::span::Span;

/// Rejects results where no span belongs to the caller's workspace
pub struct WorkspaceProcessor;

#[async_trait]
impl SpanProcessor for WorkspaceProcessor {
    fn name(&self) -> &'static str {
        "workspace"
    }

    async fn transform(&self, spans: Vec<Span>, settings: &Settings) -> TraceResult<Vec<Span>> {
        if spans.is_empty() || spans.iter().any(|s| s.workspace_id == settings.workspace_id) {
            return Ok(spans);
        }
        tracing::warn!(
            workspace_id = %settings.workspace_id,
            count = spans.len(),
            "No span of the result belongs to the workspace"
        );
        Err(TraceError::NotInSpace {
            workspace_id: settings.workspace_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::domain::platform::PlatformType;

    #[tokio::test]
    async fn test_not_in_space() {
        let settings = settings(PlatformType::Cozeloop);
        let err = WorkspaceProcessor
            .transform(vec![span("a", "0", "other")], &settings)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "trace.not_in_space");
    }

    #[tokio::test]
    async fn test_one_match_is_enough() {
        let settings = settings(PlatformType::Cozeloop);
        let spans = vec![span("a", "0", "other"), span("b", "a", "ws1")];
        let out = WorkspaceProcessor.transform(spans, &settings).await.unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_passes() {
        let settings = settings(PlatformType::Cozeloop);
        assert!(
            WorkspaceProcessor
                .transform(Vec::new(), &settings)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
