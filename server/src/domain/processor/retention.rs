use std::sync::Arc;

use async_trait::async_trait;

use super::{Settings, SpanProcessor};
use crate::data::benefit::BenefitService;
use crate::domain::error::{TraceError, TraceResult};
use crate::domain::span::Span;
use crate::utils::time::{MICROS_PER_DAY, now_micros};

/// Tells "nothing there" apart from "aged out" for empty results
pub struct RetentionProcessor {
    benefit: Arc<dyn BenefitService>,
}

impl RetentionProcessor {
    pub fn new(benefit: Arc<dyn BenefitService>) -> Self {
        Self { benefit }
    }
}

#[async_trait]
impl SpanProcessor for RetentionProcessor {
    fn name(&self) -> &'static str {
        "retention"
    }

    async fn transform(&self, spans: Vec<Span>, settings: &Settings) -> TraceResult<Vec<Span>> {
        // Every platform is user facing, so every empty result is checked
        if !spans.is_empty() {
            return Ok(spans);
        }

        let benefit = self.benefit.trace_benefit(&settings.workspace_id).await?;
        let retention_start =
            now_micros() - benefit.storage_duration_days.saturating_mul(MICROS_PER_DAY);
        if settings.query_end_time < retention_start {
            return Err(TraceError::Expired {
                query_end_time: settings.query_end_time,
                retention_start,
            });
        }
        Ok(spans)
    }
}
