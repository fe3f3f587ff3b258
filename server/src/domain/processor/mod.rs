//! Post-query span processors
//!
//! After the store returns rows, a per-request chain runs in fixed order:
//!
//! 1. `workspace` - the result must belong to the caller's workspace
//! 2. `retention` - an empty result past the retention window is an error
//! 3. `redact` - platform transformation rules (re-parents survivors)
//! 4. `signing` - presigned URLs for offloaded payloads and attachments
//!
//! The first two fail the request; signing degrades to blank URLs.

mod redact;
mod retention;
mod signing;
mod workspace;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use redact::RedactProcessor;
pub use retention::RetentionProcessor;
pub use signing::{Attachment, ObjectStorage, SigningProcessor};
pub use workspace::WorkspaceProcessor;

use crate::data::benefit::BenefitService;
use crate::data::files::FileUrlSigner;
use crate::domain::error::{TraceError, TraceResult};
use crate::domain::platform::PlatformType;
use crate::domain::span::Span;
use crate::domain::transform::TransCfgList;

/// Request context shared by every processor of a chain
#[derive(Debug, Clone)]
pub struct Settings {
    pub workspace_id: String,
    pub platform_type: PlatformType,
    /// Microseconds
    pub query_start_time: i64,
    /// Microseconds
    pub query_end_time: i64,
    pub tenants: Vec<String>,
}

#[async_trait]
pub trait SpanProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transform(&self, spans: Vec<Span>, settings: &Settings) -> TraceResult<Vec<Span>>;
}

/// Ordered processors for one request
pub struct ProcessorChain {
    processors: Vec<Arc<dyn SpanProcessor>>,
}

impl ProcessorChain {
    pub fn new(processors: Vec<Arc<dyn SpanProcessor>>) -> Self {
        Self { processors }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Run every stage, stopping early when `cancel` fires
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        settings: &Settings,
        mut spans: Vec<Span>,
    ) -> TraceResult<Vec<Span>> {
        for processor in &self.processors {
            if cancel.is_cancelled() {
                return Err(TraceError::Cancelled);
            }
            spans = processor.transform(spans, settings).await.inspect_err(|e| {
                tracing::debug!(processor = processor.name(), error = %e, "Span processor failed");
            })?;
        }
        Ok(spans)
    }
}

/// Builds the query-side chain from long-lived collaborators
pub struct ProcessorFactory {
    benefit: Arc<dyn BenefitService>,
    signer: Arc<dyn FileUrlSigner>,
    platform_cfg: Arc<HashMap<String, TransCfgList>>,
}

impl ProcessorFactory {
    pub fn new(
        benefit: Arc<dyn BenefitService>,
        signer: Arc<dyn FileUrlSigner>,
        platform_cfg: Arc<HashMap<String, TransCfgList>>,
    ) -> Self {
        Self {
            benefit,
            signer,
            platform_cfg,
        }
    }

    pub fn query_chain(&self) -> ProcessorChain {
        ProcessorChain::new(vec![
            Arc::new(WorkspaceProcessor),
            Arc::new(RetentionProcessor::new(Arc::clone(&self.benefit))),
            Arc::new(RedactProcessor::new(Arc::clone(&self.platform_cfg))),
            Arc::new(SigningProcessor::new(Arc::clone(&self.signer))),
        ])
    }
}
