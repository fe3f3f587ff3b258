//! Per-platform query predicates
//!
//! Each producer platform scopes span queries to its own traffic. The
//! factory resolves a platform name to the predicate builder used by the
//! query service.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::error::{TraceError, TraceResult};
use crate::domain::filter::{FieldType, FilterField, FilterFields, QueryType};
use crate::domain::span::{ROOT_PARENT_ID, fields};
use crate::domain::transform::TransCfgList;

/// Span type of model invocations
pub const LLM_SPAN_TYPE: &str = "model";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformType {
    Cozeloop,
    Prompt,
    Evaluator,
    EvaluationTarget,
}

impl PlatformType {
    pub const ALL: [PlatformType; 4] = [
        Self::Cozeloop,
        Self::Prompt,
        Self::Evaluator,
        Self::EvaluationTarget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cozeloop => "cozeloop",
            Self::Prompt => "prompt",
            Self::Evaluator => "evaluator",
            Self::EvaluationTarget => "evaluation_target",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// Call types a platform's spans are produced with; empty means any
    pub fn call_types(&self) -> &'static [&'static str] {
        match self {
            Self::Cozeloop => &[],
            Self::Prompt => &["PromptPlayground", "PromptDebug"],
            Self::Evaluator => &["Evaluator"],
            Self::EvaluationTarget => &["EvalTarget"],
        }
    }
}

impl std::fmt::Display for PlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which slice of a platform's spans a list query targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanListType {
    #[default]
    RootSpan,
    AllSpan,
    LlmSpan,
}

impl SpanListType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RootSpan => "root_span",
            Self::AllSpan => "all_span",
            Self::LlmSpan => "llm_span",
        }
    }
}

/// Query environment the predicates are built for
#[derive(Debug, Clone, Default)]
pub struct SpanEnv {
    pub workspace_id: String,
}

pub trait PlatformFilter: Send + Sync {
    fn platform(&self) -> PlatformType;

    fn build_basic_span_filter(&self, env: &SpanEnv) -> Vec<FilterField> {
        let mut filters = vec![FilterField::new(
            fields::WORKSPACE_ID,
            FieldType::String,
            QueryType::In,
            [env.workspace_id.as_str()],
        )];
        let call_types = self.platform().call_types();
        if !call_types.is_empty() {
            filters.push(FilterField::new(
                fields::CALL_TYPE,
                FieldType::String,
                QueryType::In,
                call_types.iter().copied(),
            ));
        }
        filters
    }

    fn build_root_span_filter(&self, _env: &SpanEnv) -> Vec<FilterField> {
        vec![FilterField::new(
            fields::PARENT_ID,
            FieldType::String,
            QueryType::In,
            [ROOT_PARENT_ID, ""],
        )]
    }

    fn build_llm_span_filter(&self, _env: &SpanEnv) -> Vec<FilterField> {
        vec![FilterField::new(
            fields::SPAN_TYPE,
            FieldType::String,
            QueryType::In,
            [LLM_SPAN_TYPE],
        )]
    }

    fn build_all_span_filter(&self, _env: &SpanEnv) -> Vec<FilterField> {
        Vec::new()
    }

    /// Basic scope ANDed with the fragment for `list_type`
    fn build_list_filter(&self, env: &SpanEnv, list_type: SpanListType) -> FilterFields {
        let mut filters = self.build_basic_span_filter(env);
        filters.extend(match list_type {
            SpanListType::RootSpan => self.build_root_span_filter(env),
            SpanListType::LlmSpan => self.build_llm_span_filter(env),
            SpanListType::AllSpan => self.build_all_span_filter(env),
        });
        FilterFields::and(filters)
    }
}

/// Workspace and call type scope only
struct ScopedPlatformFilter {
    platform: PlatformType,
}

impl PlatformFilter for ScopedPlatformFilter {
    fn platform(&self) -> PlatformType {
        self.platform
    }
}

/// Mirrors ingestion-side redaction selection on the query side
struct PromptPlatformFilter {
    span_filters: Vec<FilterFields>,
}

impl PlatformFilter for PromptPlatformFilter {
    fn platform(&self) -> PlatformType {
        PlatformType::Prompt
    }

    fn build_all_span_filter(&self, _env: &SpanEnv) -> Vec<FilterField> {
        if self.span_filters.is_empty() {
            return Vec::new();
        }
        let any_selected = self
            .span_filters
            .iter()
            .cloned()
            .map(FilterField::wrap)
            .collect();
        vec![FilterField::wrap(FilterFields::or(any_selected))]
    }
}

pub struct PlatformFilterFactory {
    filters: HashMap<PlatformType, Arc<dyn PlatformFilter>>,
}

impl PlatformFilterFactory {
    /// `platform_cfg` is the per-platform redaction policy
    pub fn new(platform_cfg: &HashMap<String, TransCfgList>) -> Self {
        let mut filters: HashMap<PlatformType, Arc<dyn PlatformFilter>> = HashMap::new();
        for platform in PlatformType::ALL {
            let filter: Arc<dyn PlatformFilter> = match platform {
                PlatformType::Prompt => Arc::new(PromptPlatformFilter {
                    span_filters: platform_cfg
                        .get(platform.as_str())
                        .map(|cfg| cfg.span_filters().cloned().collect())
                        .unwrap_or_default(),
                }),
                _ => Arc::new(ScopedPlatformFilter { platform }),
            };
            filters.insert(platform, filter);
        }
        Self { filters }
    }

    pub fn get(&self, platform: &str) -> TraceResult<Arc<dyn PlatformFilter>> {
        PlatformType::parse(platform)
            .and_then(|p| self.filters.get(&p))
            .cloned()
            .ok_or_else(|| TraceError::PlatformNotConfigured(platform.to_string()))
    }
}
