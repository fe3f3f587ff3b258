//! Span transformation pipeline
//!
//! Applies a platform's redaction policy to a span list in three steps:
//! drop spans no config selects, re-parent survivors onto their nearest
//! surviving ancestor, then redact each survivor with every config that
//! selected it, in list order.
//!
//! The result depends only on the set of input spans, not their order.

mod redact;
mod redirect;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::filter::FilterFields;
use crate::domain::span::Span;

pub use redact::{JsonKeyFilter, TagFilter};
pub use redirect::MAX_REDIRECT_HOPS;

use redact::redact_payload;
use redirect::ParentResolver;

/// One redaction rule; a missing `span_filter` selects every span
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_filter: Option<FilterFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_filter: Option<TagFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_filter: Option<JsonKeyFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_filter: Option<JsonKeyFilter>,
}

impl TransConfig {
    pub fn selects(&self, span: &Span) -> bool {
        self.span_filter
            .as_ref()
            .is_none_or(|filter| filter.matches(span))
    }

    fn redact(&self, span: &mut Span) {
        if let Some(tags) = &self.tag_filter {
            tags.apply(span);
        }
        if let Some(filter) = &self.input_filter {
            redact_payload(filter, &mut span.input, "input", &span.span_id);
        }
        if let Some(filter) = &self.output_filter {
            redact_payload(filter, &mut span.output, "output", &span.span_id);
        }
    }
}

/// Ordered redaction policy of a platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransCfgList(pub Vec<TransConfig>);

impl TransCfgList {
    pub fn new(configs: Vec<TransConfig>) -> Self {
        Self(configs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn configs(&self) -> &[TransConfig] {
        &self.0
    }

    /// Span filters of every config, in list order
    pub fn span_filters(&self) -> impl Iterator<Item = &FilterFields> {
        self.0.iter().filter_map(|c| c.span_filter.as_ref())
    }

    /// Run the pipeline; survivors keep their input order
    pub fn transform(&self, spans: Vec<Span>) -> Vec<Span> {
        if self.0.is_empty() {
            return spans;
        }

        let input_len = spans.len();
        let mut redirect: HashMap<String, String> = HashMap::new();
        let mut survivors: Vec<(Span, Vec<usize>)> = Vec::with_capacity(input_len);

        // Selection is decided on the spans as received, before any parent
        // rewrite, so configs filtering on parent_id see producer values
        for span in spans {
            let selected: Vec<usize> = self
                .0
                .iter()
                .enumerate()
                .filter(|(_, config)| config.selects(&span))
                .map(|(idx, _)| idx)
                .collect();
            if selected.is_empty() {
                redirect.insert(span.span_id.clone(), span.parent_id.clone());
            } else {
                survivors.push((span, selected));
            }
        }

        let mut resolver = ParentResolver::new(&redirect);
        let output: Vec<Span> = survivors
            .into_iter()
            .map(|(mut span, selected)| {
                if !redirect.is_empty() {
                    span.parent_id = resolver.resolve(&span.parent_id);
                }
                for idx in selected {
                    self.0[idx].redact(&mut span);
                }
                span
            })
            .collect();

        tracing::debug!(
            input = input_len,
            kept = output.len(),
            "Transformed spans"
        );
        output
    }
}
