use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Settings, SpanProcessor};
use crate::data::files::FileUrlSigner;
use crate::domain::error::TraceResult;
use crate::domain::span::{AttrTos, Span};

/// Offloaded payload locations carried in `Span::object_storage`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStorage {
    pub input_tos_key: String,
    pub output_tos_key: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub field: String,
    pub tos_key: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl ObjectStorage {
    fn keys(&self) -> impl Iterator<Item = &String> {
        [&self.input_tos_key, &self.output_tos_key]
            .into_iter()
            .chain(self.attachments.iter().map(|a| &a.tos_key))
            .filter(|k| !k.is_empty())
    }

    fn attr_tos(&self, urls: &HashMap<String, String>) -> AttrTos {
        let url = |key: &str| urls.get(key).cloned().unwrap_or_default();
        AttrTos {
            input_data_url: url(&self.input_tos_key),
            output_data_url: url(&self.output_tos_key),
            multimodal_data: self
                .attachments
                .iter()
                .filter(|a| !a.tos_key.is_empty())
                .map(|a| (a.tos_key.clone(), url(&a.tos_key)))
                .collect(),
        }
    }
}

/// Attaches presigned URLs for every span with offloaded data
///
/// All keys of a result are signed in one batch. A failed batch still
/// attaches `attr_tos`, with blank URLs.
pub struct SigningProcessor {
    signer: Arc<dyn FileUrlSigner>,
}

impl SigningProcessor {
    pub fn new(signer: Arc<dyn FileUrlSigner>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl SpanProcessor for SigningProcessor {
    fn name(&self) -> &'static str {
        "signing"
    }

    async fn transform(&self, mut spans: Vec<Span>, settings: &Settings) -> TraceResult<Vec<Span>> {
        let storages: Vec<Option<ObjectStorage>> = spans
            .iter()
            .map(|span| {
                if span.object_storage.is_empty() {
                    return None;
                }
                serde_json::from_str(&span.object_storage)
                    .inspect_err(|e| {
                        tracing::debug!(span_id = %span.span_id, error = %e, "Unreadable object_storage");
                    })
                    .ok()
            })
            .collect();

        let mut keys: Vec<String> = storages
            .iter()
            .flatten()
            .flat_map(|s| s.keys())
            .cloned()
            .collect();
        if keys.is_empty() {
            return Ok(spans);
        }
        keys.sort();
        keys.dedup();

        let urls = match self.signer.sign_urls(&settings.workspace_id, &keys).await {
            Ok(urls) => urls,
            Err(e) => {
                tracing::warn!(
                    workspace_id = %settings.workspace_id,
                    signer = self.signer.signer_name(),
                    keys = keys.len(),
                    error = %e,
                    "Signing attachment URLs failed"
                );
                HashMap::new()
            }
        };

        for (span, storage) in spans.iter_mut().zip(storages) {
            if let Some(storage) = storage {
                span.attr_tos = Some(storage.attr_tos(&urls));
            }
        }
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::domain::platform::PlatformType;

    fn offloaded(id: &str) -> Span {
        let mut s = span(id, "0", "ws1");
        s.object_storage = serde_json::json!({
            "input_tos_key": format!("{id}/in"),
            "output_tos_key": "",
            "attachments": [{"field": "input", "tos_key": format!("{id}/img.png"), "type": "image"}]
        })
        .to_string();
        s
    }

    #[tokio::test]
    async fn test_urls_attached() {
        let processor = SigningProcessor::new(Arc::new(FakeSigner { fail: false }));
        let out = processor
            .transform(
                vec![offloaded("a"), span("b", "a", "ws1")],
                &settings(PlatformType::Cozeloop),
            )
            .await
            .unwrap();

        let tos = out[0].attr_tos.as_ref().unwrap();
        assert_eq!(tos.input_data_url, "https://signed/ws1/a/in");
        assert_eq!(tos.output_data_url, "");
        assert_eq!(
            tos.multimodal_data["a/img.png"],
            "https://signed/ws1/a/img.png"
        );
        assert!(out[1].attr_tos.is_none());
    }

    #[tokio::test]
    async fn test_signer_failure_degrades_to_blank_urls() {
        let processor = SigningProcessor::new(Arc::new(FakeSigner { fail: true }));
        let out = processor
            .transform(vec![offloaded("a")], &settings(PlatformType::Cozeloop))
            .await
            .unwrap();

        let tos = out[0].attr_tos.as_ref().unwrap();
        assert_eq!(tos.input_data_url, "");
        assert_eq!(tos.multimodal_data["a/img.png"], "");
    }

    #[tokio::test]
    async fn test_unreadable_object_storage_skipped() {
        let mut s = span("a", "0", "ws1");
        s.object_storage = "not json".into();
        let processor = SigningProcessor::new(Arc::new(FakeSigner { fail: false }));
        let out = processor
            .transform(vec![s], &settings(PlatformType::Cozeloop))
            .await
            .unwrap();
        assert!(out[0].attr_tos.is_none());
    }
}
