//! Object storage URL signing
//!
//! Span payloads too large for the row (and multimodal attachments) live in
//! object storage; the row only keeps their keys. Readers get time-limited
//! URLs for those keys through a [`FileUrlSigner`].
//!
//! - `s3` - presigned GET URLs through `aws-sdk-s3`
//! - [`NoopUrlSigner`] - used when no object storage is configured

pub mod error;
pub mod s3;

use std::collections::HashMap;

use async_trait::async_trait;

pub use error::SignerError;
pub use s3::S3UrlSigner;

#[async_trait]
pub trait FileUrlSigner: Send + Sync {
    /// Sign every key in one batch, returning `key -> url`
    ///
    /// Keys that cannot be signed are left out of the map.
    async fn sign_urls(
        &self,
        workspace_id: &str,
        keys: &[String],
    ) -> Result<HashMap<String, String>, SignerError>;

    fn signer_name(&self) -> &'static str;
}

/// Signer that never produces URLs
#[derive(Debug, Default, Clone)]
pub struct NoopUrlSigner;

#[async_trait]
impl FileUrlSigner for NoopUrlSigner {
    async fn sign_urls(
        &self,
        _workspace_id: &str,
        _keys: &[String],
    ) -> Result<HashMap<String, String>, SignerError> {
        Ok(HashMap::new())
    }

    fn signer_name(&self) -> &'static str {
        "noop"
    }
}

/// Expand `{workspace_id}` and `{key}` in an object key template
pub fn render_object_key(template: &str, workspace_id: &str, key: &str) -> String {
    if template.is_empty() {
        return key.to_string();
    }
    template
        .replace("{workspace_id}", workspace_id)
        .replace("{key}", key.trim_start_matches('/'))
}
