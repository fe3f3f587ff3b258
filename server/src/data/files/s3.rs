//! S3 URL signer
//!
//! Works with AWS S3 and S3-compatible services (MinIO, TOS) through a custom
//! endpoint. With `format` set, URLs are rendered from it instead of being
//! presigned, for buckets fronted by a public CDN.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;

use super::error::SignerError;
use super::{FileUrlSigner, render_object_key};
use crate::core::config::TosConfig;

#[derive(Debug, Clone)]
pub struct S3UrlSigner {
    client: Client,
    bucket: String,
    template: String,
    format: Option<String>,
    ttl: Duration,
}

impl S3UrlSigner {
    pub async fn new(config: &TosConfig) -> Result<Self, SignerError> {
        if config.bucket.is_empty() {
            return Err(SignerError::Config("bucket is required".to_string()));
        }
        if config.ttl_s == 0 {
            return Err(SignerError::Config("ttl_s must be positive".to_string()));
        }

        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            config_loader = config_loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }
        let sdk_config = config_loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint_url) = &config.endpoint {
            // Path-style addressing is required by most S3-compatible services
            s3_config = s3_config
                .endpoint_url(endpoint_url.clone())
                .force_path_style(true);
        }
        let client = Client::from_conf(s3_config.build());

        tracing::debug!(
            bucket = %config.bucket,
            ttl_s = config.ttl_s,
            presign = config.format.is_none(),
            "S3 URL signer initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            template: config.template.clone(),
            format: config.format.clone(),
            ttl: Duration::from_secs(config.ttl_s),
        })
    }

    async fn presign(&self, object_key: &str) -> Result<String, SignerError> {
        let presign_config =
            PresigningConfig::expires_in(self.ttl).map_err(|e| SignerError::Presign {
                key: object_key.to_string(),
                message: e.to_string(),
            })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_key)
            .presigned(presign_config)
            .await
            .map_err(|e| SignerError::Presign {
                key: object_key.to_string(),
                message: e.to_string(),
            })?;

        Ok(request.uri().to_string())
    }
}

/// Render a public URL from a `{bucket}` / `{key}` format string
fn format_url(format: &str, bucket: &str, object_key: &str) -> String {
    format
        .replace("{bucket}", bucket)
        .replace("{key}", object_key)
}

#[async_trait]
impl FileUrlSigner for S3UrlSigner {
    async fn sign_urls(
        &self,
        workspace_id: &str,
        keys: &[String],
    ) -> Result<HashMap<String, String>, SignerError> {
        let mut urls = HashMap::with_capacity(keys.len());
        for key in keys {
            if key.is_empty() || urls.contains_key(key) {
                continue;
            }
            let object_key = render_object_key(&self.template, workspace_id, key);
            let url = match &self.format {
                Some(format) => format_url(format, &self.bucket, &object_key),
                None => self.presign(&object_key).await?,
            };
            urls.insert(key.clone(), url);
        }
        Ok(urls)
    }

    fn signer_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tos_config() -> TosConfig {
        TosConfig {
            bucket: "traces".to_string(),
            region: Some("us-east-1".to_string()),
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            template: "{workspace_id}/{key}".to_string(),
            format: None,
            ttl_s: 600,
        }
    }

    #[test]
    fn test_format_url() {
        assert_eq!(
            format_url("https://cdn.example.com/{bucket}/{key}", "traces", "ws/a.json"),
            "https://cdn.example.com/traces/ws/a.json"
        );
    }

    #[tokio::test]
    async fn test_rejects_missing_bucket() {
        let mut config = tos_config();
        config.bucket.clear();
        assert!(matches!(
            S3UrlSigner::new(&config).await,
            Err(SignerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_format_urls_skip_presign() {
        let mut config = tos_config();
        config.format = Some("https://cdn.example.com/{key}".to_string());
        let signer = S3UrlSigner::new(&config).await.unwrap();

        let keys = vec!["in.json".to_string(), String::new(), "in.json".to_string()];
        let urls = signer.sign_urls("ws1", &keys).await.unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls["in.json"], "https://cdn.example.com/ws1/in.json");
    }
}
