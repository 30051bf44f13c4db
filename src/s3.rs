//! Client for the bucket holding uploaded application documents.

use std::fmt;

use anyhow::Result;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client as S3Client,
};
use tracing::{info, warn};

use crate::config::AppConfig;

/// Where and how to reach the document bucket.
#[derive(Clone, PartialEq, Eq)]
pub struct BucketSettings {
    pub region: String,
    pub endpoint: Option<String>,
    pub static_credentials: Option<(String, String)>,
    /// Custom endpoints (MinIO and the like) only resolve path-style keys.
    pub path_style: bool,
}

impl BucketSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::resolve(
            &config.aws_region,
            config.aws_endpoint_url.as_deref(),
            config.aws_access_key_id.as_deref(),
            config.aws_secret_access_key.as_deref(),
        )
    }

    fn resolve(
        region: &str,
        endpoint: Option<&str>,
        access_key: Option<&str>,
        secret_key: Option<&str>,
    ) -> Self {
        let non_blank = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let endpoint = non_blank(endpoint);
        let static_credentials = match (non_blank(access_key), non_blank(secret_key)) {
            (Some(key), Some(secret)) => Some((key, secret)),
            (None, None) => None,
            _ => {
                warn!("only half of the static S3 credentials are set; using the default chain");
                None
            }
        };
        Self {
            region: region.to_string(),
            path_style: endpoint.is_some(),
            endpoint,
            static_credentials,
        }
    }
}

impl fmt::Debug for BucketSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketSettings")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field(
                "access_key",
                &self.static_credentials.as_ref().map(|(key, _)| key),
            )
            .field("path_style", &self.path_style)
            .finish()
    }
}

pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let settings = BucketSettings::from_config(config);
    info!(
        bucket = %config.s3_bucket,
        region = %settings.region,
        endpoint = ?settings.endpoint,
        static_credentials = settings.static_credentials.is_some(),
        "configuring document bucket client"
    );

    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(settings.region.clone()));
    if let Some(endpoint) = &settings.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some((access_key, secret_key)) = settings.static_credentials.clone() {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "jobboard-env",
        ));
    }

    let shared = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&shared)
        .force_path_style(settings.path_style)
        .build();
    Ok(S3Client::from_conf(s3_config))
}

#[cfg(test)]
mod tests {
    use super::BucketSettings;

    #[test]
    fn custom_endpoint_switches_to_path_style() {
        let settings = BucketSettings::resolve(
            "eu-west-1",
            Some("http://minio:9000"),
            Some("minio"),
            Some("minio-secret"),
        );
        assert_eq!(settings.endpoint.as_deref(), Some("http://minio:9000"));
        assert!(settings.path_style);
        assert_eq!(
            settings.static_credentials,
            Some(("minio".to_string(), "minio-secret".to_string()))
        );
    }

    #[test]
    fn plain_aws_uses_default_chain_and_virtual_hosts() {
        let settings = BucketSettings::resolve("us-east-1", Some("  "), None, None);
        assert_eq!(settings.endpoint, None);
        assert!(!settings.path_style);
        assert_eq!(settings.static_credentials, None);
    }

    #[test]
    fn half_configured_credentials_are_ignored() {
        let settings = BucketSettings::resolve("us-east-1", None, Some("key"), None);
        assert_eq!(settings.static_credentials, None);
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let settings = BucketSettings::resolve("us-east-1", None, Some("key"), Some("hunter2"));
        let rendered = format!("{settings:?}");
        assert!(rendered.contains("key"));
        assert!(!rendered.contains("hunter2"));
    }
}
