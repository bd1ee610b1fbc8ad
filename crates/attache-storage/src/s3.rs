//! S3 object store.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use attache_core::{io_error_at, Error, ObjectMeta, ObjectStore, Result, S3Config, SyncTarget};

/// Uploads variants to an S3 bucket (or an S3-compatible service).
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from configuration.
    ///
    /// Static credentials are used when both keys are set, otherwise the
    /// default AWS credential chain applies.
    pub async fn from_config(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials =
                Credentials::new(access_key_id, secret_access_key, None, None, "attache");
            loader = loader.credentials_provider(credentials);
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(
            subsystem = "storage",
            component = "s3",
            bucket = %config.bucket,
            region = %config.region,
            custom_endpoint = config.endpoint.is_some(),
            "S3 object store configured"
        );

        Self::new(Client::from_conf(builder.build()), config.bucket.clone())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn target(&self) -> SyncTarget {
        SyncTarget::S3
    }

    async fn put_file(&self, key: &str, path: &Path, meta: &ObjectMeta) -> Result<()> {
        let start = Instant::now();

        // Surface a vanished file as I/O NotFound rather than an SDK error.
        tokio::fs::metadata(path)
            .await
            .map_err(|e| io_error_at(e, path))?;
        let body = ByteStream::from_path(path).await.map_err(|e| {
            Error::RemoteTransport(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .cache_control(&meta.cache_control)
            .expires(DateTime::from_secs(meta.expires.timestamp()));
        if let Some(content_type) = &meta.content_type {
            request = request.content_type(content_type);
        }
        if meta.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request.send().await.map_err(|e| {
            Error::RemoteTransport(format!(
                "S3 upload of {} to {} failed: {}",
                key,
                self.bucket,
                aws_sdk_s3::error::DisplayErrorContext(&e)
            ))
        })?;

        debug!(
            subsystem = "storage",
            component = "s3",
            op = "put_file",
            object_key = key,
            duration_ms = start.elapsed().as_millis() as u64,
            "Uploaded object"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3ObjectStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        S3ObjectStore::new(Client::from_conf(config), "assets")
    }

    #[tokio::test]
    async fn test_missing_file_is_vanished_error() {
        let meta = ObjectMeta::long_lived(Some("image/png".into()));
        let err = store()
            .put_file("images/1/a.png", Path::new("/nonexistent/attache/a.png"), &meta)
            .await
            .unwrap_err();
        assert!(err.is_vanished_file());
    }

    #[test]
    fn test_target_and_bucket() {
        let store = store();
        assert_eq!(store.target(), SyncTarget::S3);
        assert_eq!(store.bucket(), "assets");
    }
}
