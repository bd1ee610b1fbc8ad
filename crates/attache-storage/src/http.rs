//! Generic object store over a GCS-style XML API.
//!
//! Objects are written with `PUT {endpoint}/{directory}/{key}`; visibility is
//! requested with the `x-goog-acl` header.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES};
use reqwest::Client;
use tracing::debug;

use attache_core::defaults::HTTP_TIMEOUT_SECS;
use attache_core::{io_error_at, Error, FogConfig, ObjectMeta, ObjectStore, Result, SyncTarget};

/// Uploads variants with plain HTTP PUT requests.
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    directory: String,
    access_token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(config: &FogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &FogConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            directory: config.directory.trim_matches('/').to_string(),
            access_token: config.access_token.clone(),
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.directory, key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn target(&self) -> SyncTarget {
        SyncTarget::Fog
    }

    async fn put_file(&self, key: &str, path: &Path, meta: &ObjectMeta) -> Result<()> {
        let start = Instant::now();
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| io_error_at(e, path))?;
        let size = body.len();

        let mut request = self
            .client
            .put(self.object_url(key))
            .header(CACHE_CONTROL, &meta.cache_control)
            .header(EXPIRES, meta.expires_http_date())
            .body(body);
        if let Some(content_type) = &meta.content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if meta.public_read {
            request = request.header("x-goog-acl", "public-read");
        }
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::RemoteTransport(format!("PUT {} failed: {}", key, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::RemoteTransport(format!(
                "PUT {} returned {}: {}",
                key,
                status,
                text.trim()
            )));
        }

        debug!(
            subsystem = "storage",
            component = "http_store",
            op = "put_file",
            object_key = key,
            size,
            duration_ms = start.elapsed().as_millis() as u64,
            "Uploaded object"
        );
        Ok(())
    }
}
