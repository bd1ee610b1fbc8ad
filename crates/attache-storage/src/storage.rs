//! Shared storage handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use attache_core::defaults::HTTP_TIMEOUT_SECS;
use attache_core::{
    AttachmentDefinition, AttachmentRecord, AttachmentRepository, Error, JobQueue, RecordKey,
    Result, StorageConfig, SyncTarget, Template,
};

use crate::attachment::Attachment;

/// Attachment definition with its templates compiled.
#[derive(Debug)]
pub(crate) struct AttachmentSpec {
    pub definition: AttachmentDefinition,
    pub filesystem_path: Template,
    pub filesystem_url: Template,
    pub remote_path: Template,
    pub remote_url: Option<Template>,
    pub processing_url: Option<Template>,
}

impl AttachmentSpec {
    fn compile(definition: &AttachmentDefinition, remote_url: Option<&str>) -> Self {
        Self {
            filesystem_path: Template::compile(&definition.filesystem_path),
            filesystem_url: Template::compile(&definition.filesystem_url),
            remote_path: Template::compile(&definition.remote_path),
            remote_url: remote_url.map(Template::compile),
            processing_url: definition.processing_url.as_deref().map(Template::compile),
            definition: definition.clone(),
        }
    }
}

struct StorageInner {
    config: StorageConfig,
    repo: Arc<dyn AttachmentRepository>,
    queue: Arc<dyn JobQueue>,
    http: Client,
    specs: HashMap<(String, String), Arc<AttachmentSpec>>,
}

/// Entry point for attachment operations.
///
/// Cheap to clone; holds the configuration and the collaborators every
/// [`Attachment`] needs.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    pub fn new(
        config: StorageConfig,
        repo: Arc<dyn AttachmentRepository>,
        queue: Arc<dyn JobQueue>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_http_client(config, repo, queue, http))
    }

    pub fn with_http_client(
        config: StorageConfig,
        repo: Arc<dyn AttachmentRepository>,
        queue: Arc<dyn JobQueue>,
        http: Client,
    ) -> Self {
        let remote_url = config.s3.as_ref().and_then(|s3| s3.url.as_deref());
        let specs = config
            .attachments
            .iter()
            .map(|def| {
                (
                    (def.record_type.clone(), def.name.clone()),
                    Arc::new(AttachmentSpec::compile(def, remote_url)),
                )
            })
            .collect::<HashMap<_, _>>();

        debug!(
            subsystem = "storage",
            component = "storage",
            attachments = specs.len(),
            targets = ?config.sync_targets(),
            "Storage initialized"
        );

        Self {
            inner: Arc::new(StorageInner {
                config,
                repo,
                queue,
                http,
                specs,
            }),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn repository(&self) -> &Arc<dyn AttachmentRepository> {
        &self.inner.repo
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.inner.queue
    }

    pub(crate) fn http(&self) -> &Client {
        &self.inner.http
    }

    /// Remote backends uploads are queued for.
    pub fn sync_targets(&self) -> Vec<SyncTarget> {
        self.inner.config.sync_targets()
    }

    fn spec(&self, key: &RecordKey) -> Result<Arc<AttachmentSpec>> {
        self.inner
            .specs
            .get(&(key.record_type.clone(), key.attachment.clone()))
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!(
                    "no attachment {} defined on {}",
                    key.attachment, key.record_type
                ))
            })
    }

    /// Load the attachment of an existing record.
    ///
    /// A record that does not exist yet starts with empty columns.
    pub async fn attachment(&self, key: RecordKey) -> Result<Attachment> {
        let spec = self.spec(&key)?;
        let record = self
            .inner
            .repo
            .load(&key)
            .await?
            .unwrap_or_else(|| AttachmentRecord::new(key.id));
        Ok(Attachment::new(self.clone(), spec, key, record))
    }

    /// Wrap columns the caller already holds, without a database read.
    pub fn attachment_for(&self, key: RecordKey, record: AttachmentRecord) -> Result<Attachment> {
        let spec = self.spec(&key)?;
        Ok(Attachment::new(self.clone(), spec, key, record))
    }
}
