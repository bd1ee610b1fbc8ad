//! Upload handler: pushes an attachment's local variants to one backend.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use attache_core::{ObjectStore, RecordKey, Result, SyncTarget};
use attache_storage::{Storage, WriteOutcome};

use crate::handler::{JobContext, JobHandler, JobResult};

/// What a single upload run ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The record was deleted before the job ran.
    RecordMissing,
    /// Variants uploaded (or already synced); `deleted` local files purged.
    Synced { outcome: WriteOutcome, deleted: usize },
    /// A local file vanished because the record was deleted mid-upload.
    FileVanished { file_name: Option<String> },
}

/// Uploads attachments to the backend of its `ObjectStore`.
///
/// One type serves every target; register one instance per configured store.
pub struct UploadHandler {
    storage: Storage,
    store: Arc<dyn ObjectStore>,
}

impl UploadHandler {
    pub fn new(storage: Storage, store: Arc<dyn ObjectStore>) -> Self {
        Self { storage, store }
    }

    /// Upload the attachment of `key` and purge local copies once every
    /// backend holds them.
    pub async fn perform(&self, key: &RecordKey) -> Result<UploadOutcome> {
        let repo = self.storage.repository();
        let Some(record) = repo.load(key).await? else {
            debug!(
                subsystem = "jobs",
                component = "upload",
                record_type = %key.record_type,
                record_id = key.id,
                sync_target = %self.store.target(),
                "Record no longer exists, nothing to upload"
            );
            return Ok(UploadOutcome::RecordMissing);
        };

        let mut attachment = self.storage.attachment_for(key.clone(), record)?;
        let uploaded = match attachment.write_to(self.store.as_ref()).await {
            Ok(outcome) => attachment
                .delete_local_files()
                .await
                .map(|deleted| UploadOutcome::Synced { outcome, deleted }),
            Err(e) => Err(e),
        };

        match uploaded {
            Err(e) if e.is_vanished_file() => {
                // Only benign when the record went away with its files.
                if repo.exists(key).await? {
                    return Err(e);
                }
                let file_name = e.vanished_file_name();
                warn!(
                    subsystem = "jobs",
                    component = "upload",
                    record_type = %key.record_type,
                    record_id = key.id,
                    sync_target = %self.store.target(),
                    file_name = file_name.as_deref().unwrap_or("(unknown)"),
                    "File vanished during upload of a deleted record"
                );
                Ok(UploadOutcome::FileVanished { file_name })
            }
            other => other,
        }
    }
}

#[async_trait]
impl JobHandler for UploadHandler {
    fn target(&self) -> SyncTarget {
        self.store.target()
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let key = ctx.record_key();

        match self.perform(&key).await {
            Ok(outcome) => {
                info!(
                    subsystem = "jobs",
                    component = "upload",
                    job_id = %ctx.job_id(),
                    record_type = %key.record_type,
                    record_id = key.id,
                    attachment = %key.attachment,
                    sync_target = %self.target(),
                    ?outcome,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Upload job finished"
                );
                JobResult::Success
            }
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
