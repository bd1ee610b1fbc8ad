//! Collaborator traits.
//!
//! The attachment state machine and the upload worker only talk to the host
//! database, the image tool, the job queue, and remote storage through these
//! traits. Concrete implementations live in `attache-db`, `attache-imaging`
//! and `attache-storage`; in-memory fakes are behind the `mock` feature.

use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{AttachmentRecord, Job, ObjectMeta, RecordKey, Result, SyncTarget, UploadJob};

// =============================================================================
// RECORD REPOSITORY
// =============================================================================

/// Typed access to the attachment columns of host records.
#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    /// Read the attachment columns, `None` when the record no longer exists.
    async fn load(&self, key: &RecordKey) -> Result<Option<AttachmentRecord>>;

    /// Whether the record still exists.
    async fn exists(&self, key: &RecordKey) -> Result<bool>;

    /// Persist file name, content type, size and updated_at.
    async fn save_file_columns(&self, key: &RecordKey, record: &AttachmentRecord) -> Result<()>;

    /// Conditional single-row update of one sync flag, keyed by record id.
    ///
    /// Returns the number of rows affected; 0 means the record was deleted.
    async fn set_synced(&self, key: &RecordKey, target: SyncTarget, synced: bool) -> Result<u64>;

    /// Bump the record's update timestamp.
    async fn touch(&self, key: &RecordKey) -> Result<()>;
}

// =============================================================================
// SUBPROCESS
// =============================================================================

/// Runs an external program and captures its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`.
    ///
    /// Fails with `Error::CommandLine` on spawn failure, timeout or non-zero
    /// exit.
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Persistent queue of upload jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue a new upload job.
    async fn enqueue(&self, upload: &UploadJob) -> Result<Uuid>;

    /// Claim the next pending job whose target is in `targets`.
    /// An empty slice claims any target.
    async fn claim_next(&self, targets: &[SyncTarget]) -> Result<Option<Job>>;

    /// Mark a job completed.
    async fn complete(&self, job_id: Uuid) -> Result<()>;

    /// Record a failure: back to pending while retries remain, else failed.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Number of pending jobs.
    async fn pending_count(&self) -> Result<i64>;
}

// =============================================================================
// REMOTE STORAGE
// =============================================================================

/// Remote object storage backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// The sync flag this store is responsible for.
    fn target(&self) -> SyncTarget;

    /// Upload the local file at `path` under `key`.
    ///
    /// A local file that vanished before or during the upload surfaces as
    /// `Error::Io` with `NotFound` so callers can tell it apart from
    /// transport failures.
    async fn put_file(&self, key: &str, path: &Path, meta: &ObjectMeta) -> Result<()>;
}
