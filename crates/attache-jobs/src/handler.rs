//! Job handler contract.

use async_trait::async_trait;
use uuid::Uuid;

use attache_core::{Job, RecordKey, SyncTarget, UploadJob};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn upload(&self) -> &UploadJob {
        &self.job.upload
    }

    /// The record whose attachment should be uploaded.
    pub fn record_key(&self) -> RecordKey {
        self.job.upload.record_key()
    }

    /// Number of earlier failed attempts.
    pub fn attempt(&self) -> i32 {
        self.job.retry_count
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed; nothing left to do for this record and target.
    Success,
    /// Job failed with an error message. The queue's retry budget decides
    /// whether another attempt runs.
    Failed(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The remote backend this handler uploads to.
    fn target(&self) -> SyncTarget;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process jobs for the given target.
    fn can_handle(&self, target: SyncTarget) -> bool {
        self.target() == target
    }
}
