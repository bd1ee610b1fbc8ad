//! In-memory collaborator fakes for deterministic testing.
//!
//! ## Usage
//!
//! ```rust
//! use attache_core::mock::{MockAttachmentRepository, MockObjectStore};
//! use attache_core::{AttachmentRecord, RecordKey, SyncTarget};
//!
//! let repo = MockAttachmentRepository::new();
//! repo.insert(&RecordKey::new("Image", "photo", 1), AttachmentRecord::new(1));
//! let store = MockObjectStore::new(SyncTarget::S3);
//! assert!(store.puts().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::defaults::JOB_MAX_RETRIES;
use crate::error::io_error_at;
use crate::traits::{AttachmentRepository, CommandRunner, JobQueue, ObjectStore};
use crate::{
    AttachmentRecord, Error, Job, JobStatus, ObjectMeta, RecordKey, Result, SyncTarget, UploadJob,
};

// =============================================================================
// REPOSITORY
// =============================================================================

/// Record store backed by a map.
#[derive(Clone, Default)]
pub struct MockAttachmentRepository {
    records: Arc<Mutex<HashMap<RecordKey, AttachmentRecord>>>,
    touches: Arc<Mutex<Vec<RecordKey>>>,
}

impl MockAttachmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &RecordKey, record: AttachmentRecord) {
        self.records.lock().unwrap().insert(key.clone(), record);
    }

    pub fn remove(&self, key: &RecordKey) -> Option<AttachmentRecord> {
        self.records.lock().unwrap().remove(key)
    }

    pub fn get(&self, key: &RecordKey) -> Option<AttachmentRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    /// Keys passed to `touch`, in call order.
    pub fn touches(&self) -> Vec<RecordKey> {
        self.touches.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttachmentRepository for MockAttachmentRepository {
    async fn load(&self, key: &RecordKey) -> Result<Option<AttachmentRecord>> {
        Ok(self.get(key))
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        Ok(self.records.lock().unwrap().contains_key(key))
    }

    async fn save_file_columns(&self, key: &RecordKey, record: &AttachmentRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let stored = records
            .entry(key.clone())
            .or_insert_with(|| AttachmentRecord::new(key.id));
        stored.file_name = record.file_name.clone();
        stored.content_type = record.content_type.clone();
        stored.file_size = record.file_size;
        stored.updated_at = record.updated_at;
        Ok(())
    }

    async fn set_synced(&self, key: &RecordKey, target: SyncTarget, synced: bool) -> Result<u64> {
        match self.records.lock().unwrap().get_mut(key) {
            Some(record) => {
                record.set_synced(target, synced);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn touch(&self, key: &RecordKey) -> Result<()> {
        if let Some(record) = self.records.lock().unwrap().get_mut(key) {
            record.updated_at = Some(Utc::now());
        }
        self.touches.lock().unwrap().push(key.clone());
        Ok(())
    }
}

// =============================================================================
// COMMAND RUNNER
// =============================================================================

/// A recorded command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
enum Canned {
    Output(String),
    Failure(String),
}

/// Command runner returning canned output per program.
///
/// Responses queued for a program are returned in order; the last one
/// repeats for every later call.
#[derive(Clone, Default)]
pub struct MockCommandRunner {
    responses: Arc<Mutex<HashMap<String, VecDeque<Canned>>>>,
    calls: Arc<Mutex<Vec<MockCommand>>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` for the next run of `program`.
    pub fn with_output(self, program: &str, output: impl Into<String>) -> Self {
        self.queue(program, Canned::Output(output.into()))
    }

    /// Queue a `Error::CommandLine(message)` failure for `program`.
    pub fn with_failure(self, program: &str, message: impl Into<String>) -> Self {
        self.queue(program, Canned::Failure(message.into()))
    }

    fn queue(self, program: &str, canned: Canned) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push_back(canned);
        self
    }

    pub fn calls(&self) -> Vec<MockCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> Option<MockCommand> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        self.calls.lock().unwrap().push(MockCommand {
            program: program.to_string(),
            args: args.to_vec(),
        });
        let canned = match self.responses.lock().unwrap().get_mut(program) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        match canned {
            Some(Canned::Output(out)) => Ok(out),
            Some(Canned::Failure(msg)) => Err(Error::CommandLine(msg)),
            None => Ok(String::new()),
        }
    }
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// A recorded upload.
#[derive(Debug, Clone)]
pub struct MockPut {
    pub key: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub meta: ObjectMeta,
}

type PutHook = Arc<dyn Fn(&str, &Path) + Send + Sync>;

/// Object store that reads the local file and records it.
#[derive(Clone)]
pub struct MockObjectStore {
    target: SyncTarget,
    puts: Arc<Mutex<Vec<MockPut>>>,
    failure: Option<String>,
    before_put: Option<PutHook>,
}

impl MockObjectStore {
    pub fn new(target: SyncTarget) -> Self {
        Self {
            target,
            puts: Arc::new(Mutex::new(Vec::new())),
            failure: None,
            before_put: None,
        }
    }

    /// Fail every upload with `Error::RemoteTransport(message)`.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Run `hook` before each upload reads its file.
    pub fn with_before_put<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &Path) + Send + Sync + 'static,
    {
        self.before_put = Some(Arc::new(hook));
        self
    }

    pub fn puts(&self) -> Vec<MockPut> {
        self.puts.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.puts.lock().unwrap().iter().map(|p| p.key.clone()).collect()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    fn target(&self) -> SyncTarget {
        self.target
    }

    async fn put_file(&self, key: &str, path: &Path, meta: &ObjectMeta) -> Result<()> {
        if let Some(hook) = &self.before_put {
            hook(key, path);
        }
        if let Some(msg) = &self.failure {
            return Err(Error::RemoteTransport(msg.clone()));
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| io_error_at(e, path))?;
        self.puts.lock().unwrap().push(MockPut {
            key: key.to_string(),
            path: path.to_path_buf(),
            bytes,
            meta: meta.clone(),
        });
        Ok(())
    }
}

// =============================================================================
// JOB QUEUE
// =============================================================================

/// FIFO job queue held in memory, with the same retry rules as the
/// database queue.
#[derive(Clone)]
pub struct MockJobQueue {
    jobs: Arc<Mutex<Vec<Job>>>,
    max_retries: i32,
}

impl Default for MockJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            max_retries: JOB_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Every job ever enqueued, oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    /// Upload payloads of every job, oldest first.
    pub fn uploads(&self) -> Vec<UploadJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|j| j.upload.clone())
            .collect()
    }

    fn update<F: FnOnce(&mut Job)>(&self, job_id: Uuid, f: F) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        f(job);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn enqueue(&self, upload: &UploadJob) -> Result<Uuid> {
        let job = Job::pending(upload.clone(), self.max_retries);
        let id = job.id;
        self.jobs.lock().unwrap().push(job);
        Ok(id)
    }

    async fn claim_next(&self, targets: &[SyncTarget]) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let next = jobs.iter_mut().find(|j| {
            j.status == JobStatus::Pending
                && (targets.is_empty() || targets.contains(&j.upload.target))
        });
        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        self.update(job_id, |job| {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
        })
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.update(job_id, |job| {
            job.error_message = Some(error.to_string());
            if job.retry_count < job.max_retries {
                job.retry_count += 1;
                job.status = JobStatus::Pending;
                job.started_at = None;
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
            }
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == job_id)
            .cloned())
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repository_set_synced_missing_record() {
        let repo = MockAttachmentRepository::new();
        let key = RecordKey::new("Image", "photo", 3);
        assert_eq!(repo.set_synced(&key, SyncTarget::S3, true).await.unwrap(), 0);

        repo.insert(&key, AttachmentRecord::new(3));
        assert_eq!(repo.set_synced(&key, SyncTarget::S3, true).await.unwrap(), 1);
        assert!(repo.get(&key).unwrap().synced_to_s3);
    }

    #[tokio::test]
    async fn test_command_runner_canned_responses() {
        let runner = MockCommandRunner::new()
            .with_output("identify", "10x20,")
            .with_failure("convert", "boom");

        assert_eq!(runner.run("identify", &[]).await.unwrap(), "10x20,");
        assert!(matches!(
            runner.run("convert", &["a".into()]).await,
            Err(Error::CommandLine(_))
        ));
        assert_eq!(runner.calls().len(), 2);

        let sequenced = MockCommandRunner::new()
            .with_output("identify", "first")
            .with_output("identify", "second");
        assert_eq!(sequenced.run("identify", &[]).await.unwrap(), "first");
        assert_eq!(sequenced.run("identify", &[]).await.unwrap(), "second");
        assert_eq!(sequenced.run("identify", &[]).await.unwrap(), "second");
        assert_eq!(runner.last_call().unwrap().args, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_object_store_missing_file_is_vanished() {
        let store = MockObjectStore::new(SyncTarget::Fog);
        let meta = ObjectMeta::long_lived(None);
        let err = store
            .put_file("k", Path::new("/nonexistent/attache/file"), &meta)
            .await
            .unwrap_err();
        assert!(err.is_vanished_file());
        assert!(store.puts().is_empty());
    }

    #[tokio::test]
    async fn test_job_queue_retries_then_fails() {
        let queue = MockJobQueue::new().with_max_retries(1);
        let upload = UploadJob::new(SyncTarget::S3, &RecordKey::new("Image", "photo", 1));
        let id = queue.enqueue(&upload).await.unwrap();

        assert!(queue.claim_next(&[SyncTarget::Fog]).await.unwrap().is_none());

        let job = queue.claim_next(&[]).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(queue.pending_count().await.unwrap(), 0);

        queue.fail(id, "network").await.unwrap();
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);

        queue.claim_next(&[SyncTarget::S3]).await.unwrap().unwrap();
        queue.fail(id, "network").await.unwrap();
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(queue.claim_next(&[]).await.unwrap().is_none());
    }
}
