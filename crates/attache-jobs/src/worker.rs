//! Job worker that drains the upload queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use attache_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_MAX_CONCURRENT, JOB_POLL_INTERVAL_MS, JOB_TIMEOUT_SECS,
};
use attache_core::{Error, Job, JobQueue, Result, SyncTarget};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Hard limit for a single job execution.
    pub job_timeout: Duration,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: JOB_MAX_CONCURRENT,
            job_timeout: Duration::from_secs(JOB_TIMEOUT_SECS),
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `1000` | Polling interval when queue is empty |
    /// | `JOB_TIMEOUT_SECS` | `300` | Per-job timeout |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_POLL_INTERVAL_MS);

        let job_timeout = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(JOB_TIMEOUT_SECS));

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            job_timeout,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A job was started.
    JobStarted { job_id: Uuid, target: SyncTarget },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, target: SyncTarget },
    /// A job failed; the queue may run it again.
    JobFailed {
        job_id: Uuid,
        target: SyncTarget,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    ///
    /// Jobs already claimed run to completion.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the worker loop to exit.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))
    }
}

type HandlerMap = Arc<HashMap<SyncTarget, Arc<dyn JobHandler>>>;

/// Job worker that processes upload jobs from the queue.
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    config: WorkerConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        config: WorkerConfig,
        handlers: Vec<Arc<dyn JobHandler>>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.target(), handler))
            .collect::<HashMap<_, _>>();
        Self {
            queue,
            config,
            handlers: Arc::new(handlers),
            event_tx,
        }
    }

    /// Targets this worker claims jobs for.
    pub fn targets(&self) -> Vec<SyncTarget> {
        let mut targets: Vec<SyncTarget> = self.handlers.keys().copied().collect();
        targets.sort();
        targets
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Get the pending job count.
    pub async fn pending_count(&self) -> Result<i64> {
        self.queue.pending_count().await
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Claims up to `max_concurrent_jobs` at a time and runs them
    /// concurrently. Sleeps only when the queue is empty.
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(
                subsystem = "jobs",
                component = "worker",
                "Job worker is disabled, not starting"
            );
            return;
        }

        let targets = self.targets();
        if targets.is_empty() {
            warn!(
                subsystem = "jobs",
                component = "worker",
                "No upload handlers registered, not starting"
            );
            return;
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            targets = ?targets,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs.max(1);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(subsystem = "jobs", component = "worker", "Job worker received shutdown signal");
                break;
            }

            let mut tasks = tokio::task::JoinSet::new();
            for _ in 0..max_concurrent {
                match self.claim_job(&targets).await {
                    Some(job) => {
                        let runner = self.job_runner();
                        tasks.spawn(async move {
                            runner.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if tasks.is_empty() {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(subsystem = "jobs", component = "worker", "Job worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(
                    subsystem = "jobs",
                    component = "worker",
                    claimed = tasks.len(),
                    "Processing concurrent job batch"
                );
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(subsystem = "jobs", component = "worker", error = ?e, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", component = "worker", "Job worker stopped");
    }

    async fn claim_job(&self, targets: &[SyncTarget]) -> Option<Job> {
        match self.queue.claim_next(targets).await {
            Ok(job) => job,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    op = "claim_next",
                    error = %e,
                    "Failed to claim job"
                );
                None
            }
        }
    }

    fn job_runner(&self) -> JobRunner {
        JobRunner {
            queue: self.queue.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            job_timeout: self.config.job_timeout,
        }
    }
}

/// References needed to execute one job in a spawned task.
struct JobRunner {
    queue: Arc<dyn JobQueue>,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    job_timeout: Duration,
}

impl JobRunner {
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let target = job.upload.target;

        debug!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            sync_target = %target,
            record_type = %job.upload.record_type,
            record_id = job.upload.record_id,
            attempt = job.retry_count,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id, target });

        let result = match self.handlers.get(&target).cloned() {
            Some(handler) => {
                match tokio::time::timeout(self.job_timeout, handler.execute(JobContext::new(job)))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            subsystem = "jobs",
                            component = "worker",
                            job_id = %job_id,
                            sync_target = %target,
                            timeout_secs = self.job_timeout.as_secs(),
                            "Job exceeded timeout"
                        );
                        JobResult::Failed(format!(
                            "Job exceeded timeout of {}s",
                            self.job_timeout.as_secs()
                        ))
                    }
                }
            }
            None => JobResult::Failed(format!("No handler for sync target: {}", target)),
        };

        match result {
            JobResult::Success => {
                if let Err(e) = self.queue.complete(job_id).await {
                    error!(subsystem = "jobs", component = "worker", error = %e, job_id = %job_id, "Failed to mark job as completed");
                } else {
                    info!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        sync_target = %target,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job completed successfully"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted { job_id, target });
                }
            }
            JobResult::Failed(error) => {
                if let Err(e) = self.queue.fail(job_id, &error).await {
                    error!(subsystem = "jobs", component = "worker", error = %e, job_id = %job_id, "Failed to mark job as failed");
                } else {
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        job_id = %job_id,
                        sync_target = %target,
                        %error,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job failed"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobFailed {
                        job_id,
                        target,
                        error,
                    });
                }
            }
        }
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    queue: Arc<dyn JobQueue>,
    config: WorkerConfig,
    handlers: Vec<Arc<dyn JobHandler>>,
}

impl WorkerBuilder {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler. A later handler for the same target replaces an
    /// earlier one.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn build(self) -> JobWorker {
        JobWorker::new(self.queue, self.config, self.handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use attache_core::mock::MockJobQueue;
    use attache_core::{JobStatus, RecordKey, UploadJob};

    struct FixedHandler {
        target: SyncTarget,
        result: JobResult,
        delay: Duration,
    }

    #[async_trait]
    impl JobHandler for FixedHandler {
        fn target(&self) -> SyncTarget {
            self.target
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            sleep(self.delay).await;
            self.result.clone()
        }
    }

    fn handler(target: SyncTarget, result: JobResult) -> FixedHandler {
        FixedHandler {
            target,
            result,
            delay: Duration::ZERO,
        }
    }

    fn upload(target: SyncTarget, id: i64) -> UploadJob {
        UploadJob::new(target, &RecordKey::new("Image", "photo", id))
    }

    async fn wait_for<F: Fn(&WorkerEvent) -> bool>(
        events: &mut broadcast::Receiver<WorkerEvent>,
        pred: F,
    ) -> WorkerEvent {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, JOB_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(10)
            .with_max_concurrent(8)
            .with_job_timeout(Duration::from_secs(5))
            .with_enabled(false);

        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.job_timeout, Duration::from_secs(5));
        assert!(!config.enabled);
    }

    #[test]
    fn test_targets_are_registered_handlers() {
        let worker = WorkerBuilder::new(Arc::new(MockJobQueue::new()))
            .with_handler(handler(SyncTarget::Fog, JobResult::Success))
            .with_handler(handler(SyncTarget::S3, JobResult::Success))
            .build();
        assert_eq!(worker.targets(), vec![SyncTarget::S3, SyncTarget::Fog]);
    }

    #[tokio::test]
    async fn test_successful_job_is_completed() {
        let queue = MockJobQueue::new();
        let job_id = queue.enqueue(&upload(SyncTarget::S3, 1)).await.unwrap();

        let worker = WorkerBuilder::new(Arc::new(queue.clone()))
            .with_config(WorkerConfig::default().with_poll_interval(10))
            .with_handler(handler(SyncTarget::S3, JobResult::Success))
            .build();
        let mut events = worker.events();
        let handle = worker.start();

        let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobCompleted { .. })).await;
        assert_eq!(
            event,
            WorkerEvent::JobCompleted {
                job_id,
                target: SyncTarget::S3
            }
        );

        handle.shutdown().await.unwrap();
        handle.join().await.unwrap();
        assert_eq!(queue.get(job_id).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_job_is_retried_until_budget_exhausted() {
        let queue = MockJobQueue::new().with_max_retries(1);
        let job_id = queue.enqueue(&upload(SyncTarget::S3, 1)).await.unwrap();

        let worker = WorkerBuilder::new(Arc::new(queue.clone()))
            .with_config(WorkerConfig::default().with_poll_interval(10))
            .with_handler(handler(SyncTarget::S3, JobResult::Failed("boom".into())))
            .build();
        let mut events = worker.events();
        let handle = worker.start();

        wait_for(&mut events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;
        wait_for(&mut events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;

        handle.shutdown().await.unwrap();
        handle.join().await.unwrap();

        let job = queue.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_only_registered_targets_are_claimed() {
        let queue = MockJobQueue::new();
        let fog_job = queue.enqueue(&upload(SyncTarget::Fog, 1)).await.unwrap();
        let s3_job = queue.enqueue(&upload(SyncTarget::S3, 1)).await.unwrap();

        let worker = WorkerBuilder::new(Arc::new(queue.clone()))
            .with_config(WorkerConfig::default().with_poll_interval(10))
            .with_handler(handler(SyncTarget::S3, JobResult::Success))
            .build();
        let mut events = worker.events();
        let handle = worker.start();

        wait_for(&mut events, |e| matches!(e, WorkerEvent::JobCompleted { .. })).await;
        handle.shutdown().await.unwrap();
        handle.join().await.unwrap();

        assert_eq!(queue.get(s3_job).await.unwrap().unwrap().status, JobStatus::Completed);
        assert_eq!(queue.get(fog_job).await.unwrap().unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_job_timeout_fails_job() {
        let queue = MockJobQueue::new().with_max_retries(0);
        let job_id = queue.enqueue(&upload(SyncTarget::S3, 1)).await.unwrap();

        let worker = WorkerBuilder::new(Arc::new(queue.clone()))
            .with_config(
                WorkerConfig::default()
                    .with_poll_interval(10)
                    .with_job_timeout(Duration::from_millis(20)),
            )
            .with_handler(FixedHandler {
                target: SyncTarget::S3,
                result: JobResult::Success,
                delay: Duration::from_secs(30),
            })
            .build();
        let mut events = worker.events();
        let handle = worker.start();

        let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;
        match event {
            WorkerEvent::JobFailed { error, .. } => assert!(error.contains("timeout")),
            other => panic!("unexpected event: {other:?}"),
        }

        handle.shutdown().await.unwrap();
        handle.join().await.unwrap();
        assert_eq!(queue.get(job_id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_disabled_worker_exits_immediately() {
        let worker = WorkerBuilder::new(Arc::new(MockJobQueue::new()))
            .with_config(WorkerConfig::default().with_enabled(false))
            .with_handler(handler(SyncTarget::S3, JobResult::Success))
            .build();
        let handle = worker.start();
        handle.join().await.unwrap();
    }
}
