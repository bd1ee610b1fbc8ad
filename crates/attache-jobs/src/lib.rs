//! # attache-jobs
//!
//! Background upload worker for attache.
//!
//! This crate provides:
//! - The `JobHandler` contract and `UploadHandler`, one instance per remote
//!   backend
//! - `JobWorker`: concurrent polling of the upload queue with per-job
//!   timeouts, retries via the queue, and broadcast events
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use attache_jobs::{UploadHandler, WorkerBuilder, WorkerConfig};
//!
//! let worker = WorkerBuilder::new(queue)
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(UploadHandler::new(storage.clone(), Arc::new(s3_store)))
//!     .build();
//!
//! let handle = worker.start();
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await?;
//! handle.join().await?;
//! ```

pub mod handler;
pub mod upload;
pub mod worker;

pub use handler::{JobContext, JobHandler, JobResult};
pub use upload::{UploadHandler, UploadOutcome};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
