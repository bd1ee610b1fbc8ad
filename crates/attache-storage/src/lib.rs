//! # attache-storage
//!
//! Keeps an attachment's local files, remote copies, and sync flags
//! consistent.
//!
//! - [`Storage`]: shared handle over configuration, the record repository
//!   and the job queue
//! - [`Attachment`]: queued writes/deletes/jobs for one record and the
//!   flush protocol around the host's save
//! - [`S3ObjectStore`] / [`HttpObjectStore`]: remote backends
//! - [`filesystem`]: moving variants into place and pruning empty
//!   directories

pub mod attachment;
pub mod filesystem;
pub mod http;
pub mod s3;
pub mod storage;

pub use attachment::{Attachment, StyleFile, SyncPhase, WriteOutcome};
pub use http::HttpObjectStore;
pub use s3::S3ObjectStore;
pub use storage::Storage;
