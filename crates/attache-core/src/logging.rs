//! Structured logging schema and field name constants for attache.
//!
//! All crates use these constants for consistent structured logging fields.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Unexpected filesystem or remote failure, requires operator attention |
//! | WARN  | Recoverable issue (file vanished during upload, job retried) |
//! | INFO  | Lifecycle events (worker start/stop), completed uploads |
//! | DEBUG | Decision points: transform plans, flush/skip choices |
//! | TRACE | Per-file iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "imaging", "storage", "db", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "prober", "thumbnail", "attachment", "worker", "s3"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "flush_writes", "flush_deletes", "write_to", "claim_next"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Host record type (class / table name).
pub const RECORD_TYPE: &str = "record_type";

/// Host record id.
pub const RECORD_ID: &str = "record_id";

/// Attachment name on the record.
pub const ATTACHMENT: &str = "attachment";

/// Style (variant) name.
pub const STYLE: &str = "style";

/// Remote backend ("s3", "fog").
pub const SYNC_TARGET: &str = "sync_target";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Filesystem path being touched.
pub const PATH: &str = "path";

/// Remote object key.
pub const OBJECT_KEY: &str = "object_key";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of files handled by an operation.
pub const FILE_COUNT: &str = "file_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
