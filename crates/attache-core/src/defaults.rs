//! Centralized default constants for attache.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// STYLES
// =============================================================================

/// Name of the style holding the uploaded, unprocessed file.
pub const ORIGINAL_STYLE: &str = "original";

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Mode applied to every file moved into its canonical path (rw-r--r--).
pub const FILE_PERMISSIONS: u32 = 0o644;

/// Default root substituted for `:rails_root` / `:root`.
pub const FILESYSTEM_ROOT: &str = ".";

/// Default environment name substituted for `:rails_env` / `:env`.
pub const ENVIRONMENT: &str = "development";

/// Default local path template.
pub const FILESYSTEM_PATH: &str =
    ":rails_root/public/system/:class/:attachment/:id_partition/:style/:filename";

/// Default local URL template.
pub const FILESYSTEM_URL: &str = "/system/:class/:attachment/:id_partition/:style/:filename";

/// Default remote object key template.
pub const REMOTE_PATH: &str = "/:class/:attachment/:id_partition/:style/:filename";

// =============================================================================
// REMOTE STORAGE
// =============================================================================

/// Cache lifetime for uploaded variants: ten years of 365.2425 days.
pub const REMOTE_CACHE_MAX_AGE_SECS: i64 = 315_569_520;

/// Default S3 region when none is configured.
pub const S3_REGION: &str = "us-east-1";

/// Timeout for HTTP uploads and downloads.
pub const HTTP_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// EXTERNAL COMMANDS
// =============================================================================

/// Timeout for a single `identify` / `convert` invocation.
pub const COMMAND_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// JOBS
// =============================================================================

/// Default maximum retries for failed upload jobs.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Default polling interval for the job worker (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Default maximum number of concurrently executing jobs.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Hard timeout for a single job execution.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;
