//! Data models shared across attache crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults::REMOTE_CACHE_MAX_AGE_SECS;
use crate::Error;

// =============================================================================
// RECORDS
// =============================================================================

/// Identifies one attachment on one host record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Host record type, e.g. `Image` or `UserProfile`.
    pub record_type: String,
    /// Attachment name on the record, e.g. `photo`.
    pub attachment: String,
    /// Host record primary key.
    pub id: i64,
}

impl RecordKey {
    pub fn new(record_type: impl Into<String>, attachment: impl Into<String>, id: i64) -> Self {
        Self {
            record_type: record_type.into(),
            attachment: attachment.into(),
            id,
        }
    }

    /// Column name for one of the attachment's fields, e.g. `photo_synced_to_s3`.
    pub fn column(&self, field: &str) -> String {
        format!("{}_{}", self.attachment, field)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}.{}", self.record_type, self.id, self.attachment)
    }
}

/// Snapshot of the attachment columns on a host record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: i64,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub file_size: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub synced_to_s3: bool,
    pub synced_to_fog: bool,
}

impl AttachmentRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn is_synced(&self, target: SyncTarget) -> bool {
        match target {
            SyncTarget::S3 => self.synced_to_s3,
            SyncTarget::Fog => self.synced_to_fog,
        }
    }

    pub fn set_synced(&mut self, target: SyncTarget, synced: bool) {
        match target {
            SyncTarget::S3 => self.synced_to_s3 = synced,
            SyncTarget::Fog => self.synced_to_fog = synced,
        }
    }

    /// Both remote backends hold the current bytes.
    pub fn is_fully_synced(&self) -> bool {
        self.synced_to_s3 && self.synced_to_fog
    }

    pub fn sync_state(&self) -> SyncState {
        match (self.synced_to_s3, self.synced_to_fog) {
            (false, false) => SyncState::LocalOnly,
            (true, false) => SyncState::SyncedToS3,
            (false, true) => SyncState::SyncedToFog,
            (true, true) => SyncState::SyncedToBoth,
        }
    }
}

/// Where the authoritative copies of an attachment currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    LocalOnly,
    SyncedToS3,
    SyncedToFog,
    SyncedToBoth,
}

// =============================================================================
// REMOTE TARGETS
// =============================================================================

/// Remote backend an attachment is mirrored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTarget {
    /// Amazon S3 or an S3-compatible service
    S3,
    /// Generic cloud object store (GCS-style XML API)
    Fog,
}

impl SyncTarget {
    pub const ALL: [SyncTarget; 2] = [SyncTarget::S3, SyncTarget::Fog];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Fog => "fog",
        }
    }

    /// Record column suffix holding this target's sync flag.
    pub fn flag_field(self) -> &'static str {
        match self {
            Self::S3 => "synced_to_s3",
            Self::Fog => "synced_to_fog",
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "fog" => Ok(Self::Fog),
            other => Err(Error::InvalidInput(format!("unknown sync target: {}", other))),
        }
    }
}

/// Headers applied to every uploaded variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub content_type: Option<String>,
    pub cache_control: String,
    pub expires: DateTime<Utc>,
    pub public_read: bool,
}

impl ObjectMeta {
    /// Long-lived, publicly readable object.
    pub fn long_lived(content_type: Option<String>) -> Self {
        Self {
            content_type,
            cache_control: format!("max-age={}", REMOTE_CACHE_MAX_AGE_SECS),
            expires: Utc::now() + Duration::seconds(REMOTE_CACHE_MAX_AGE_SECS),
            public_read: true,
        }
    }

    /// `Expires` value in IMF-fixdate form.
    pub fn expires_http_date(&self) -> String {
        self.expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Deferred remote upload for one attachment on one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadJob {
    pub target: SyncTarget,
    pub record_type: String,
    pub attachment: String,
    pub record_id: i64,
}

impl UploadJob {
    pub fn new(target: SyncTarget, key: &RecordKey) -> Self {
        Self {
            target,
            record_type: key.record_type.clone(),
            attachment: key.attachment.clone(),
            record_id: key.id,
        }
    }

    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(&self.record_type, &self.attachment, self.record_id)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Job(format!("unknown job status: {}", other))),
        }
    }
}

/// A job in the upload queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub upload: UploadJob,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn pending(upload: UploadJob, max_retries: i32) -> Self {
        Self {
            id: Uuid::now_v7(),
            upload,
            status: JobStatus::Pending,
            error_message: None,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_column() {
        let key = RecordKey::new("Image", "photo", 7);
        assert_eq!(key.column("synced_to_s3"), "photo_synced_to_s3");
        assert_eq!(key.to_string(), "Image#7.photo");
    }

    #[test]
    fn test_sync_state() {
        let mut record = AttachmentRecord::new(1);
        assert_eq!(record.sync_state(), SyncState::LocalOnly);
        assert!(!record.is_fully_synced());

        record.set_synced(SyncTarget::S3, true);
        assert_eq!(record.sync_state(), SyncState::SyncedToS3);

        record.set_synced(SyncTarget::Fog, true);
        assert_eq!(record.sync_state(), SyncState::SyncedToBoth);
        assert!(record.is_fully_synced());

        record.set_synced(SyncTarget::S3, false);
        assert_eq!(record.sync_state(), SyncState::SyncedToFog);
    }

    #[test]
    fn test_sync_target_round_trip() {
        for target in SyncTarget::ALL {
            assert_eq!(target.as_str().parse::<SyncTarget>().unwrap(), target);
        }
        assert!("azure".parse::<SyncTarget>().is_err());
        assert_eq!(SyncTarget::Fog.flag_field(), "synced_to_fog");
    }

    #[test]
    fn test_upload_job_serializes_as_plain_data() {
        let job = UploadJob::new(SyncTarget::S3, &RecordKey::new("Image", "photo", 12));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["target"], "s3");
        assert_eq!(value["record_id"], 12);

        let back: UploadJob = serde_json::from_value(value).unwrap();
        assert_eq!(back.record_key(), RecordKey::new("Image", "photo", 12));
    }

    #[test]
    fn test_object_meta_long_lived() {
        let meta = ObjectMeta::long_lived(Some("image/jpeg".into()));
        assert_eq!(meta.cache_control, "max-age=315569520");
        assert!(meta.public_read);
        assert!(meta.expires > Utc::now() + Duration::days(3650 - 1));
        assert!(meta.expires_http_date().ends_with(" GMT"));
    }
}
