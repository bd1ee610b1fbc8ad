//! Upload job queue on PostgreSQL.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use attache_core::defaults::JOB_MAX_RETRIES;
use attache_core::{Error, Job, JobQueue, JobStatus, Result, SyncTarget, UploadJob};

/// DDL for the queue table; every statement is idempotent.
pub const UPLOAD_JOBS_SCHEMA: &str = include_str!("../sql/upload_jobs.sql");

const JOB_COLUMNS: &str = "id, target, record_type, attachment, record_id, status,
     error_message, retry_count, max_retries, created_at, started_at, completed_at";

/// PostgreSQL implementation of JobQueue.
pub struct PgJobQueue {
    pool: Pool<Postgres>,
    max_retries: i32,
}

impl PgJobQueue {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            max_retries: JOB_MAX_RETRIES,
        }
    }

    /// Retry budget given to newly enqueued jobs.
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Create the queue table if it does not exist.
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::raw_sql(UPLOAD_JOBS_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        info!(
            subsystem = "db",
            component = "job_queue",
            op = "ensure_table",
            "Upload job table ready"
        );
        Ok(())
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let target: String = row.get("target");
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            upload: UploadJob {
                target: SyncTarget::from_str(&target)?,
                record_type: row.get("record_type"),
                attachment: row.get("attachment"),
                record_id: row.get("record_id"),
            },
            status: JobStatus::from_str(&status)?,
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, upload: &UploadJob) -> Result<Uuid> {
        let job_id = Uuid::now_v7();

        sqlx::query(
            "INSERT INTO attache_upload_jobs
                 (id, target, record_type, attachment, record_id, status, max_retries, created_at)
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)",
        )
        .bind(job_id)
        .bind(upload.target.as_str())
        .bind(&upload.record_type)
        .bind(&upload.attachment)
        .bind(upload.record_id)
        .bind(self.max_retries)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "job_queue",
            op = "enqueue",
            job_id = %job_id,
            sync_target = %upload.target,
            record_type = %upload.record_type,
            record_id = upload.record_id,
            "Upload job queued"
        );
        Ok(job_id)
    }

    async fn claim_next(&self, targets: &[SyncTarget]) -> Result<Option<Job>> {
        let target_strings: Vec<String> = targets.iter().map(|t| t.as_str().to_string()).collect();

        // Empty array claims any target.
        let query = format!(
            "UPDATE attache_upload_jobs
             SET status = 'running', started_at = $1
             WHERE id = (
                 SELECT id FROM attache_upload_jobs
                 WHERE status = 'pending'
                   AND (cardinality($2::text[]) = 0 OR target = ANY($2))
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(Utc::now())
            .bind(&target_strings)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE attache_upload_jobs
             SET status = 'completed', completed_at = $1, error_message = NULL
             WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let (retry_count, max_retries): (i32, i32) = sqlx::query_as(
            "SELECT retry_count, max_retries FROM attache_upload_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

        if retry_count < max_retries {
            sqlx::query(
                "UPDATE attache_upload_jobs
                 SET status = 'pending', retry_count = $1, error_message = $2, started_at = NULL
                 WHERE id = $3",
            )
            .bind(retry_count + 1)
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        } else {
            sqlx::query(
                "UPDATE attache_upload_jobs
                 SET status = 'failed', completed_at = $1, error_message = $2
                 WHERE id = $3",
            )
            .bind(Utc::now())
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM attache_upload_jobs WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM attache_upload_jobs WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        for statement in UPLOAD_JOBS_SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| s.contains("CREATE"))
        {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
        }
    }

    #[test]
    fn test_status_and_target_strings_parse() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()).unwrap(), status);
        }
        for target in SyncTarget::ALL {
            assert_eq!(SyncTarget::from_str(target.as_str()).unwrap(), target);
        }
    }
}
