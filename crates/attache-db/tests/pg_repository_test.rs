//! Database tests for the record repository and the upload job queue.
//!
//! Require a running PostgreSQL; run with
//! `DATABASE_URL=... cargo test -p attache-db -- --ignored`.

use attache_core::{
    AttachmentRecord, AttachmentRepository, JobQueue, JobStatus, RecordKey, SyncTarget, UploadJob,
};
use attache_db::{create_pool, PgAttachmentRepository, PgJobQueue, DEFAULT_TEST_DATABASE_URL};
use chrono::{TimeZone, Utc};
use sqlx::PgPool;

const TEST_TABLE: &str = "attache_test_images";

async fn setup_test_pool() -> PgPool {
    let _ = dotenvy::dotenv();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
    let pool = create_pool(&database_url)
        .await
        .expect("Failed to create test pool");

    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS attache_test_images (
             id BIGSERIAL PRIMARY KEY,
             title TEXT,
             photo_file_name TEXT,
             photo_content_type TEXT,
             photo_file_size INTEGER,
             photo_updated_at TIMESTAMP,
             photo_synced_to_s3 BOOLEAN NOT NULL DEFAULT false,
             photo_synced_to_fog BOOLEAN NOT NULL DEFAULT false,
             updated_at TIMESTAMPTZ
         )",
    )
    .execute(&pool)
    .await
    .expect("Failed to create test table");
    pool
}

fn repository(pool: &PgPool) -> PgAttachmentRepository {
    PgAttachmentRepository::new(pool.clone()).with_table("Image", TEST_TABLE)
}

async fn insert_record(pool: &PgPool) -> RecordKey {
    let id: i64 =
        sqlx::query_scalar("INSERT INTO attache_test_images (title) VALUES ('t') RETURNING id")
            .fetch_one(pool)
            .await
            .expect("insert record");
    RecordKey::new("Image", "photo", id)
}

#[tokio::test]
#[ignore]
async fn test_load_missing_record() {
    let pool = setup_test_pool().await;
    let repo = repository(&pool);
    let key = RecordKey::new("Image", "photo", i64::MAX);

    assert!(repo.load(&key).await.unwrap().is_none());
    assert!(!repo.exists(&key).await.unwrap());
    assert_eq!(repo.set_synced(&key, SyncTarget::S3, true).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn test_save_and_load_file_columns() {
    let pool = setup_test_pool().await;
    let repo = repository(&pool);
    let key = insert_record(&pool).await;

    let record = AttachmentRecord {
        id: key.id,
        file_name: Some("cat.jpg".into()),
        content_type: Some("image/jpeg".into()),
        file_size: Some(2048),
        updated_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        ..Default::default()
    };
    repo.save_file_columns(&key, &record).await.unwrap();

    let loaded = repo.load(&key).await.unwrap().unwrap();
    assert_eq!(loaded.id, key.id);
    assert_eq!(loaded.file_name.as_deref(), Some("cat.jpg"));
    assert_eq!(loaded.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(loaded.file_size, Some(2048));
    assert!(!loaded.synced_to_s3);
    assert!(!loaded.synced_to_fog);
    assert!(repo.exists(&key).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_set_synced_is_single_row() {
    let pool = setup_test_pool().await;
    let repo = repository(&pool);
    let key = insert_record(&pool).await;
    let other = insert_record(&pool).await;

    assert_eq!(repo.set_synced(&key, SyncTarget::Fog, true).await.unwrap(), 1);
    assert!(repo.load(&key).await.unwrap().unwrap().synced_to_fog);
    assert!(!repo.load(&other).await.unwrap().unwrap().synced_to_fog);

    repo.touch(&key).await.unwrap();
    let touched: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT updated_at FROM attache_test_images WHERE id = $1")
            .bind(key.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(touched.is_some());
}

#[tokio::test]
#[ignore]
async fn test_save_file_columns_on_deleted_record() {
    let pool = setup_test_pool().await;
    let repo = repository(&pool);
    let key = insert_record(&pool).await;
    sqlx::query("DELETE FROM attache_test_images WHERE id = $1")
        .bind(key.id)
        .execute(&pool)
        .await
        .unwrap();

    let err = repo
        .save_file_columns(&key, &AttachmentRecord::new(key.id))
        .await
        .unwrap_err();
    assert!(matches!(err, attache_core::Error::NotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_job_lifecycle_with_retries() {
    let pool = setup_test_pool().await;
    let queue = PgJobQueue::new(pool.clone()).with_max_retries(1);
    queue.ensure_table().await.unwrap();

    let record_id = insert_record(&pool).await.id;
    let upload = UploadJob::new(SyncTarget::S3, &RecordKey::new("Image", "photo", record_id));
    let job_id = queue.enqueue(&upload).await.unwrap();

    let job = queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.upload, upload);
    assert_eq!(job.max_retries, 1);

    // Claim until we get ours; other tests may share the table.
    let claimed = loop {
        let job = queue
            .claim_next(&[SyncTarget::S3])
            .await
            .unwrap()
            .expect("a pending s3 job");
        assert_eq!(job.upload.target, SyncTarget::S3);
        if job.id == job_id {
            break job;
        }
        queue.complete(job.id).await.unwrap();
    };
    assert_eq!(claimed.status, JobStatus::Running);
    assert!(claimed.started_at.is_some());

    queue.fail(job_id, "timeout").await.unwrap();
    let retried = queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.error_message.as_deref(), Some("timeout"));

    queue.fail(job_id, "timeout again").await.unwrap();
    let failed = queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.completed_at.is_some());
}

#[tokio::test]
#[ignore]
async fn test_complete_job() {
    let pool = setup_test_pool().await;
    let queue = PgJobQueue::new(pool.clone());
    queue.ensure_table().await.unwrap();

    let upload = UploadJob::new(SyncTarget::Fog, &RecordKey::new("Image", "photo", 1));
    let job_id = queue.enqueue(&upload).await.unwrap();
    queue.complete(job_id).await.unwrap();

    let job = queue.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(queue.fail(uuid::Uuid::now_v7(), "x").await.is_err());
}
