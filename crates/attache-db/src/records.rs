//! Attachment columns on host records.
//!
//! An attachment named `photo` on record type `Image` lives in table
//! `images` as the columns `photo_file_name`, `photo_content_type`,
//! `photo_file_size`, `photo_updated_at`, `photo_synced_to_s3` and
//! `photo_synced_to_fog`, keyed by a numeric `id`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use attache_core::{
    AttachmentRecord, AttachmentRepository, Error, RecordKey, Result, SyncTarget,
};

use crate::identifiers::{table_name, validate_identifier};

/// PostgreSQL implementation of AttachmentRepository.
pub struct PgAttachmentRepository {
    pool: Pool<Postgres>,
    /// Record types whose table does not follow the naming convention.
    tables: HashMap<String, String>,
}

impl PgAttachmentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            tables: HashMap::new(),
        }
    }

    /// Map a record type to an explicit table name.
    pub fn with_table(mut self, record_type: impl Into<String>, table: impl Into<String>) -> Self {
        self.tables.insert(record_type.into(), table.into());
        self
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    fn table(&self, key: &RecordKey) -> Result<String> {
        match self.tables.get(&key.record_type) {
            Some(table) => {
                validate_identifier(table)?;
                Ok(table.clone())
            }
            None => table_name(&key.record_type),
        }
    }

    fn column(key: &RecordKey, field: &str) -> Result<String> {
        let column = key.column(field);
        validate_identifier(&column)?;
        Ok(column)
    }
}

#[async_trait]
impl AttachmentRepository for PgAttachmentRepository {
    async fn load(&self, key: &RecordKey) -> Result<Option<AttachmentRecord>> {
        let table = self.table(key)?;
        let query = format!(
            "SELECT id::bigint AS id,
                    {file_name} AS file_name,
                    {content_type} AS content_type,
                    {file_size}::bigint AS file_size,
                    {updated_at}::timestamptz AS updated_at,
                    COALESCE({s3}, false) AS synced_to_s3,
                    COALESCE({fog}, false) AS synced_to_fog
             FROM {table} WHERE id = $1",
            file_name = Self::column(key, "file_name")?,
            content_type = Self::column(key, "content_type")?,
            file_size = Self::column(key, "file_size")?,
            updated_at = Self::column(key, "updated_at")?,
            s3 = Self::column(key, SyncTarget::S3.flag_field())?,
            fog = Self::column(key, SyncTarget::Fog.flag_field())?,
        );

        let row = sqlx::query(&query)
            .bind(key.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(|row| AttachmentRecord {
            id: row.get("id"),
            file_name: row.get("file_name"),
            content_type: row.get("content_type"),
            file_size: row.get("file_size"),
            updated_at: row.get::<Option<DateTime<Utc>>, _>("updated_at"),
            synced_to_s3: row.get("synced_to_s3"),
            synced_to_fog: row.get("synced_to_fog"),
        }))
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        let query = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            self.table(key)?
        );
        let exists: bool = sqlx::query_scalar(&query)
            .bind(key.id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn save_file_columns(&self, key: &RecordKey, record: &AttachmentRecord) -> Result<()> {
        let query = format!(
            "UPDATE {table}
             SET {file_name} = $1, {content_type} = $2, {file_size} = $3, {updated_at} = $4
             WHERE id = $5",
            table = self.table(key)?,
            file_name = Self::column(key, "file_name")?,
            content_type = Self::column(key, "content_type")?,
            file_size = Self::column(key, "file_size")?,
            updated_at = Self::column(key, "updated_at")?,
        );

        let result = sqlx::query(&query)
            .bind(&record.file_name)
            .bind(&record.content_type)
            .bind(record.file_size)
            .bind(record.updated_at)
            .bind(key.id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("record {}", key)));
        }
        Ok(())
    }

    async fn set_synced(&self, key: &RecordKey, target: SyncTarget, synced: bool) -> Result<u64> {
        // Single-row update keyed by id, no callbacks or validations.
        let query = format!(
            "UPDATE {} SET {} = $1 WHERE id = $2",
            self.table(key)?,
            Self::column(key, target.flag_field())?
        );

        let result = sqlx::query(&query)
            .bind(synced)
            .bind(key.id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "records",
            op = "set_synced",
            record_type = %key.record_type,
            record_id = key.id,
            attachment = %key.attachment,
            sync_target = %target,
            synced,
            rows = result.rows_affected(),
            "Updated sync flag"
        );
        Ok(result.rows_affected())
    }

    async fn touch(&self, key: &RecordKey) -> Result<()> {
        let query = format!("UPDATE {} SET updated_at = now() WHERE id = $1", self.table(key)?);
        sqlx::query(&query)
            .bind(key.id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
