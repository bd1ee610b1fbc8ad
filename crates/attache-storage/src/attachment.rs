//! Attachment storage lifecycle.
//!
//! An [`Attachment`] buffers work in three ordered sets and applies it in
//! phases around the host's record save:
//!
//! 1. [`Attachment::save`] (inside the host transaction): delete files queued
//!    for removal, move staged files into place, clear stale sync flags and
//!    queue one upload job per configured remote target.
//! 2. [`Attachment::after_commit`]: hand the queued jobs to the job queue.
//! 3. The upload worker later calls [`Attachment::write_to`] and
//!    [`Attachment::delete_local_files`].
//!
//! Jobs are never enqueued before the host commit, so a worker can never
//! observe a record whose files are not in place yet.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

use attache_core::defaults::ORIGINAL_STYLE;
use attache_core::{
    AttachmentDefinition, AttachmentRecord, Error, InterpolationContext, ObjectMeta, ObjectStore,
    RecordKey, Result, SyncTarget, UploadJob,
};
use attache_imaging::{ThumbnailGenerator, ThumbnailOptions};

use crate::filesystem;
use crate::storage::{AttachmentSpec, Storage};

/// Coarse lifecycle position of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Bytes only exist on local disk.
    LocalOnly,
    /// Upload jobs are queued but not yet handed to the job queue.
    PendingUpload,
    /// Every configured remote backend holds the current bytes.
    SyncedRemote,
}

/// Result of [`Attachment::write_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The target's flag was already set; nothing was uploaded.
    AlreadySynced,
    /// Files were uploaded. `record_updated` is false when the record was
    /// deleted while the upload ran.
    Uploaded { files: usize, record_updated: bool },
}

/// A local file backing one style.
#[derive(Debug)]
pub enum StyleFile {
    /// Staged or stored on local disk.
    Local(PathBuf),
    /// Downloaded from the remote copy; removed on drop.
    Downloaded(NamedTempFile),
}

impl StyleFile {
    pub fn path(&self) -> &Path {
        match self {
            StyleFile::Local(path) => path,
            StyleFile::Downloaded(file) => file.path(),
        }
    }
}

/// One attachment on one host record.
pub struct Attachment {
    storage: Storage,
    spec: Arc<AttachmentSpec>,
    key: RecordKey,
    record: AttachmentRecord,
    pending_writes: BTreeMap<String, TempPath>,
    pending_deletes: Vec<PathBuf>,
    queued_jobs: Vec<UploadJob>,
    dirty: bool,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("key", &self.key)
            .field("record", &self.record)
            .field("pending_writes", &self.pending_writes.keys().collect::<Vec<_>>())
            .field("pending_deletes", &self.pending_deletes)
            .field("queued_jobs", &self.queued_jobs)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Attachment {
    pub(crate) fn new(
        storage: Storage,
        spec: Arc<AttachmentSpec>,
        key: RecordKey,
        record: AttachmentRecord,
    ) -> Self {
        Self {
            storage,
            spec,
            key,
            record,
            pending_writes: BTreeMap::new(),
            pending_deletes: Vec::new(),
            queued_jobs: Vec::new(),
            dirty: false,
        }
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn record(&self) -> &AttachmentRecord {
        &self.record
    }

    pub fn definition(&self) -> &AttachmentDefinition {
        &self.spec.definition
    }

    /// Whether a new file was assigned and not yet saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_present(&self) -> bool {
        self.record.file_name.is_some()
    }

    pub fn pending_writes(&self) -> Vec<&str> {
        self.pending_writes.keys().map(String::as_str).collect()
    }

    pub fn pending_deletes(&self) -> &[PathBuf] {
        &self.pending_deletes
    }

    pub fn queued_jobs(&self) -> &[UploadJob] {
        &self.queued_jobs
    }

    pub fn sync_phase(&self) -> SyncPhase {
        if !self.queued_jobs.is_empty() {
            return SyncPhase::PendingUpload;
        }
        let targets = self.storage.sync_targets();
        if !targets.is_empty() && targets.iter().all(|t| self.record.is_synced(*t)) {
            SyncPhase::SyncedRemote
        } else {
            SyncPhase::LocalOnly
        }
    }

    // =========================================================================
    // PATHS AND URLS
    // =========================================================================

    fn context<'a>(&'a self, style: &'a str) -> InterpolationContext<'a> {
        let config = self.storage.config();
        InterpolationContext {
            record_type: &self.key.record_type,
            attachment: &self.key.attachment,
            id: self.key.id,
            style,
            file_name: self.record.file_name.as_deref(),
            style_format: self
                .spec
                .definition
                .styles
                .get(style)
                .and_then(|s| s.format.as_deref()),
            updated_at: self.record.updated_at,
            root: &config.root,
            env: &config.env,
            url_template: Some(&self.spec.filesystem_url),
        }
    }

    /// Local path of a style, `None` while no file is attached.
    pub fn filesystem_path(&self, style: &str) -> Option<PathBuf> {
        self.record.file_name.as_ref()?;
        Some(PathBuf::from(
            self.spec.filesystem_path.render(&self.context(style)),
        ))
    }

    /// Remote object key of a style, without leading slashes.
    pub fn remote_path(&self, style: &str) -> String {
        let path = self.spec.remote_path.render(&self.context(style));
        path.trim_start_matches('/').to_string()
    }

    /// Where a style currently lives: the remote key once synced to S3,
    /// otherwise the local path.
    pub fn path(&self, style: &str) -> Option<String> {
        self.record.file_name.as_ref()?;
        if self.record.synced_to_s3 {
            Some(self.remote_path(style))
        } else {
            self.filesystem_path(style).map(|p| p.display().to_string())
        }
    }

    /// Local URL of a style with the update timestamp appended.
    pub fn filesystem_url(&self, style: &str) -> String {
        let url = self.spec.filesystem_url.render(&self.context(style));
        self.with_timestamp(url)
    }

    /// Public remote URL of a style, if a template is configured.
    pub fn remote_url(&self, style: &str) -> Option<String> {
        self.spec
            .remote_url
            .as_ref()
            .map(|t| t.render(&self.context(style)))
    }

    /// URL to show for a style.
    ///
    /// While delayed processing is pending the processing placeholder is
    /// returned; once synced to S3 the remote URL; otherwise the local one.
    pub fn url(&self, style: &str) -> String {
        if self.spec.definition.delay_processing && self.dirty {
            if let Some(template) = &self.spec.processing_url {
                return template.render(&self.context(style));
            }
        }
        if self.record.synced_to_s3 {
            if let Some(url) = self.remote_url(style) {
                return self.with_timestamp(url);
            }
        }
        self.filesystem_url(style)
    }

    fn with_timestamp(&self, url: String) -> String {
        match self.record.updated_at {
            Some(ts) => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{}{}{}", url, sep, ts.timestamp())
            }
            None => url,
        }
    }

    fn all_styles(&self) -> Vec<String> {
        self.spec
            .definition
            .all_styles()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Whether the local file for `style` exists.
    pub async fn exists(&self, style: &str) -> bool {
        match self.filesystem_path(style) {
            Some(path) => filesystem::exists(&path).await,
            None => false,
        }
    }

    /// Local files that exist, original first.
    pub async fn existing_local_files(&self) -> Vec<(String, PathBuf)> {
        let mut found = Vec::new();
        for style in self.all_styles() {
            if let Some(path) = self.filesystem_path(&style) {
                if filesystem::exists(&path).await {
                    found.push((style, path));
                }
            }
        }
        found
    }

    // =========================================================================
    // ASSIGNMENT
    // =========================================================================

    /// Attach a new original.
    ///
    /// Files of the previous upload are queued for deletion, a copy of
    /// `source` is staged as the original, and the file columns are updated.
    /// `source` itself is left untouched.
    pub async fn assign(
        &mut self,
        source: &Path,
        file_name: &str,
        content_type: Option<&str>,
    ) -> Result<()> {
        let size = tokio::fs::metadata(source).await?.len();
        let staged = NamedTempFile::new()?.into_temp_path();
        tokio::fs::copy(source, &*staged).await?;

        self.queue_all_for_delete();
        self.pending_writes
            .insert(ORIGINAL_STYLE.to_string(), staged);

        self.record.file_name = Some(file_name.to_string());
        self.record.content_type = content_type.map(String::from);
        self.record.file_size = Some(size as i64);
        self.record.updated_at = Some(Utc::now());
        self.dirty = true;

        debug!(
            subsystem = "storage",
            component = "attachment",
            op = "assign",
            record_id = self.key.id,
            attachment = %self.key.attachment,
            size,
            "File assigned"
        );
        Ok(())
    }

    /// Queue a file for a style; nothing touches the disk until
    /// [`Attachment::flush_writes`].
    pub fn stage_for_write(&mut self, style: &str, file: TempPath) {
        self.pending_writes.insert(style.to_string(), file);
    }

    /// Queue every current local variant for deletion and drop staged files.
    pub fn queue_all_for_delete(&mut self) {
        if self.record.file_name.is_some() {
            let paths: Vec<PathBuf> = self
                .all_styles()
                .iter()
                .filter_map(|style| self.filesystem_path(style))
                .collect();
            self.pending_deletes.extend(paths);
        }
        self.pending_writes.clear();
    }

    /// Remove the file: queue deletion of every variant and reset the
    /// columns.
    pub fn clear(&mut self) {
        self.queue_all_for_delete();
        self.record.file_name = None;
        self.record.content_type = None;
        self.record.file_size = None;
        self.record.updated_at = None;
        self.dirty = true;
    }

    // =========================================================================
    // PROCESSING
    // =========================================================================

    /// Generate every style from the staged original.
    pub async fn post_process(&mut self, generator: &ThumbnailGenerator) -> Result<()> {
        let original = self
            .pending_writes
            .get(ORIGINAL_STYLE)
            .map(|p| p.to_path_buf())
            .ok_or_else(|| Error::InvalidInput("no staged original to process".to_string()))?;
        self.generate_styles(generator, &original).await
    }

    async fn generate_styles(&mut self, generator: &ThumbnailGenerator, source: &Path) -> Result<()> {
        let whiny = self.spec.definition.whiny;
        let styles: Vec<_> = self
            .spec
            .definition
            .styles
            .iter()
            .filter(|(name, _)| name.as_str() != ORIGINAL_STYLE)
            .map(|(name, def)| (name.clone(), def.clone()))
            .collect();

        for (name, style) in styles {
            let options = ThumbnailOptions::from_style(&style, whiny);
            match generator.generate(source, &style.geometry, &options).await? {
                Some(file) => self.stage_for_write(&name, file.into_temp_path()),
                None => debug!(
                    subsystem = "storage",
                    component = "attachment",
                    op = "post_process",
                    record_id = self.key.id,
                    style = %name,
                    "Style skipped"
                ),
            }
        }
        Ok(())
    }

    /// Regenerate every style from the stored original and queue uploads.
    pub async fn reprocess(&mut self, generator: &ThumbnailGenerator) -> Result<()> {
        let original = self.to_file(ORIGINAL_STYLE).await?.ok_or_else(|| {
            Error::NotFound(format!("original file for {}", self.key))
        })?;

        // Styles are written over the old ones, so work from a private copy.
        let copy = NamedTempFile::new()?.into_temp_path();
        tokio::fs::copy(original.path(), &*copy).await?;
        drop(original);

        self.dirty = false;
        self.generate_styles(generator, &copy).await?;
        self.flush_writes().await?;
        self.flush_jobs().await
    }

    /// Fetch a style as a local file: staged, stored, or downloaded.
    pub async fn to_file(&self, style: &str) -> Result<Option<StyleFile>> {
        if let Some(staged) = self.pending_writes.get(style) {
            return Ok(Some(StyleFile::Local(staged.to_path_buf())));
        }
        if let Some(path) = self.filesystem_path(style) {
            if filesystem::exists(&path).await {
                return Ok(Some(StyleFile::Local(path)));
            }
        }
        Ok(self.download(style).await?.map(StyleFile::Downloaded))
    }

    /// Download a style from its public remote URL.
    ///
    /// Returns `None` unless the attachment is synced to S3 and the server
    /// answers 200 with a readable body. Only local I/O errors are returned.
    pub async fn download(&self, style: &str) -> Result<Option<NamedTempFile>> {
        if !self.record.synced_to_s3 {
            return Ok(None);
        }
        let Some(url) = self.remote_url(style) else {
            return Ok(None);
        };

        let response = match self.storage.http().get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    subsystem = "storage",
                    component = "attachment",
                    op = "download",
                    record_id = self.key.id,
                    style,
                    error = %e,
                    "Remote copy unreachable"
                );
                return Ok(None);
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            debug!(
                subsystem = "storage",
                component = "attachment",
                op = "download",
                record_id = self.key.id,
                style,
                status = response.status().as_u16(),
                "Remote copy not available"
            );
            return Ok(None);
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    subsystem = "storage",
                    component = "attachment",
                    op = "download",
                    record_id = self.key.id,
                    style,
                    error = %e,
                    "Remote copy body could not be read"
                );
                return Ok(None);
            }
        };
        let file = NamedTempFile::new()?;
        tokio::fs::write(file.path(), &bytes).await?;
        Ok(Some(file))
    }

    // =========================================================================
    // SAVE PHASES
    // =========================================================================

    /// Persist columns and apply queued deletes and writes.
    ///
    /// Call inside the host's transaction; follow with
    /// [`Attachment::after_commit`] once it commits.
    pub async fn save(&mut self) -> Result<()> {
        if self.dirty {
            self.storage
                .repository()
                .save_file_columns(&self.key, &self.record)
                .await?;
        }
        self.flush_deletes().await?;
        self.flush_writes().await?;
        self.dirty = false;
        Ok(())
    }

    /// Enqueue upload jobs produced by the last save.
    pub async fn after_commit(&mut self) -> Result<()> {
        self.flush_jobs().await
    }

    /// Move staged files into place and schedule uploads.
    ///
    /// Sync flags are cleared before the first file moves. A failed move
    /// returns the error with that style and every later one still staged.
    pub async fn flush_writes(&mut self) -> Result<()> {
        if self.pending_writes.is_empty() {
            return Ok(());
        }

        let deferred = self.spec.definition.delay_processing && self.dirty;
        if !deferred {
            for target in SyncTarget::ALL {
                if self.record.is_synced(target) {
                    self.storage
                        .repository()
                        .set_synced(&self.key, target, false)
                        .await?;
                    self.record.set_synced(target, false);
                }
            }
        }

        let mode = self.storage.config().file_permissions;
        let styles = self.pending_writes.keys().cloned().collect::<Vec<_>>();
        for style in styles {
            let dest = self.filesystem_path(&style).ok_or_else(|| {
                Error::InvalidInput(format!("{} has no file name to write {}", self.key, style))
            })?;
            info!(
                subsystem = "storage",
                component = "attachment",
                op = "flush_writes",
                record_id = self.key.id,
                style = %style,
                path = %dest.display(),
                "Saving to filesystem"
            );
            if let Some(staged) = self.pending_writes.get(&style) {
                filesystem::move_into_place(staged, &dest, mode).await?;
            }
            self.pending_writes.remove(&style);
        }

        if deferred {
            return Ok(());
        }
        for target in self.storage.sync_targets() {
            self.queued_jobs.push(UploadJob::new(target, &self.key));
        }
        Ok(())
    }

    /// Hand queued upload jobs to the job queue.
    ///
    /// Jobs that fail to enqueue stay queued for the next call.
    pub async fn flush_jobs(&mut self) -> Result<()> {
        while let Some(job) = self.queued_jobs.first() {
            let job_id = self.storage.queue().enqueue(job).await?;
            debug!(
                subsystem = "storage",
                component = "attachment",
                op = "flush_jobs",
                record_id = self.key.id,
                sync_target = %job.target,
                job_id = %job_id,
                "Upload job queued"
            );
            self.queued_jobs.remove(0);
        }
        Ok(())
    }

    /// Delete files queued for removal.
    ///
    /// Skipped entirely when both remote flags are set: local copies of a
    /// fully synced attachment have already been removed. A file that cannot
    /// be removed stops the flush with it and later paths still queued.
    pub async fn flush_deletes(&mut self) -> Result<()> {
        if self.record.synced_to_s3 && self.record.synced_to_fog {
            self.pending_deletes.clear();
            return Ok(());
        }

        let root = PathBuf::from(&self.storage.config().root);
        while let Some(path) = self.pending_deletes.first() {
            info!(
                subsystem = "storage",
                component = "attachment",
                op = "flush_deletes",
                record_id = self.key.id,
                path = %path.display(),
                "Deleting local file"
            );
            filesystem::delete_recursive(path, &root).await?;
            self.pending_deletes.remove(0);
        }
        Ok(())
    }

    // =========================================================================
    // REMOTE SYNC
    // =========================================================================

    /// Upload every local variant to `store` and set its sync flag.
    ///
    /// All-or-nothing per target: the flag is only set after every file was
    /// uploaded, with a single conditional update keyed by record id.
    pub async fn write_to(&mut self, store: &dyn ObjectStore) -> Result<WriteOutcome> {
        let target = store.target();
        if self.record.is_synced(target) {
            return Ok(WriteOutcome::AlreadySynced);
        }

        let start = Instant::now();
        let files = self.existing_local_files().await;
        let expected = self.spec.definition.styles.len();
        if files.is_empty() || files.len() < expected {
            return Err(Error::MissingLocalFiles {
                record_id: self.key.id,
                found: files.len(),
                expected,
            });
        }

        let meta = ObjectMeta::long_lived(self.record.content_type.clone());
        for (style, path) in &files {
            let object_key = self.remote_path(style);
            info!(
                subsystem = "storage",
                component = "attachment",
                op = "write_to",
                record_id = self.key.id,
                sync_target = %target,
                style = %style,
                object_key = %object_key,
                "Uploading"
            );
            store.put_file(&object_key, path, &meta).await?;
        }

        let repo = self.storage.repository();
        let rows = repo.set_synced(&self.key, target, true).await?;
        let record_updated = rows == 1;
        if record_updated {
            repo.touch(&self.key).await?;
        } else {
            warn!(
                subsystem = "storage",
                component = "attachment",
                op = "write_to",
                record_id = self.key.id,
                sync_target = %target,
                rows,
                "Record vanished during upload"
            );
        }
        self.record.set_synced(target, true);

        info!(
            subsystem = "storage",
            component = "attachment",
            op = "write_to",
            record_id = self.key.id,
            sync_target = %target,
            file_count = files.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Attachment synced"
        );
        Ok(WriteOutcome::Uploaded {
            files: files.len(),
            record_updated,
        })
    }

    /// Re-read the record's columns from the repository.
    ///
    /// Returns false when the record no longer exists.
    pub async fn reload(&mut self) -> Result<bool> {
        match self.storage.repository().load(&self.key).await? {
            Some(record) => {
                self.record = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove local variants once both remote backends hold them.
    ///
    /// Returns the number of files removed.
    pub async fn delete_local_files(&mut self) -> Result<usize> {
        if !self.reload().await? {
            return Ok(0);
        }
        if !(self.record.synced_to_s3 && self.record.synced_to_fog) {
            return Ok(0);
        }

        let root = PathBuf::from(&self.storage.config().root);
        let files = self.existing_local_files().await;
        for (_, path) in &files {
            info!(
                subsystem = "storage",
                component = "attachment",
                op = "delete_local_files",
                record_id = self.key.id,
                path = %path.display(),
                "Deleting local file"
            );
            filesystem::delete_recursive(path, &root).await?;
        }
        Ok(files.len())
    }
}
