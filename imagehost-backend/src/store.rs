//! Image files on disk and their rows in the `images` table.
//!

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::entity::image;
use crate::naming::{base_name, is_stored_name, unique_name};

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("filesystem error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Bytes of a stored image and the content type to serve them with.
#[derive(Debug)]
pub struct StoredImage {
    pub record: Option<image::Model>,
    pub content: Vec<u8>,
    pub content_type: String,
}

/// What [`ImageStore::reconcile`] found and cleaned up.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orphan_files_removed: Vec<String>,
    /// Orphans left in place because the table is empty, which points at the wrong database.
    pub orphan_files_skipped: Vec<String>,
    pub partial_uploads_removed: Vec<String>,
    /// Rows whose file is missing. Only removed when pruning was asked for.
    pub missing_files: Vec<String>,
    pub dangling_rows_removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_files_removed.is_empty()
            && self.orphan_files_skipped.is_empty()
            && self.partial_uploads_removed.is_empty()
            && self.missing_files.is_empty()
            && self.dangling_rows_removed.is_empty()
    }
}

/// Content type to serve a stored image with. Anything a browser could run as a document
/// is served as opaque bytes instead.
pub fn servable_content_type(mime_type: &str) -> &str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.starts_with("image/") && essence != "image/svg+xml" {
        mime_type
    } else {
        FALLBACK_CONTENT_TYPE
    }
}

/// A file that is removed when dropped unless [`PendingFile::keep`] is called first.
///
/// Covers the request being cancelled, for example by the timeout layer, between writing the
/// file and committing its row.
#[derive(Debug)]
struct PendingFile {
    path: Option<PathBuf>,
}

impl PendingFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn keep(mut self) {
        self.path.take();
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => warn!("[FS] Removed uncommitted file {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => error!(
                "[FS] Couldn't remove uncommitted file {}: {:?}",
                path.display(),
                err
            ),
        }
    }
}

fn partial_name(stored_name: &str) -> String {
    format!(".{stored_name}{PARTIAL_SUFFIX}")
}

fn is_partial_name(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(PARTIAL_SUFFIX))
        .is_some_and(is_stored_name)
}

/// Keeps the image directory and the `images` table in step.
#[derive(Clone, Debug)]
pub struct ImageStore {
    conn: DatabaseConnection,
    images_path: PathBuf,
}

impl ImageStore {
    pub fn new(conn: DatabaseConnection, images_path: impl Into<PathBuf>) -> Self {
        Self {
            conn,
            images_path: images_path.into(),
        }
    }

    pub fn images_path(&self) -> &Path {
        &self.images_path
    }

    /// Path of a stored image, `None` if `stored_name` isn't something we would have generated.
    pub fn path_for(&self, stored_name: &str) -> Option<PathBuf> {
        is_stored_name(stored_name).then(|| self.images_path.join(stored_name))
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.images_path)
            .await
            .map_err(|err| StorageError::io(&self.images_path, err))
    }

    /// Writes to a hidden temporary file first and renames it into place, so a failed write
    /// never leaves a truncated image under the final name. The returned guard removes the
    /// file again unless it is kept.
    async fn write_file(
        &self,
        stored_name: &str,
        content: &[u8],
    ) -> Result<PendingFile, StorageError> {
        let final_path = self.images_path.join(stored_name);
        let partial_path = self.images_path.join(partial_name(stored_name));
        let partial = PendingFile::new(partial_path.clone());

        let written = async {
            let mut file = tokio::fs::File::create(&partial_path).await?;
            file.write_all(content).await?;
            file.sync_all().await?;
            tokio::fs::rename(&partial_path, &final_path).await
        }
        .await;

        if let Err(err) = written {
            drop(partial);
            return Err(StorageError::io(&final_path, err));
        }
        // renamed away, nothing left to clean up under the partial name
        partial.keep();
        Ok(PendingFile::new(final_path))
    }

    /// Removes a file, logging rather than returning failures.
    async fn remove_file_logged(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!("[FS] File {} has been deleted.", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("[FS] File {} was already gone", path.display())
            }
            Err(err) => error!("[FS] Error deleting file {}: {:?}", path.display(), err),
        }
    }

    /// Stores an accepted upload and records it.
    ///
    /// The row is inserted inside a transaction that is only committed once the file is in
    /// place. A failed write rolls the row back. A failed or abandoned commit removes the file.
    pub async fn store(
        &self,
        original_filename: &str,
        content: &[u8],
        mime_type: &str,
        uploaded_at: Option<DateTime<Utc>>,
    ) -> Result<image::Model, StorageError> {
        self.ensure_dir().await?;

        let stored_name = unique_name(original_filename);
        let txn = self.conn.begin().await?;

        let record = image::ActiveModel {
            stored_name: Set(stored_name.clone()),
            original_name: Set(base_name(original_filename).to_string()),
            size_bytes: Set(content.len() as i64),
            uploaded_at: Set(uploaded_at.unwrap_or_else(Utc::now)),
            mime_type: Set(mime_type.to_string()),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .inspect_err(|err| error!("[DB] Insert failed for {}: {:?}", stored_name, err))?;

        let file = match self.write_file(&stored_name, content).await {
            Ok(file) => file,
            Err(err) => {
                error!("[FS] Failed to write {}: {:?}", stored_name, err);
                if let Err(rollback_err) = txn.rollback().await {
                    error!(
                        "[DB] Rollback failed for {}: {:?}",
                        stored_name, rollback_err
                    );
                }
                return Err(err);
            }
        };

        if let Err(err) = txn.commit().await {
            error!("[DB] Commit failed for {}: {:?}", stored_name, err);
            return Err(err.into());
        }
        file.keep();

        info!(
            "Stored {} as {} ({} bytes)",
            record.original_name, record.stored_name, record.size_bytes
        );
        Ok(record)
    }

    /// Every record, newest first by id.
    pub async fn list_all(&self) -> Result<Vec<image::Model>, StorageError> {
        Ok(image::Entity::find()
            .order_by_desc(image::Column::Id)
            .all(&self.conn)
            .await?)
    }

    /// A window of records, newest first by upload time. An offset past the end is an empty page.
    pub async fn list_page(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<image::Model>, StorageError> {
        Ok(image::Entity::find()
            .order_by_desc(image::Column::UploadedAt)
            .order_by_desc(image::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&self.conn)
            .await?)
    }

    pub async fn count(&self) -> Result<u64, StorageError> {
        Ok(image::Entity::find().count(&self.conn).await?)
    }

    pub async fn find(&self, stored_name: &str) -> Result<Option<image::Model>, StorageError> {
        if !is_stored_name(stored_name) {
            return Ok(None);
        }
        Ok(image::Entity::find()
            .filter(image::Column::StoredName.eq(stored_name))
            .one(&self.conn)
            .await?)
    }

    /// Reads a stored image back. `None` if there's no such file.
    pub async fn fetch(&self, stored_name: &str) -> Result<Option<StoredImage>, StorageError> {
        let Some(path) = self.path_for(stored_name) else {
            debug!("Refusing to read unexpected name {:?}", stored_name);
            return Ok(None);
        };

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("Image not found: {}", stored_name);
                return Ok(None);
            }
            Err(err) => return Err(StorageError::io(&path, err)),
        };

        let record = self.find(stored_name).await?;
        let content_type = record
            .as_ref()
            .map(|r| servable_content_type(&r.mime_type))
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();

        Ok(Some(StoredImage {
            record,
            content,
            content_type,
        }))
    }

    /// Deletes the row, then the file. Returns whether a row was removed.
    ///
    /// A missing row is not an error. File removal is best-effort and only logged.
    pub async fn delete(&self, stored_name: &str) -> Result<bool, StorageError> {
        let Some(path) = self.path_for(stored_name) else {
            debug!("Ignoring delete of unexpected name {:?}", stored_name);
            return Ok(false);
        };

        let res = image::Entity::delete_many()
            .filter(image::Column::StoredName.eq(stored_name))
            .exec(&self.conn)
            .await
            .inspect_err(|err| error!("[DB] Error deleting {}: {:?}", stored_name, err))?;

        if res.rows_affected > 0 {
            info!("[DB] Record for {} has been deleted.", stored_name);
        } else {
            debug!("[DB] No record for {}", stored_name);
        }

        self.remove_file_logged(&path).await;

        Ok(res.rows_affected > 0)
    }

    /// Removes drift between the directory and the table.
    ///
    /// Leftover partial uploads are deleted. Files shaped like stored names with no row are
    /// deleted, unless the table is empty. Rows whose file is missing are only reported,
    /// or deleted when `prune_missing` is set and at least one stored file was found; an
    /// empty directory next to a populated table means the wrong directory, not lost files.
    /// Anything else in the directory is left alone.
    /// Meant to run before the server accepts uploads; an upload in flight would look like drift.
    pub async fn reconcile(&self, prune_missing: bool) -> Result<ReconcileReport, StorageError> {
        self.ensure_dir().await?;

        let known: HashSet<String> = image::Entity::find()
            .select_only()
            .column(image::Column::StoredName)
            .into_tuple::<String>()
            .all(&self.conn)
            .await?
            .into_iter()
            .collect();

        let mut report = ReconcileReport::default();
        let mut present = HashSet::new();
        let mut orphans = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.images_path)
            .await
            .map_err(|err| StorageError::io(&self.images_path, err))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StorageError::io(&self.images_path, err))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_file {
                continue;
            }

            if is_partial_name(&name) {
                self.remove_file_logged(&entry.path()).await;
                report.partial_uploads_removed.push(name);
            } else if is_stored_name(&name) {
                if known.contains(&name) {
                    present.insert(name);
                } else {
                    orphans.push((name, entry.path()));
                }
            }
        }

        if known.is_empty() && !orphans.is_empty() {
            warn!(
                "The images table is empty but {} has {} stored images, leaving them alone",
                self.images_path.display(),
                orphans.len()
            );
            report.orphan_files_skipped = orphans.into_iter().map(|(name, _)| name).collect();
        } else {
            for (name, path) in orphans {
                warn!("Removing orphan file {}", name);
                self.remove_file_logged(&path).await;
                report.orphan_files_removed.push(name);
            }
        }

        report.missing_files = known.difference(&present).cloned().collect();
        report.missing_files.sort();
        for name in report.missing_files.iter() {
            warn!("File for record {} is missing", name);
        }

        if prune_missing && !report.missing_files.is_empty() {
            if present.is_empty() {
                error!(
                    "None of the {} recorded images are in {}, refusing to prune records",
                    known.len(),
                    self.images_path.display()
                );
            } else {
                for name in report.missing_files.iter() {
                    warn!("Removing record {} whose file is missing", name);
                    image::Entity::delete_many()
                        .filter(image::Column::StoredName.eq(name.as_str()))
                        .exec(&self.conn)
                        .await?;
                    report.dangling_rows_removed.push(name.clone());
                }
            }
        }

        report.orphan_files_removed.sort();
        report.orphan_files_skipped.sort();
        report.partial_uploads_removed.sort();

        if report.is_clean() {
            debug!("Image directory and table agree");
        } else {
            info!("Reconciled image storage: {:?}", report);
        }
        Ok(report)
    }
}
