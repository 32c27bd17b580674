use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::report::{NewBlob, StoredBlob, UploadTarget};
use crate::error::AppError;
use crate::storage::paths::PathManager;
use crate::storage::{BlobBackend, BlobReader, new_key};

use axum::body::BodyDataStream;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::SqlitePool;
use tokio::{
    fs::{File, create_dir_all, metadata, remove_dir_all, remove_file, rename},
    io::{self, AsyncReadExt, AsyncWriteExt, BufWriter},
};
use tokio_util::io::StreamReader;

type Result<T> = std::result::Result<T, AppError>;

const SELECT_REPORT: &str = "SELECT key, filename, origin, created_at, size FROM reports";

/// Report data on the local filesystem, report metadata in SQLite.
pub struct FilesystemBackend {
    path_manager: PathManager,
    pool: Arc<SqlitePool>,
}

impl FilesystemBackend {
    pub async fn connect(root: &str, pool: Arc<SqlitePool>) -> Result<Self> {
        sqlx::migrate!("./migrations").run(pool.as_ref()).await?;

        let path_manager = PathManager::new(root);
        create_dir_all(path_manager.uploads_path()).await?;
        create_dir_all(path_manager.blobs_path()).await?;

        Ok(FilesystemBackend { path_manager, pool })
    }

    async fn create_path(&self, path: &str) -> io::Result<PathBuf> {
        let file_path = std::path::Path::new(&path);
        if let Some(parent) = file_path.parent() {
            create_dir_all(parent).await?;
        }
        Ok(file_path.to_path_buf())
    }

    async fn forget_upload(&self, upload_id: &str) {
        let deleted = sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(upload_id)
            .execute(self.pool.as_ref())
            .await;
        if let Err(err) = deleted {
            tracing::warn!(upload_id, "failed to forget upload target: {err}");
        }
    }
}

async fn remove_dir_if_exists(path: &str) -> io::Result<()> {
    match remove_dir_all(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

async fn remove_part(part_path: &str) {
    match remove_file(part_path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => {
            tracing::warn!(part_path, "failed to remove partial upload: {err}");
        }
        _ => {}
    }
}

/// Copies at most `limit` bytes of `stream` into `file`.
async fn write_part(file: File, stream: BodyDataStream, limit: u64) -> Result<u64> {
    // Convert the stream into an `AsyncRead`.
    let body_with_io_error = stream.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);
    let mut limited = body_reader.take(limit.saturating_add(1));

    let mut file_writer = BufWriter::new(file);
    let written = tokio::io::copy(&mut limited, &mut file_writer).await?;
    if written > limit {
        return Err(AppError::ReportTooLarge(limit));
    }
    file_writer.flush().await?;
    Ok(written)
}

#[async_trait::async_trait]
impl BlobBackend for FilesystemBackend {
    async fn create_upload(&self, created_at: DateTime<Utc>) -> Result<UploadTarget> {
        let id = new_key();
        let data_path = self
            .create_path(&self.path_manager.upload_data_path(&id))
            .await?;
        File::create(data_path).await?;

        let inserted = sqlx::query("INSERT INTO uploads (id, created_at) VALUES (?, ?)")
            .bind(&id)
            .bind(created_at)
            .execute(self.pool.as_ref())
            .await;
        if let Err(err) = inserted {
            if let Err(cleanup) = remove_dir_if_exists(&self.path_manager.upload_path(&id)).await {
                tracing::warn!(upload_id = %id, "failed to remove upload directory: {cleanup}");
            }
            return Err(err.into());
        }
        Ok(UploadTarget::new(id))
    }

    async fn write_upload(
        &self,
        upload_id: &str,
        stream: BodyDataStream,
        limit: u64,
    ) -> Result<u64> {
        let data_path = self.path_manager.upload_data_path(upload_id);
        match metadata(&data_path).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(AppError::UploadUnknown(upload_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        // Every request writes its own part, so an interrupted or concurrent
        // write never leaves its bytes in `data`.
        let part_path = self.path_manager.upload_part_path(upload_id, &new_key());
        let file = match File::create(&part_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(AppError::UploadUnknown(upload_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let written = match write_part(file, stream, limit).await {
            Ok(written) => written,
            Err(err) => {
                remove_part(&part_path).await;
                return Err(err);
            }
        };

        match rename(&part_path, &data_path).await {
            Ok(()) => Ok(written),
            Err(err) => {
                remove_part(&part_path).await;
                if err.kind() == ErrorKind::NotFound {
                    // Committed or expired while the body was arriving.
                    return Err(AppError::UploadUnknown(upload_id.to_string()));
                }
                Err(err.into())
            }
        }
    }

    async fn abort_upload(&self, upload_id: &str) -> Result<()> {
        remove_dir_if_exists(&self.path_manager.upload_path(upload_id)).await?;
        sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(upload_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn stale_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let uploads = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT id, created_at FROM uploads ORDER BY created_at",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(uploads
            .into_iter()
            .filter(|(_, created_at)| *created_at <= cutoff)
            .map(|(id, _)| id)
            .collect())
    }

    async fn put(&self, upload_id: &str, blob: NewBlob) -> Result<StoredBlob> {
        let upload_data_path = self.path_manager.upload_data_path(upload_id);
        let size = match metadata(&upload_data_path).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(AppError::UploadUnknown(upload_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let stored = StoredBlob {
            key: new_key(),
            filename: blob.filename,
            origin: blob.origin,
            created_at: blob.created_at,
            size: i64::try_from(size).unwrap_or(i64::MAX),
        };

        let blob_data_path = self
            .create_path(&self.path_manager.blob_data_path(&stored.key))
            .await?;
        rename(&upload_data_path, blob_data_path).await?;
        if let Err(err) = remove_dir_if_exists(&self.path_manager.upload_path(upload_id)).await {
            tracing::warn!(upload_id, "failed to remove upload directory: {err}");
        }
        self.forget_upload(upload_id).await;

        // The row is what makes the report retrievable, so it goes in last.
        let inserted = sqlx::query(
            "INSERT INTO reports (key, filename, origin, created_at, size) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&stored.key)
        .bind(&stored.filename)
        .bind(&stored.origin)
        .bind(stored.created_at)
        .bind(stored.size)
        .execute(self.pool.as_ref())
        .await;
        if let Err(err) = inserted {
            if let Err(cleanup) = remove_dir_if_exists(&self.path_manager.blob_path(&stored.key)).await
            {
                tracing::warn!(key = %stored.key, "failed to remove orphaned report data: {cleanup}");
            }
            return Err(err.into());
        }

        Ok(stored)
    }

    async fn get(&self, key: &str) -> Result<Option<(StoredBlob, BlobReader)>> {
        let Some(blob) = sqlx::query_as::<_, StoredBlob>(&format!("{SELECT_REPORT} WHERE key = ?"))
            .bind(key)
            .fetch_optional(self.pool.as_ref())
            .await?
        else {
            return Ok(None);
        };

        match File::open(self.path_manager.blob_data_path(key)).await {
            Ok(file) => {
                let reader: BlobReader = Box::pin(file);
                Ok(Some((blob, reader)))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!(key, "report metadata exists but its data is missing");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        // Data goes first: a row without data reads as not found and is
        // removed by the next sweep.
        remove_dir_if_exists(&self.path_manager.blob_path(key)).await?;
        let result = sqlx::query("DELETE FROM reports WHERE key = ?")
            .bind(key)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by(
        &self,
        predicate: &(dyn for<'a> Fn(&'a StoredBlob) -> bool + Send + Sync),
    ) -> Result<Vec<StoredBlob>> {
        let blobs = sqlx::query_as::<_, StoredBlob>(&format!("{SELECT_REPORT} ORDER BY created_at"))
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(blobs.into_iter().filter(|blob| predicate(blob)).collect())
    }
}
