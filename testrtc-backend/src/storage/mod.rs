use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::BodyDataStream;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::io::AsyncRead;

use crate::config::Config;
use crate::domain::report::{NewBlob, StoredBlob, UploadTarget};
use crate::error::AppError;
use crate::storage::driver::filesystem::FilesystemBackend;
use crate::storage::driver::memory::MemoryBackend;

pub mod driver;
pub mod paths;

type Result<T> = std::result::Result<T, AppError>;

pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// A key-addressed blob store the report facade can sit on.
///
/// Bytes first land in an upload target and only become retrievable once
/// [`BlobBackend::put`] commits them under a freshly assigned key.
#[async_trait::async_trait]
pub trait BlobBackend: Send + Sync {
    async fn create_upload(&self, created_at: DateTime<Utc>) -> Result<UploadTarget>;
    /// Replaces the content of an upload target with the whole of `stream`.
    ///
    /// Fails with [`AppError::ReportTooLarge`] once more than `limit` bytes
    /// arrive. A failed write leaves the previous content untouched.
    async fn write_upload(
        &self,
        upload_id: &str,
        stream: BodyDataStream,
        limit: u64,
    ) -> Result<u64>;
    async fn abort_upload(&self, upload_id: &str) -> Result<()>;
    /// Ids of upload targets created at or before `cutoff` and never committed.
    async fn stale_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
    async fn put(&self, upload_id: &str, blob: NewBlob) -> Result<StoredBlob>;
    async fn get(&self, key: &str) -> Result<Option<(StoredBlob, BlobReader)>>;
    /// Returns `false` when no blob was stored under `key`.
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn list_by(
        &self,
        predicate: &(dyn for<'a> Fn(&'a StoredBlob) -> bool + Send + Sync),
    ) -> Result<Vec<StoredBlob>>;
}

pub fn new_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub async fn connect(config: &Config) -> Result<Arc<dyn BlobBackend>> {
    let backend: Arc<dyn BlobBackend> = match config.storage_typ.as_str() {
        "MEMORY" => Arc::new(MemoryBackend::new()),
        "FILESYSTEM" => Arc::new(connect_filesystem(config).await?),
        other => {
            tracing::warn!("unknown storage type `{other}`, falling back to FILESYSTEM");
            Arc::new(connect_filesystem(config).await?)
        }
    };
    Ok(backend)
}

async fn connect_filesystem(config: &Config) -> Result<FilesystemBackend> {
    let options = SqliteConnectOptions::from_str(&config.db_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(12)
        .connect_with(options)
        .await?;
    FilesystemBackend::connect(&config.root_dir, Arc::new(pool)).await
}
