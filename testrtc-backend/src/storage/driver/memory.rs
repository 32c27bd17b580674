use std::collections::HashMap;
use std::io::Cursor;

use axum::body::{BodyDataStream, Bytes};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio::io::{self, AsyncReadExt};
use tokio::sync::RwLock;
use tokio_util::io::StreamReader;

use crate::domain::report::{NewBlob, StoredBlob, UploadTarget};
use crate::error::AppError;
use crate::storage::{BlobBackend, BlobReader, new_key};

type Result<T> = std::result::Result<T, AppError>;

struct PendingUpload {
    created_at: DateTime<Utc>,
    data: Vec<u8>,
}

/// Keeps everything in process memory. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    uploads: RwLock<HashMap<String, PendingUpload>>,
    blobs: RwLock<HashMap<String, (StoredBlob, Bytes)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BlobBackend for MemoryBackend {
    async fn create_upload(&self, created_at: DateTime<Utc>) -> Result<UploadTarget> {
        let id = new_key();
        let pending = PendingUpload {
            created_at,
            data: Vec::new(),
        };
        self.uploads.write().await.insert(id.clone(), pending);
        Ok(UploadTarget::new(id))
    }

    async fn write_upload(
        &self,
        upload_id: &str,
        stream: BodyDataStream,
        limit: u64,
    ) -> Result<u64> {
        if !self.uploads.read().await.contains_key(upload_id) {
            return Err(AppError::UploadUnknown(upload_id.to_string()));
        }

        // Buffer outside the lock, the body may be slow to arrive.
        let body_reader = StreamReader::new(stream.map_err(io::Error::other));
        futures::pin_mut!(body_reader);
        let mut content = Vec::new();
        body_reader
            .take(limit.saturating_add(1))
            .read_to_end(&mut content)
            .await?;
        if content.len() as u64 > limit {
            return Err(AppError::ReportTooLarge(limit));
        }

        let written = content.len() as u64;
        let mut uploads = self.uploads.write().await;
        let pending = uploads
            .get_mut(upload_id)
            .ok_or_else(|| AppError::UploadUnknown(upload_id.to_string()))?;
        pending.data = content;
        Ok(written)
    }

    async fn abort_upload(&self, upload_id: &str) -> Result<()> {
        self.uploads.write().await.remove(upload_id);
        Ok(())
    }

    async fn stale_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let uploads = self.uploads.read().await;
        Ok(uploads
            .iter()
            .filter(|(_, pending)| pending.created_at <= cutoff)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn put(&self, upload_id: &str, blob: NewBlob) -> Result<StoredBlob> {
        let data = self
            .uploads
            .write()
            .await
            .remove(upload_id)
            .map(|pending| pending.data)
            .ok_or_else(|| AppError::UploadUnknown(upload_id.to_string()))?;

        let stored = StoredBlob {
            key: new_key(),
            filename: blob.filename,
            origin: blob.origin,
            created_at: blob.created_at,
            size: data.len() as i64,
        };
        self.blobs
            .write()
            .await
            .insert(stored.key.clone(), (stored.clone(), Bytes::from(data)));
        Ok(stored)
    }

    async fn get(&self, key: &str) -> Result<Option<(StoredBlob, BlobReader)>> {
        let blobs = self.blobs.read().await;
        Ok(blobs.get(key).map(|(blob, content)| {
            let reader: BlobReader = Box::pin(Cursor::new(content.clone()));
            (blob.clone(), reader)
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn list_by(
        &self,
        predicate: &(dyn for<'a> Fn(&'a StoredBlob) -> bool + Send + Sync),
    ) -> Result<Vec<StoredBlob>> {
        let blobs = self.blobs.read().await;
        let mut matched: Vec<StoredBlob> = blobs
            .values()
            .map(|(blob, _)| blob)
            .filter(|blob| predicate(*blob))
            .cloned()
            .collect();
        matched.sort_by_key(|blob| blob.created_at);
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::TimeDelta;

    fn new_blob() -> NewBlob {
        NewBlob {
            filename: "testrtc-mem.log".to_string(),
            origin: "http://localhost".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn committed_upload_is_readable_once_put() {
        let backend = MemoryBackend::new();
        let target = backend.create_upload(Utc::now()).await.unwrap();
        backend
            .write_upload(&target.id, Body::from("hello").into_data_stream(), u64::MAX)
            .await
            .unwrap();
        assert!(backend.list_by(&|_| true).await.unwrap().is_empty());

        let stored = backend.put(&target.id, new_blob()).await.unwrap();
        assert_eq!(stored.size, 5);

        let (_, mut reader) = backend.get(&stored.key).await.unwrap().unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "hello");

        // The upload target is consumed by the commit.
        let err = backend.put(&target.id, new_blob()).await.unwrap_err();
        assert!(matches!(err, AppError::UploadUnknown(_)));
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let backend = MemoryBackend::new();
        let target = backend.create_upload(Utc::now()).await.unwrap();
        let stored = backend.put(&target.id, new_blob()).await.unwrap();

        assert!(backend.delete(&stored.key).await.unwrap());
        assert!(!backend.delete(&stored.key).await.unwrap());
        assert!(backend.get(&stored.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn each_write_replaces_the_content() {
        let backend = MemoryBackend::new();
        let target = backend.create_upload(Utc::now()).await.unwrap();
        for body in ["partial", "full"] {
            backend
                .write_upload(&target.id, Body::from(body).into_data_stream(), u64::MAX)
                .await
                .unwrap();
        }

        let err = backend
            .write_upload(&target.id, Body::from("x".repeat(9)).into_data_stream(), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ReportTooLarge(8)));

        let stored = backend.put(&target.id, new_blob()).await.unwrap();
        assert_eq!(stored.size, 4);
    }

    #[tokio::test]
    async fn lists_uncommitted_targets_by_age() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let old = backend.create_upload(now - TimeDelta::hours(2)).await.unwrap();
        let committed = backend.create_upload(now - TimeDelta::hours(2)).await.unwrap();
        backend.put(&committed.id, new_blob()).await.unwrap();
        backend.create_upload(now).await.unwrap();

        let stale = backend.stale_uploads(now - TimeDelta::hours(1)).await.unwrap();
        assert_eq!(stale, vec![old.id]);
    }
}
