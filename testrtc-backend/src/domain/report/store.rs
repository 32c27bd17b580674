//! Retention-bounded store for test-page log reports.
//!
//! Uploads go through three steps: a target is issued, the client streams
//! bytes into it, and the upload is completed with the filename and origin
//! the client declared. Only completed uploads with a `testrtc-*.log` name
//! become retrievable. A periodic sweep deletes reports older than the
//! retention period and discards upload targets nobody completed.

use std::sync::Arc;

use axum::body::BodyDataStream;
use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::clock::Clock;
use crate::domain::report::{NewBlob, StoredBlob, StoredReport, UploadTarget};
use crate::error::AppError;
use crate::storage::{BlobBackend, BlobReader};
use crate::utils::validation::{is_valid_id, is_valid_report_filename};

type Result<T> = std::result::Result<T, AppError>;

pub const DEFAULT_RETENTION_DAYS: i64 = 90;
pub const DEFAULT_UPLOAD_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_MAX_REPORT_BYTES: u64 = 16 * 1024 * 1024;

pub struct RetainedBlobStore {
    backend: Arc<dyn BlobBackend>,
    clock: Arc<dyn Clock>,
    retention: TimeDelta,
    upload_ttl: TimeDelta,
    max_report_bytes: u64,
}

impl RetainedBlobStore {
    pub fn new(backend: Arc<dyn BlobBackend>, clock: Arc<dyn Clock>, retention: TimeDelta) -> Self {
        Self {
            backend,
            clock,
            retention,
            upload_ttl: TimeDelta::seconds(DEFAULT_UPLOAD_TTL_SECS as i64),
            max_report_bytes: DEFAULT_MAX_REPORT_BYTES,
        }
    }

    /// Upload targets older than `ttl` are discarded by the next sweep.
    pub fn with_upload_ttl(mut self, ttl: TimeDelta) -> Self {
        self.upload_ttl = ttl;
        self
    }

    pub fn with_max_report_bytes(mut self, limit: u64) -> Self {
        self.max_report_bytes = limit;
        self
    }

    pub fn retention(&self) -> TimeDelta {
        self.retention
    }

    pub async fn begin_upload(&self) -> Result<UploadTarget> {
        let target = self.backend.create_upload(self.clock.now_utc()).await?;
        tracing::debug!(upload_id = %target.id, "issued upload target");
        Ok(target)
    }

    /// Streams request bytes into a previously issued upload target.
    ///
    /// Each call carries the whole file and replaces whatever an earlier
    /// call left in the target.
    pub async fn receive(&self, upload_id: &str, stream: BodyDataStream) -> Result<u64> {
        if !is_valid_id(upload_id) {
            return Err(AppError::UploadUnknown(upload_id.to_string()));
        }
        self.backend
            .write_upload(upload_id, stream, self.max_report_bytes)
            .await
    }

    /// Commits a fully received upload.
    ///
    /// The filename is checked only now, after every byte arrived and before
    /// the report can be fetched. A rejected upload is discarded.
    pub async fn complete_upload(
        &self,
        origin: &str,
        filename: &str,
        upload_id: &str,
    ) -> Result<StoredReport> {
        if !is_valid_id(upload_id) {
            return Err(AppError::UploadUnknown(upload_id.to_string()));
        }

        if !is_valid_report_filename(filename) {
            if let Err(err) = self.backend.abort_upload(upload_id).await {
                tracing::warn!(upload_id, "failed to discard rejected upload: {err}");
            }
            return Err(AppError::InvalidFilename(filename.to_string()));
        }

        let blob = NewBlob {
            filename: filename.to_string(),
            origin: origin.to_string(),
            created_at: self.clock.now_utc(),
        };
        let stored = self.backend.put(upload_id, blob).await?;
        tracing::info!(
            key = %stored.key,
            filename = %stored.filename,
            size = stored.size,
            "stored report"
        );

        Ok(StoredReport {
            origin: stored.origin,
            key: stored.key,
        })
    }

    /// `key` must already be URL-unescaped.
    pub async fn fetch(&self, key: &str) -> Result<(StoredBlob, BlobReader)> {
        if !is_valid_id(key) {
            return Err(AppError::NotFound(key.to_string()));
        }
        self.backend
            .get(key)
            .await?
            .ok_or_else(|| AppError::NotFound(key.to_string()))
    }

    /// Sweeps with the configured retention period.
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.sweep(self.retention).await
    }

    /// Deletes every `testrtc-*.log` report created at or before
    /// `now - retention` and returns how many were deleted.
    ///
    /// The cutoff is taken once, so reports uploaded while the sweep runs
    /// survive. A failed delete is logged and the sweep moves on. Upload
    /// targets past their TTL are discarded in the same pass.
    pub async fn sweep(&self, retention: TimeDelta) -> Result<usize> {
        let now = self.clock.now_utc();
        let cutoff = now
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidates = self
            .backend
            .list_by(&|blob| blob.created_at <= cutoff)
            .await
            .map_err(|err| AppError::BackendUnavailable(err.to_string()))?;

        let mut deleted = 0;
        let mut failed = 0;
        for blob in candidates {
            if !is_valid_report_filename(&blob.filename) {
                tracing::debug!(key = %blob.key, filename = %blob.filename, "skipping non-report blob");
                continue;
            }
            match self.backend.delete(&blob.key).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    failed += 1;
                    tracing::warn!(key = %blob.key, "failed to delete expired report: {err}");
                }
            }
        }

        if failed > 0 {
            tracing::error!(deleted, failed, %cutoff, "retention sweep finished with failures");
        } else {
            tracing::info!(deleted, %cutoff, "retention sweep finished");
        }

        self.discard_abandoned_uploads(now).await;
        Ok(deleted)
    }

    /// Aborts upload targets issued at or before `now - upload_ttl`.
    async fn discard_abandoned_uploads(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now
            .checked_sub_signed(self.upload_ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale = match self.backend.stale_uploads(cutoff).await {
            Ok(stale) => stale,
            Err(err) => {
                tracing::warn!("failed to list abandoned upload targets: {err}");
                return 0;
            }
        };

        let mut discarded = 0;
        for upload_id in stale {
            match self.backend.abort_upload(&upload_id).await {
                Ok(()) => discarded += 1,
                Err(err) => {
                    tracing::warn!(upload_id, "failed to discard abandoned upload: {err}");
                }
            }
        }
        if discarded > 0 {
            tracing::info!(discarded, %cutoff, "discarded abandoned upload targets");
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::storage::driver::memory::MemoryBackend;
    use axum::body::Body;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;

    struct Fixture {
        store: RetainedBlobStore,
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = RetainedBlobStore::new(
            backend.clone(),
            clock.clone(),
            TimeDelta::days(DEFAULT_RETENTION_DAYS),
        );
        Fixture {
            store,
            backend,
            clock,
        }
    }

    async fn upload(store: &RetainedBlobStore, filename: &str, content: &str) -> Result<StoredReport> {
        let target = store.begin_upload().await?;
        store
            .receive(&target.id, Body::from(content.to_string()).into_data_stream())
            .await?;
        store
            .complete_upload("https://test.webrtc.org", filename, &target.id)
            .await
    }

    async fn content_of(store: &RetainedBlobStore, key: &str) -> Vec<u8> {
        let (_, mut reader) = store.fetch(key).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    async fn count(backend: &MemoryBackend) -> usize {
        backend.list_by(&|_| true).await.unwrap().len()
    }

    #[tokio::test]
    async fn upload_then_fetch_round_trips() {
        let f = fixture();
        let report = upload(&f.store, "testrtc-abc.log", "log line").await.unwrap();
        assert_eq!(report.origin, "https://test.webrtc.org");
        assert_eq!(content_of(&f.store, &report.key).await, b"log line");

        let (blob, _) = f.store.fetch(&report.key).await.unwrap();
        assert_eq!(blob.filename, "testrtc-abc.log");
        assert_eq!(blob.created_at, f.clock.now_utc());
    }

    #[tokio::test]
    async fn rejects_foreign_filenames_without_persisting() {
        let f = fixture();
        let target = f.store.begin_upload().await.unwrap();
        f.store
            .receive(&target.id, Body::from("payload").into_data_stream())
            .await
            .unwrap();
        let err = f
            .store
            .complete_upload("https://evil.example", "evil.log", &target.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidFilename(name) if name == "evil.log"));
        assert_eq!(count(&f.backend).await, 0);

        // The discarded target cannot be completed afterwards.
        let err = f
            .store
            .complete_upload("https://evil.example", "testrtc-x.log", &target.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UploadUnknown(_)));
    }

    #[tokio::test]
    async fn unknown_keys_and_targets() {
        let f = fixture();
        let random = crate::storage::new_key();
        assert!(matches!(f.store.fetch(&random).await, Err(AppError::NotFound(_))));
        assert!(matches!(f.store.fetch("../secret").await, Err(AppError::NotFound(_))));

        let err = f
            .store
            .receive("../../etc", Body::from("x").into_data_stream())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UploadUnknown(_)));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_reports() {
        let f = fixture();
        let start = f.clock.now_utc();

        let expired = upload(&f.store, "testrtc-old.log", "old").await.unwrap();
        let foreign = {
            // Something else sharing the backend namespace, just as old.
            let target = f.backend.create_upload(start).await.unwrap();
            f.backend
                .put(
                    &target.id,
                    NewBlob {
                        filename: "backup.tar".into(),
                        origin: "internal".into(),
                        created_at: start,
                    },
                )
                .await
                .unwrap()
        };

        f.clock.advance(TimeDelta::days(60));
        let recent = upload(&f.store, "testrtc-new.log", "new").await.unwrap();

        f.clock.advance(TimeDelta::days(30));
        assert_eq!(f.store.sweep(TimeDelta::days(90)).await.unwrap(), 1);

        assert!(matches!(f.store.fetch(&expired.key).await, Err(AppError::NotFound(_))));
        assert_eq!(content_of(&f.store, &recent.key).await, b"new");
        assert!(f.backend.get(&foreign.key).await.unwrap().is_some());

        // Running again right away finds nothing more to delete.
        assert_eq!(f.store.sweep_expired().await.unwrap(), 0);
        assert_eq!(count(&f.backend).await, 2);
    }

    #[tokio::test]
    async fn blob_exactly_at_cutoff_is_expired() {
        let f = fixture();
        upload(&f.store, "testrtc-edge.log", "edge").await.unwrap();
        f.clock.advance(TimeDelta::days(90) - TimeDelta::seconds(1));
        assert_eq!(f.store.sweep_expired().await.unwrap(), 0);
        f.clock.advance(TimeDelta::seconds(1));
        assert_eq!(f.store.sweep_expired().await.unwrap(), 1);
    }

    /// Moves the clock forward a day for every blob the listing inspects and
    /// every delete issued, as if uploads kept arriving while the sweep runs.
    struct TickingBackend {
        inner: MemoryBackend,
        clock: Arc<ManualClock>,
        deletes: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait::async_trait]
    impl BlobBackend for TickingBackend {
        async fn create_upload(&self, created_at: DateTime<Utc>) -> Result<UploadTarget> {
            self.inner.create_upload(created_at).await
        }
        async fn write_upload(
            &self,
            upload_id: &str,
            stream: BodyDataStream,
            limit: u64,
        ) -> Result<u64> {
            self.inner.write_upload(upload_id, stream, limit).await
        }
        async fn abort_upload(&self, upload_id: &str) -> Result<()> {
            self.inner.abort_upload(upload_id).await
        }
        async fn stale_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
            self.inner.stale_uploads(cutoff).await
        }
        async fn put(&self, upload_id: &str, blob: NewBlob) -> Result<StoredBlob> {
            self.inner.put(upload_id, blob).await
        }
        async fn get(&self, key: &str) -> Result<Option<(StoredBlob, BlobReader)>> {
            self.inner.get(key).await
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            self.clock.advance(TimeDelta::days(1));
            if self.deletes.fetch_add(1, Ordering::SeqCst) == 0 && self.fail_first {
                return Err(AppError::BackendUnavailable("disk full".into()));
            }
            self.inner.delete(key).await
        }
        async fn list_by(
            &self,
            predicate: &(dyn for<'a> Fn(&'a StoredBlob) -> bool + Send + Sync),
        ) -> Result<Vec<StoredBlob>> {
            let all = self.inner.list_by(&|_| true).await?;
            Ok(all
                .into_iter()
                .filter(|blob| {
                    self.clock.advance(TimeDelta::days(1));
                    predicate(blob)
                })
                .collect())
        }
    }

    fn ticking_store(fail_first: bool) -> (RetainedBlobStore, Arc<TickingBackend>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(1000)));
        let backend = Arc::new(TickingBackend {
            inner: MemoryBackend::new(),
            clock: clock.clone(),
            deletes: AtomicUsize::new(0),
            fail_first,
        });
        let store = RetainedBlobStore::new(backend.clone(), clock.clone(), TimeDelta::days(90));
        (store, backend, clock)
    }

    #[tokio::test]
    async fn cutoff_is_taken_once_per_sweep() {
        let (store, backend, clock) = ticking_store(false);
        upload(&store, "testrtc-1.log", "1").await.unwrap();
        upload(&store, "testrtc-2.log", "2").await.unwrap();
        clock.advance(TimeDelta::days(90));
        let borderline = upload(&store, "testrtc-3.log", "3").await.unwrap();
        clock.advance(TimeDelta::days(89));

        // Every inspected blob and every delete moves the clock a day, which
        // would expire the third report if the cutoff were recomputed.
        assert_eq!(store.sweep_expired().await.unwrap(), 2);
        assert!(backend.get(&borderline.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_delete_does_not_abort_the_sweep() {
        let (store, backend, clock) = ticking_store(true);
        for i in 0..3 {
            upload(&store, &format!("testrtc-{i}.log"), "x").await.unwrap();
        }
        clock.advance(TimeDelta::days(100));

        assert_eq!(store.sweep_expired().await.unwrap(), 2);
        assert_eq!(backend.inner.list_by(&|_| true).await.unwrap().len(), 1);
        // The survivor goes on the next run.
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sweep_discards_abandoned_upload_targets() {
        let f = fixture();
        let mut abandoned = Vec::new();
        for _ in 0..3 {
            abandoned.push(f.store.begin_upload().await.unwrap());
        }
        f.clock.advance(TimeDelta::seconds(DEFAULT_UPLOAD_TTL_SECS as i64));
        let pending = f.store.begin_upload().await.unwrap();

        assert_eq!(f.store.sweep_expired().await.unwrap(), 0);
        assert_eq!(
            f.backend.stale_uploads(DateTime::<Utc>::MAX_UTC).await.unwrap(),
            vec![pending.id.clone()]
        );
        for target in abandoned {
            let err = f
                .store
                .receive(&target.id, Body::from("late").into_data_stream())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::UploadUnknown(_)));
        }

        // A target younger than the TTL can still be completed.
        f.store
            .receive(&pending.id, Body::from("in time").into_data_stream())
            .await
            .unwrap();
        let report = f
            .store
            .complete_upload("https://test.webrtc.org", "testrtc-late.log", &pending.id)
            .await
            .unwrap();
        assert_eq!(content_of(&f.store, &report.key).await, b"in time");
    }

    #[tokio::test]
    async fn retried_upload_replaces_earlier_attempt() {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = RetainedBlobStore::new(backend, clock, TimeDelta::days(DEFAULT_RETENTION_DAYS))
            .with_max_report_bytes(16);
        let target = store.begin_upload().await.unwrap();

        let err = store
            .receive(&target.id, Body::from("x".repeat(17)).into_data_stream())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ReportTooLarge(16)));

        store
            .receive(&target.id, Body::from("first attempt").into_data_stream())
            .await
            .unwrap();
        store
            .receive(&target.id, Body::from("retry").into_data_stream())
            .await
            .unwrap();
        let report = store
            .complete_upload("https://test.webrtc.org", "testrtc-r.log", &target.id)
            .await
            .unwrap();
        assert_eq!(content_of(&store, &report.key).await, b"retry");
    }
}
