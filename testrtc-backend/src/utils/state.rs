use crate::config::Config;
use crate::domain::buffer::ByteBufferServer;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::report::RetainedBlobStore;
use crate::error::AppError;
use crate::storage::{self, BlobBackend};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub bytes: Arc<ByteBufferServer>,
    pub reports: Arc<RetainedBlobStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let bytes = ByteBufferServer::initialize(config.seed_len, config.repeat_count)?;
        let backend = storage::connect(&config).await?;
        Ok(Self::with_parts(config, bytes, backend, Arc::new(SystemClock)))
    }

    pub fn with_parts(
        config: Config,
        bytes: ByteBufferServer,
        backend: Arc<dyn BlobBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reports = RetainedBlobStore::new(backend, clock, config.retention())
            .with_upload_ttl(config.upload_ttl())
            .with_max_report_bytes(config.max_report_bytes);
        AppState {
            bytes: Arc::new(bytes),
            reports: Arc::new(reports),
            config: Arc::new(config),
        }
    }
}
