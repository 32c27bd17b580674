use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use tokio::task::JoinHandle;

use crate::domain::report::RetainedBlobStore;
use crate::error::AppError;
use crate::utils::state::AppState;

/// GET /tasks/blobstore/clean
///
/// Served on the internal listener only.
pub async fn clean_blobstore_handler(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    state.reports.sweep_expired().await?;
    Ok(StatusCode::OK)
}

/// Spawn a background task that sweeps expired reports every `interval`.
pub fn spawn_retention_sweep(store: Arc<RetainedBlobStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match store.sweep_expired().await {
                Ok(deleted) => {
                    tracing::debug!(deleted, "scheduled retention sweep done");
                }
                Err(e) => {
                    tracing::error!("scheduled retention sweep failed: {e}");
                }
            }
        }
    })
}
