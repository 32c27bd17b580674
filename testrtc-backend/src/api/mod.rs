use std::sync::Arc;

use axum::Router;
use axum::routing::{get, head, post};
use tower_http::trace::TraceLayer;

use crate::service::download::get_download_handler;
use crate::service::report::{get_report_handler, head_new_report_handler, post_report_handler};
use crate::service::tasks::clean_blobstore_handler;
use crate::utils::state::AppState;

/// Routes reachable by the test page.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/test-download-file/{file_name}", get(get_download_handler))
        .nest("/report", report_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Routes for scheduled tasks. Never merge these into the public router.
pub fn create_internal_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tasks/blobstore/clean", get(clean_blobstore_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn report_router() -> Router<Arc<AppState>> {
    Router::new()
        // Issue an upload target
        .route("/new", head(head_new_report_handler))
        // Receive and commit an upload
        .route("/upload/{upload_id}", post(post_report_handler))
        // Fetch a stored report
        .route("/{key}", get(get_report_handler))
}
