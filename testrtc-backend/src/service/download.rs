use crate::error::AppError;
use crate::utils::state::AppState;
use crate::utils::validation::parse_download_file_name;
use axum::extract::{Path, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use axum::response::IntoResponse;
use std::sync::Arc;

/// GET /test-download-file/<size>KB.data
pub async fn get_download_handler(
    State(state): State<Arc<AppState>>,
    Path(file_name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let size_kbytes = parse_download_file_name(&file_name)
        .ok_or_else(|| AppError::OutOfRange(format!("unsupported download file `{file_name}`")))?;

    let payload = state.bytes.serve(size_kbytes)?;

    Ok((
        [
            (CONTENT_TYPE, "application/octet-stream"),
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        payload,
    ))
}
