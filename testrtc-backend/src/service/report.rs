use crate::error::AppError;
use crate::utils::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, ORIGIN};
use axum::response::IntoResponse;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// Carries urls back to the test page; the page reads headers, not bodies.
pub const RESPONSE_TEXT: HeaderName = HeaderName::from_static("response-text");
pub const X_FILE_NAME: HeaderName = HeaderName::from_static("x-file-name");

/// HEAD /report/new
pub async fn head_new_report_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let target = state.reports.begin_upload().await?;
    let location = target.location(&state.config.public_url);
    Ok([(RESPONSE_TEXT, location)])
}

/// POST /report/upload/<upload_id>
pub async fn post_report_handler(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    let origin = header_str(&headers, &ORIGIN).ok_or(AppError::MissingHeader("Origin"))?;
    let filename =
        header_str(&headers, &X_FILE_NAME).ok_or(AppError::MissingHeader("X-File-Name"))?;

    state
        .reports
        .receive(&upload_id, request.into_body().into_data_stream())
        .await?;
    let report = state
        .reports
        .complete_upload(&origin, &filename, &upload_id)
        .await?;

    Ok([
        (CONTENT_TYPE, "text/plain".to_string()),
        (RESPONSE_TEXT, report.report_url()),
    ])
}

/// GET /report/<key>
pub async fn get_report_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    // `Path` has already percent-decoded the key.
    let (blob, reader) = state.reports.fetch(&key).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    Ok((
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (CONTENT_LENGTH, blob.size.to_string()),
        ],
        body,
    ))
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
