use std::io;
use axum::Json;
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FilenameInvalid,
    BlobUnknown,
    UploadUnknown,
    SizeInvalid,
    HeaderMissing,
    ReportTooLarge,
    Unavailable,
}

#[derive(Debug, Serialize, Clone)]
pub struct ErrorInfo {
    code: ErrorCode,
    message: String,
    detail: serde_json::Value,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: json!({}),
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorInfo>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid report filename: {0}")]
    InvalidFilename(String), // Contains the rejected filename

    #[error("{0} not found")]
    NotFound(String), // Contains the blob key

    #[error("upload target unknown: {0}")]
    UploadUnknown(String), // Contains the upload id

    #[error("requested size out of range: {0}")]
    OutOfRange(String), // Contains a descriptive message

    #[error("missing request header `{0}`")]
    MissingHeader(&'static str),

    #[error("report exceeds {0} bytes")]
    ReportTooLarge(u64), // Contains the configured limit

    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("failed to allocate a random buffer of {0} bytes")]
    BufferAllocation(usize),

    // Internal Errors
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Axum error: {0}")]
    AxumError(#[from] axum::Error),
}

impl AppError {
    /// Whether a client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Sqlx(_) | Self::Io(_) | Self::AxumError(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_retryable() {
            tracing::error!("Generating response for AppError: {:?}", self);
        } else {
            tracing::debug!("Generating response for AppError: {:?}", self);
        }

        let (status_code, error_info) = match &self {
            Self::InvalidFilename(filename) => (
                StatusCode::FORBIDDEN,
                ErrorInfo::new(ErrorCode::FilenameInvalid, "report filename is not allowed")
                    .with_detail(json!({ "filename": filename })),
            ),
            Self::NotFound(key) => (
                StatusCode::NOT_FOUND,
                ErrorInfo::new(ErrorCode::BlobUnknown, "report unknown")
                    .with_detail(json!({ "key": key })),
            ),
            Self::UploadUnknown(id) => (
                StatusCode::NOT_FOUND,
                ErrorInfo::new(ErrorCode::UploadUnknown, "upload target unknown")
                    .with_detail(json!({ "upload_id": id })),
            ),
            Self::OutOfRange(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(ErrorCode::SizeInvalid, msg.as_str()),
            ),
            Self::MissingHeader(name) => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(ErrorCode::HeaderMissing, "required header is missing")
                    .with_detail(json!({ "header": name })),
            ),
            Self::ReportTooLarge(limit) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorInfo::new(ErrorCode::ReportTooLarge, "report is too large")
                    .with_detail(json!({ "limit": limit })),
            ),
            _ => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorInfo::new(ErrorCode::Unavailable, "storage is temporarily unavailable"),
            ),
        };

        let body = Json(ErrorResponse {
            errors: vec![error_info],
        });
        if status_code == StatusCode::SERVICE_UNAVAILABLE {
            return (status_code, [(RETRY_AFTER, "30")], body).into_response();
        }
        (status_code, body).into_response()
    }
}
