use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A stored log report, as recorded by the blob backend.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StoredBlob {
    pub key: String,
    pub filename: String,
    pub origin: String,
    pub created_at: DateTime<Utc>,
    pub size: i64,
}

/// Metadata the store hands to a backend when an upload is committed.
#[derive(Debug, Clone)]
pub struct NewBlob {
    pub filename: String,
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

/// A backend-issued destination for the bytes of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub id: String,
}

impl UploadTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Absolute url the client posts the file to,
    /// (e.g. `<base_url>/report/upload/<id>`).
    pub fn location(&self, base_url: &str) -> String {
        format!("{}/report/upload/{}", base_url.trim_end_matches('/'), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReport {
    pub origin: String,
    pub key: String,
}

impl StoredReport {
    /// (e.g. `<origin>/report/<key>`).
    pub fn report_url(&self) -> String {
        format!("{}/report/{}", self.origin, self.key)
    }
}
