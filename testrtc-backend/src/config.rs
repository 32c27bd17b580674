use chrono::TimeDelta;

use crate::domain::buffer::{DEFAULT_REPEAT_COUNT, DEFAULT_SEED_LEN};
use crate::domain::report::store::{
    DEFAULT_MAX_REPORT_BYTES, DEFAULT_RETENTION_DAYS, DEFAULT_UPLOAD_TTL_SECS,
};

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub internal_host: String,
    pub internal_port: u16,
    pub public_url: String,
    pub storage_typ: String,
    pub root_dir: String,
    pub db_url: String,
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
    pub upload_ttl_secs: u64,
    pub max_report_bytes: u64,
    pub seed_len: usize,
    pub repeat_count: usize,
}

impl Config {
    pub fn retention(&self) -> TimeDelta {
        TimeDelta::try_days(self.retention_days).unwrap_or(TimeDelta::MAX)
    }

    pub fn upload_ttl(&self) -> TimeDelta {
        i64::try_from(self.upload_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

/// Mirrors the command line defaults.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            internal_host: "127.0.0.1".into(),
            internal_port: 8081,
            public_url: "http://127.0.0.1:8080".into(),
            storage_typ: "FILESYSTEM".into(),
            root_dir: "/var/lib/testrtc".into(),
            db_url: "sqlite:///var/lib/testrtc/reports.db".into(),
            retention_days: DEFAULT_RETENTION_DAYS,
            sweep_interval_secs: 24 * 60 * 60,
            upload_ttl_secs: DEFAULT_UPLOAD_TTL_SECS,
            max_report_bytes: DEFAULT_MAX_REPORT_BYTES,
            seed_len: DEFAULT_SEED_LEN,
            repeat_count: DEFAULT_REPEAT_COUNT,
        }
    }
}
