use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Public listening host
    #[arg(long, env = "TESTRTC_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Public listening port
    #[arg(short, long, env = "TESTRTC_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Listening host for scheduled tasks, keep it on loopback
    #[arg(long, env = "TESTRTC_INTERNAL_HOST", default_value = "127.0.0.1")]
    pub internal_host: String,

    /// Listening port for scheduled tasks
    #[arg(long, env = "TESTRTC_INTERNAL_PORT", default_value_t = 8081)]
    pub internal_port: u16,

    /// Public url used to build upload targets
    #[arg(
        long,
        env = "TESTRTC_PUBLIC_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    pub url: String,

    /// Storage backend type (FILESYSTEM or MEMORY)
    #[arg(short, long, env = "TESTRTC_STORAGE", default_value = "FILESYSTEM")]
    pub storage: String,

    /// Report storage root path
    #[arg(long, env = "TESTRTC_ROOTDIR", default_value = "/var/lib/testrtc")]
    pub root: String,

    /// Report metadata database
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:///var/lib/testrtc/reports.db"
    )]
    pub database_url: String,

    /// Reports older than this many days are purged
    #[arg(long, env = "TESTRTC_RETENTION_DAYS", default_value_t = 90)]
    pub retention_days: i64,

    /// Seconds between two retention sweeps
    #[arg(long, env = "TESTRTC_SWEEP_INTERVAL_SECONDS", default_value_t = 86400)]
    pub sweep_interval: u64,

    /// Seconds an upload target may stay uncompleted before a sweep discards it
    #[arg(long, env = "TESTRTC_UPLOAD_TTL_SECONDS", default_value_t = 3600)]
    pub upload_ttl: u64,

    /// Largest accepted report, in bytes
    #[arg(long, env = "TESTRTC_MAX_REPORT_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_report_bytes: u64,

    /// Length of the random block the download buffer is built from
    #[arg(long, env = "TESTRTC_SEED_LEN", default_value_t = 10_000)]
    pub seed_len: usize,

    /// How many times the random block is repeated
    #[arg(long, env = "TESTRTC_REPEAT_COUNT", default_value_t = 1_000)]
    pub repeat_count: usize,
}
