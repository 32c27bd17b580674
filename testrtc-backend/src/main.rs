use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use testrtc_backend::api;
use testrtc_backend::config::Config;
use testrtc_backend::service::tasks::spawn_retention_sweep;
use testrtc_backend::utils::cli::Args;
use testrtc_backend::utils::state::AppState;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let config = validate_config(&args).await;

    let state = Arc::new(AppState::new(config).await?);
    let sweeper = spawn_retention_sweep(
        state.reports.clone(),
        Duration::from_secs(state.config.sweep_interval_secs),
    );

    let public_listener =
        tokio::net::TcpListener::bind(format!("{}:{}", state.config.host, state.config.port))
            .await?;
    let internal_listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        state.config.internal_host, state.config.internal_port
    ))
    .await?;
    tracing::info!("listening on {}", public_listener.local_addr()?);
    tracing::info!("internal tasks on {}", internal_listener.local_addr()?);

    let public = axum::serve(public_listener, api::create_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal());
    let internal = axum::serve(internal_listener, api::create_internal_router(state))
        .with_graceful_shutdown(shutdown_signal());
    tokio::try_join!(async { public.await }, async { internal.await })?;

    sweeper.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down...");
}

async fn validate_config(args: &Args) -> Config {
    let mut validation_errors = Vec::new();

    if args.storage != "MEMORY" {
        let root_dir = Path::new(&args.root);
        match tokio::fs::metadata(root_dir).await {
            Ok(meta) => {
                if !meta.is_dir() {
                    validation_errors.push(format!(
                        "TESTRTC_ROOTDIR `{}` exists but is not a directory",
                        args.root,
                    ));
                }
            }
            Err(_) => validation_errors.push(format!(
                "TESTRTC_ROOTDIR `{}` does not exist.",
                args.root,
            )),
        }

        let db_path = args
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                validation_errors.push(format!(
                    "The directory for the database `{}` does not exist",
                    parent.display(),
                ));
            }
        }
    }

    if args.retention_days <= 0 {
        validation_errors.push(format!(
            "TESTRTC_RETENTION_DAYS must be positive, got {}",
            args.retention_days,
        ));
    }
    if args.sweep_interval == 0 {
        validation_errors.push("TESTRTC_SWEEP_INTERVAL_SECONDS must not be zero".to_string());
    }
    if args.upload_ttl == 0 {
        validation_errors.push("TESTRTC_UPLOAD_TTL_SECONDS must not be zero".to_string());
    }
    if args.max_report_bytes == 0 {
        validation_errors.push("TESTRTC_MAX_REPORT_BYTES must not be zero".to_string());
    }
    if args.seed_len == 0 || args.repeat_count == 0 {
        validation_errors.push("TESTRTC_SEED_LEN and TESTRTC_REPEAT_COUNT must not be zero".to_string());
    }

    if !validation_errors.is_empty() {
        eprintln!("{}", validation_errors.join("\n"));
        std::process::exit(1);
    }

    Config {
        host: args.host.clone(),
        port: args.port,
        internal_host: args.internal_host.clone(),
        internal_port: args.internal_port,
        public_url: args.url.clone(),
        storage_typ: args.storage.clone(),
        root_dir: args.root.clone(),
        db_url: args.database_url.clone(),
        retention_days: args.retention_days,
        sweep_interval_secs: args.sweep_interval,
        upload_ttl_secs: args.upload_ttl,
        max_report_bytes: args.max_report_bytes,
        seed_len: args.seed_len,
        repeat_count: args.repeat_count,
    }
}
