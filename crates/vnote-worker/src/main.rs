//! Video note worker binary.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vnote_media::{check_ffmpeg, FfmpegTransform, VideoNoteParams};
use vnote_notify::TelegramNotifier;
use vnote_store::PocketBaseClient;
use vnote_worker::{metrics, JobExecutor, JobFetcher, Pipeline, WorkerConfig, WorkerResult};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vnote-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = &config.metrics_addr {
        if let Err(e) = metrics::install_prometheus(addr) {
            error!("Failed to start metrics exporter: {}", e);
            std::process::exit(1);
        }
        info!("Serving metrics on {}", addr);
    }

    let mut executor = match build_executor(&config).await {
        Ok(executor) => executor,
        Err(e) => {
            error!("Failed to initialize worker: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, finishing current job");
        let _ = shutdown_tx.send(true);
    });

    executor.run(shutdown_rx).await;

    info!("Worker shutdown complete");
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vnote=info", "vnote_worker=info", "vnote_store=info", "hyper=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn build_executor(config: &WorkerConfig) -> WorkerResult<JobExecutor> {
    let store = Arc::new(PocketBaseClient::from_env()?);
    store.authenticate().await?;
    info!("Authenticated with record store");

    let notifier = Arc::new(TelegramNotifier::from_env()?);

    match check_ffmpeg() {
        Ok(path) => info!("Using ffmpeg at {}", path.display()),
        Err(e) => warn!("{}; transforms will fail until it is installed", e),
    }
    let transform = Arc::new(FfmpegTransform::new(VideoNoteParams::default()).with_timeout(config.transform_timeout));

    let fetcher = JobFetcher::new(store.clone(), config.collection.clone());
    let pipeline = Pipeline::new(store, transform, notifier, config.clone());
    Ok(JobExecutor::new(fetcher, pipeline, config))
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
