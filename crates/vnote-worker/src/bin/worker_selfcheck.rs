use std::path::Path;
use std::process::Command;

use vnote_media::check_ffmpeg;
use vnote_store::{ListQuery, PocketBaseClient, RecordStore};
use vnote_worker::WorkerConfig;

/// Checks the worker's runtime environment.
///
/// Pass `--store` to also authenticate against the record store and check
/// that the job and claim collections are readable.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("worker-selfcheck: rustls crypto provider was already installed");
    }
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    let check_store = std::env::args().any(|arg| arg == "--store");

    println!(
        "worker-selfcheck: starting with cache_dir={}",
        config.cache_dir.display()
    );
    ensure_cache_dir(&config.cache_dir).await?;
    ensure_ffmpeg()?;
    ensure_env_present(&[
        "POCKETBASE_URL",
        "POCKETBASE_LOGIN",
        "POCKETBASE_PASSWORD",
        "TELEGRAM_APITOKEN",
    ])?;

    if check_store {
        ensure_store(&config).await?;
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_cache_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("cache dir {} is not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}

fn ensure_ffmpeg() -> anyhow::Result<()> {
    let program = check_ffmpeg()?;
    let output = Command::new(&program)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("failed to run {}: {}", program.display(), e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("{} -version exited with {}", program.display(), output.status));
    }
    let version = String::from_utf8_lossy(&output.stdout);
    if let Some(line) = version.lines().next() {
        println!("worker-selfcheck: {}", line);
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true) {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}

async fn ensure_store(config: &WorkerConfig) -> anyhow::Result<()> {
    let client = PocketBaseClient::from_env()?;
    client
        .authenticate()
        .await
        .map_err(|e| anyhow::anyhow!("record store authentication failed: {}", e))?;
    println!("worker-selfcheck: record store authentication ok");

    let query = ListQuery::new().per_page(1).skip_total();
    for collection in [&config.collection, &config.claims_collection] {
        client
            .list(collection, &query)
            .await
            .map_err(|e| anyhow::anyhow!("collection {} is not readable: {}", collection, e))?;
        println!("worker-selfcheck: collection {} ok", collection);
    }
    Ok(())
}
