//! `attache-worker`: drains the upload queue into the configured backends.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use attache_core::{StorageConfig, SyncTarget};
use attache_db::{create_pool_with_config, PgAttachmentRepository, PgJobQueue, PoolConfig};
use attache_jobs::{UploadHandler, WorkerBuilder, WorkerConfig};
use attache_storage::{HttpObjectStore, S3ObjectStore, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, daily rotation)
    //   RUST_LOG    - standard env filter (default: "attache=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "attache=debug".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("attache-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = StorageConfig::load().context("Failed to load storage configuration")?;
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/attache".to_string());

    let pool = create_pool_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("Failed to connect to database")?;

    let queue = Arc::new(PgJobQueue::new(pool.clone()));
    queue.ensure_table().await?;
    let repo = Arc::new(PgAttachmentRepository::new(pool));

    let storage = Storage::new(config.clone(), repo, queue.clone())?;

    let mut builder = WorkerBuilder::new(queue).with_config(WorkerConfig::from_env());
    for target in config.sync_targets() {
        builder = match target {
            SyncTarget::S3 => {
                let s3 = config.s3.as_ref().context("S3 target without S3 settings")?;
                let store = S3ObjectStore::from_config(s3).await;
                builder.with_handler(UploadHandler::new(storage.clone(), Arc::new(store)))
            }
            SyncTarget::Fog => {
                let fog = config.fog.as_ref().context("Fog target without fog settings")?;
                let store = HttpObjectStore::new(fog)?;
                builder.with_handler(UploadHandler::new(storage.clone(), Arc::new(store)))
            }
        };
    }

    let worker = builder.build();
    if worker.targets().is_empty() {
        anyhow::bail!("No remote storage configured; set S3_BUCKET or FOG_ENDPOINT");
    }

    let handle = worker.start();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received, draining in-flight jobs");
    handle.shutdown().await?;
    handle.join().await?;
    Ok(())
}
