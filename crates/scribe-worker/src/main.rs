//! Queue worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use scribe_media::{FfmpegTools, MediaConfig, MediaTools};
use scribe_queue::{JobQueue, RedisQueue};
use scribe_storage::{ObjectStore, S3Client, ScratchConfig, ScratchStorage, StorageGateway};
use scribe_worker::{
    handler_from_env, init_tracing, metrics, HandlerContext, JobExecutor, WebhookClient,
    WebhookConfig, WorkerConfig,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting scribe-worker");

    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::install_exporter(port)?;
    }

    let queue = RedisQueue::from_env().context("failed to create job queue")?;
    queue.ping().await.context("Redis is unreachable")?;
    let queue: Arc<dyn JobQueue> = Arc::new(queue);

    let store: Arc<dyn ObjectStore> =
        Arc::new(S3Client::from_env().context("failed to create storage client")?);
    let scratch = Arc::new(ScratchStorage::new(ScratchConfig::from_env()));
    scratch.ensure_initialized().await?;
    let gateway = Arc::new(StorageGateway::new(store, scratch));

    let media_config = MediaConfig::from_env();
    let ytdlp_path = media_config.ytdlp_path.clone();
    let tools: Arc<dyn MediaTools> = Arc::new(FfmpegTools::new(media_config));

    let handler = handler_from_env(
        config.queue,
        HandlerContext {
            gateway,
            tools,
            ytdlp_path,
            http: reqwest::Client::new(),
        },
    )?;

    let webhook = match WebhookConfig::from_env() {
        Ok(webhook_config) => Some(WebhookClient::new(webhook_config)?),
        Err(e) => {
            warn!("Webhooks disabled: {}", e);
            None
        }
    };

    let shutdown_timeout = config.shutdown_timeout;
    let executor = Arc::new(JobExecutor::new(config, queue, handler, webhook));

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal, finishing current job");
    executor.shutdown();

    match tokio::time::timeout(shutdown_timeout, runner).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => error!("Executor task panicked: {}", e),
        Err(_) => warn!(
            "Shutdown timed out after {:?}, abandoning current job",
            shutdown_timeout
        ),
    }

    info!("Worker shutdown complete");
    Ok(())
}
