//! One-shot scaling run, meant to be invoked by a cron schedule.
//!
//! Exits non-zero when the run fails or exceeds its wall-clock limit.
//! `--loop` keeps running cycles at the configured interval instead.

use std::sync::Arc;

use tracing::{error, info};

use scribe_queue::{JobQueue, RedisQueue};
use scribe_worker::{init_tracing, RenderClient, ScalerConfig, ScalerLock, ScalingController};

#[tokio::main]
async fn main() {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("failed to install rustls crypto provider: {e:?}");
        std::process::exit(1);
    }
    dotenvy::dotenv().ok();
    init_tracing();

    let controller = match build() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to configure scaler: {:#}", e);
            std::process::exit(1);
        }
    };

    if std::env::args().any(|a| a == "--loop") {
        info!("Scaling every {:?}", controller.config().interval);
        controller.run_loop().await;
        return;
    }

    let limit = controller.config().run_timeout;
    match tokio::time::timeout(limit, controller.run_once()).await {
        Ok(Ok(decision)) => info!("Scaling run finished: {:?}", decision),
        Ok(Err(e)) => {
            error!("Scaling run failed: {}", e);
            std::process::exit(1);
        }
        Err(_) => {
            error!("Scaling run exceeded {:?}, exiting", limit);
            std::process::exit(1);
        }
    }
}

fn build() -> anyhow::Result<ScalingController> {
    let config = ScalerConfig::from_env()?;
    let queue = RedisQueue::from_env()?;
    let lock = ScalerLock::new(queue.client().clone(), &queue.config().prefix, config.lock_ttl);
    let infra = RenderClient::new(reqwest::Client::new(), &config);
    let queue: Arc<dyn JobQueue> = Arc::new(queue);
    Ok(ScalingController::new(config, queue, infra, Some(lock)))
}
