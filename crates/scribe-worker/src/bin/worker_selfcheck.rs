use scribe_media::FfmpegTools;
use scribe_storage::{ScratchConfig, ScratchStorage};
use scribe_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env()?;
    let scratch = ScratchStorage::new(ScratchConfig::from_env());

    println!(
        "worker-selfcheck: starting for queue={} with scratch_dir={}",
        config.queue,
        scratch.root().display()
    );

    scratch.ensure_initialized().await?;
    println!(
        "worker-selfcheck: {} MiB free in scratch",
        scratch.available_space()? / (1024 * 1024)
    );

    FfmpegTools::from_env()
        .check()
        .map_err(|e| anyhow::anyhow!("media tools not available: {}", e))?;

    ensure_env_present(&[
        "REDIS_URL",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_S3_BUCKET_NAME",
    ])?;

    println!("worker-selfcheck: ok");
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
