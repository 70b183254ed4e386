//! Enqueue a job from the command line.
//!
//! Usage: `scribe-enqueue <queue> '<json payload>'`
//!
//! Payloads carrying a `fileId` are skipped when a pending job for the same
//! file already exists.

use scribe_models::QueueName;
use scribe_queue::{JobQueue, RedisQueue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let (Some(queue), Some(payload)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: scribe-enqueue <queue> '<json payload>'");
    };

    let queue: QueueName = queue.parse().map_err(anyhow::Error::msg)?;
    let payload: serde_json::Value = serde_json::from_str(&payload)?;
    if !payload.is_object() {
        anyhow::bail!("payload must be a JSON object");
    }

    let jobs = RedisQueue::from_env()?;
    match jobs.enqueue_unique(queue, payload).await? {
        Some(id) => println!("{id}"),
        None => println!("skipped: a pending job already exists for this file"),
    }
    Ok(())
}
