use std::sync::Arc;

use anyhow::Result;

use fenceq::error::QueueError;
use fenceq_config::load_settings;

use crate::commands::shared::{build_queue, connect_stores};

pub(crate) async fn queue_stats(config: Option<String>) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let stores = connect_stores(&settings).await?;
    let queue = build_queue(&settings, Arc::clone(&stores[0]));

    let counts = queue.counts().await?;
    println!("Queue '{}':", settings.queue_name);
    println!("  Waiting:   {}", counts.waiting);
    println!("  Active:    {}", counts.active);
    println!("  Completed: {}", counts.completed);
    println!("  Failed:    {}", counts.failed);

    let dead = queue.dead_letters().await?;
    if !dead.is_empty() {
        println!("Dead letters:");
        for job in dead {
            println!(
                "  - Job {} after {} attempt(s): {}",
                job.id,
                job.attempts,
                job.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}

pub(crate) async fn queue_obliterate(config: Option<String>, force: bool) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let stores = connect_stores(&settings).await?;
    let queue = build_queue(&settings, Arc::clone(&stores[0]));

    match queue.obliterate(force).await {
        Ok(removed) => {
            println!(
                "Obliterated queue '{}' ({removed} job(s) removed)",
                settings.queue_name
            );
            Ok(())
        }
        Err(QueueError::ObliterateRefused { active }) => {
            println!("Refused: {active} job(s) still active. Re-run with --force to discard them.");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
