use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use fenceq::producer::Producer;
use fenceq_config::load_settings;

use crate::commands::shared::{build_queue, connect_stores, wait_for_shutdown_signal};

pub(crate) async fn run_producer(
    config: Option<String>,
    count: Option<u64>,
    fresh: bool,
) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    let stores = connect_stores(&settings).await?;
    let queue = build_queue(&settings, Arc::clone(&stores[0]));

    if fresh {
        let removed = queue.obliterate(true).await?;
        println!(
            "Cleared queue '{}' ({removed} job(s) removed)",
            settings.queue_name
        );
    }

    let count = count.unwrap_or(settings.producer.count);
    let producer = Producer::new(
        queue.clone(),
        Duration::from_millis(settings.producer.interval_ms),
        settings.producer.max_in_flight,
    );

    let cancel = CancellationToken::new();
    let mut handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { producer.run(count, payload_for, &cancel).await })
    };
    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received; stopping producer");
            cancel.cancel();
        }
        result = &mut handle => {
            let produced = result??;
            println!(
                "Produced {produced} of {count} job(s) on queue '{}'",
                settings.queue_name
            );
            return Ok(());
        }
    }
    let produced = handle.await??;
    println!(
        "Produced {produced} of {count} job(s) on queue '{}'",
        settings.queue_name
    );
    Ok(())
}

fn payload_for(sequence: u64) -> String {
    serde_json::json!({
        "sequence": sequence,
        "produced_at": Utc::now().to_rfc3339(),
    })
    .to_string()
}
