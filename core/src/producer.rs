use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::queue::JobQueue;

// How often a blocked producer re-checks the in-flight count.
const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Paced job producer with backpressure: enqueues at a fixed interval but
/// never lets waiting plus active jobs exceed `max_in_flight`.
pub struct Producer {
    queue: Arc<JobQueue>,
    interval: Duration,
    max_in_flight: u64,
}

impl Producer {
    pub fn new(queue: Arc<JobQueue>, interval: Duration, max_in_flight: u64) -> Self {
        Self {
            queue,
            interval,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Enqueue `count` jobs, payloads supplied per sequence number.
    /// Returns how many were enqueued; cancellation stops the run early
    /// without error.
    pub async fn run(
        &self,
        count: u64,
        mut payload: impl FnMut(u64) -> String,
        cancel: &CancellationToken,
    ) -> Result<u64, QueueError> {
        let mut produced = 0u64;
        for sequence in 0..count {
            if !self.wait_for_capacity(cancel).await? {
                break;
            }
            let id = self.queue.enqueue(&payload(sequence)).await?;
            produced += 1;
            tracing::debug!(job_id = %id, sequence, produced, "job produced");

            if sequence + 1 < count {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(self.interval) => {}
                }
            }
        }
        tracing::info!(produced, requested = count, "producer finished");
        Ok(produced)
    }

    /// Block until in-flight drops below the cap. Returns false when
    /// cancelled while waiting.
    async fn wait_for_capacity(&self, cancel: &CancellationToken) -> Result<bool, QueueError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let in_flight = self.queue.counts().await?.in_flight();
            if in_flight < self.max_in_flight {
                return Ok(true);
            }
            tracing::debug!(
                in_flight,
                max_in_flight = self.max_in_flight,
                "producer waiting for capacity"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = sleep(BACKPRESSURE_POLL_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueOptions;
    use crate::store::MemoryStore;

    fn test_queue() -> Arc<JobQueue> {
        Arc::new(JobQueue::new(
            Arc::new(MemoryStore::new()),
            "produced",
            QueueOptions {
                poll_delay: Duration::from_millis(10),
                ..QueueOptions::default()
            },
        ))
    }

    #[tokio::test]
    async fn produces_requested_count_when_under_cap() {
        let queue = test_queue();
        let producer = Producer::new(queue.clone(), Duration::ZERO, 100);
        let cancel = CancellationToken::new();
        let produced = producer
            .run(5, |sequence| format!("{{\"n\":{sequence}}}"), &cancel)
            .await
            .unwrap();
        assert_eq!(produced, 5);
        assert_eq!(queue.counts().await.unwrap().waiting, 5);
    }

    #[tokio::test]
    async fn backpressure_caps_in_flight() {
        let queue = test_queue();
        let producer = Producer::new(queue.clone(), Duration::ZERO, 3);
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                producer.run(5, |sequence| sequence.to_string(), &cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(queue.counts().await.unwrap().in_flight(), 3);

        // draining one job frees capacity for exactly one more
        let job = queue.claim("w1").await.unwrap().unwrap();
        queue.complete(&job, "w1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(queue.counts().await.unwrap().in_flight(), 3);

        cancel.cancel();
        let produced = run.await.unwrap().unwrap();
        assert_eq!(produced, 4);
    }

    #[tokio::test]
    async fn cancellation_stops_cleanly_mid_run() {
        let queue = test_queue();
        let producer = Producer::new(queue.clone(), Duration::from_millis(50), 100);
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                producer.run(100, |sequence| sequence.to_string(), &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();
        let produced = run.await.unwrap().unwrap();
        assert!(produced >= 1);
        assert!(produced < 100);
        assert_eq!(queue.counts().await.unwrap().waiting, produced);
    }
}
