//! Callback Dispatcher: fire-and-forget HTTP POST of [`ResultEnvelope`]s
//! with bounded concurrency. `enqueue` never blocks the calling consumer
//! fiber — the dispatcher owns all retry/backpressure decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::model::ResultEnvelope;

/// Errors constructing the dispatcher. Per-delivery HTTP failures never
/// surface as this type — they are logged and dropped instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The underlying HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Queue depth above which new enqueues still succeed but emit a warning
/// counter. A sensible default is 10x the broker prefetch; callers size
/// the channel itself to their prefetch.
const DEFAULT_WATERMARK: usize = 500;

/// Bounded worker pool that drains a queue of [`ResultEnvelope`]s via HTTP
/// POST to the configured callback URL.
pub struct CallbackDispatcher {
    sender: mpsc::UnboundedSender<ResultEnvelope>,
    queued: Arc<AtomicU64>,
    watermark: usize,
    dropped_over_watermark: Arc<AtomicU64>,
}

impl CallbackDispatcher {
    /// Spawn `workers` tasks pulling from a shared queue and POSTing to
    /// `url` with `timeout`. Returns the dispatcher handle plus the join
    /// handles so the Lifecycle Manager can await drain on shutdown.
    pub fn spawn(
        url: String,
        timeout: Duration,
        workers: usize,
        watermark: usize,
    ) -> Result<(Arc<Self>, Vec<JoinHandle<()>>), DispatchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let (sender, receiver) = mpsc::unbounded_channel::<ResultEnvelope>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let queued = Arc::new(AtomicU64::new(0));
        let dropped_over_watermark = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let client = client.clone();
            let url = url.clone();
            let receiver = receiver.clone();
            let queued = queued.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, client, url, receiver, queued).await;
            }));
        }

        Ok((
            Arc::new(Self {
                sender,
                queued,
                watermark: if watermark > 0 { watermark } else { DEFAULT_WATERMARK },
                dropped_over_watermark,
            }),
            handles,
        ))
    }

    /// Non-blocking enqueue. If the in-flight queue depth exceeds the
    /// watermark, the envelope is still enqueued but a warning counter is
    /// incremented — the consumer must never block on dispatch.
    pub fn enqueue(&self, envelope: ResultEnvelope) {
        let depth = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if depth as usize > self.watermark {
            let total = self.dropped_over_watermark.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(depth, watermark = self.watermark, total_over_watermark = total,
                "callback dispatcher queue depth exceeds watermark");
        }
        if self.sender.send(envelope).is_err() {
            warn!("callback dispatcher workers have shut down, dropping envelope");
        }
    }

    /// Current queue depth, for diagnostics/metrics.
    pub fn queue_depth(&self) -> u64 {
        self.queued.load(Ordering::SeqCst)
    }
}

async fn worker_loop(
    worker_id: usize,
    client: reqwest::Client,
    url: String,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ResultEnvelope>>>,
    queued: Arc<AtomicU64>,
) {
    loop {
        let envelope = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };
        let Some(envelope) = envelope else {
            debug!(worker_id, "callback dispatcher worker shutting down");
            return;
        };
        queued.fetch_sub(1, Ordering::SeqCst);
        deliver(&client, &url, &envelope).await;
    }
}

async fn deliver(client: &reqwest::Client, url: &str, envelope: &ResultEnvelope) {
    if url.is_empty() {
        debug!(request_id = %envelope.request_id, "no callback url configured, dropping");
        return;
    }
    // On non-2xx or transport error, log and drop after the first attempt.
    // The message has already been ack'd by the time this runs; a durable
    // retry would need a local outbox this design intentionally omits.
    match client.post(url).json(envelope).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(request_id = %envelope.request_id, status = %response.status(), "callback delivered");
        }
        Ok(response) => {
            warn!(request_id = %envelope.request_id, status = %response.status(), "callback rejected, dropping");
        }
        Err(err) => {
            warn!(request_id = %envelope.request_id, error = %err, "callback delivery failed, dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnvelopeStatus, RiskLevel};

    fn sample_envelope() -> ResultEnvelope {
        ResultEnvelope::success(
            "r1".into(),
            "s1".into(),
            42.0,
            RiskLevel::Low,
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn enqueue_increments_and_workers_drain_depth() {
        let (dispatcher, handles) =
            CallbackDispatcher::spawn(String::new(), Duration::from_secs(1), 2, 100).unwrap();
        dispatcher.enqueue(sample_envelope());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.queue_depth(), 0);
        drop(dispatcher);
        for h in handles {
            let _ = tokio::time::timeout(Duration::from_millis(200), h).await;
        }
    }

    #[test]
    fn sample_envelope_round_trips_status() {
        assert_eq!(sample_envelope().status, EnvelopeStatus::Success);
    }
}
