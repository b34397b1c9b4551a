//! Batch Consumer (spec.md §4.D): subscribes to one durable AMQP queue,
//! assembles size-or-age micro-batches, invokes the Scoring Kernel once per
//! batch, and coordinates acknowledgement.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{BatchSettings, BrokerSettings};
use crate::consumer::batch::{decode_message, BatchBuffer, DecodeOutcome, PendingMessage};
use crate::consumer::error::ConsumerError;
use crate::consumer::retry::ReconnectBackoff;
use crate::consumer::state::ConsumerStateTracker;
use crate::dispatcher::CallbackDispatcher;
use crate::kernel::ScoringKernel;

/// Subscribes to the configured broker queue and drives the micro-batch
/// pipeline until shutdown.
pub struct BatchConsumer {
    broker: BrokerSettings,
    batch: BatchSettings,
    kernel: Arc<ScoringKernel>,
    dispatcher: Arc<CallbackDispatcher>,
    state: Arc<ConsumerStateTracker>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BatchConsumer {
    /// Construct a consumer bound to the given broker/batch configuration,
    /// scoring kernel and dispatcher. `shutdown_rx` flips to `true` when
    /// the Lifecycle Manager signals `Draining` (spec.md §4.F).
    pub fn new(
        broker: BrokerSettings,
        batch: BatchSettings,
        kernel: Arc<ScoringKernel>,
        dispatcher: Arc<CallbackDispatcher>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            batch,
            kernel,
            dispatcher,
            state: Arc::new(ConsumerStateTracker::new()),
            shutdown_rx,
        }
    }

    /// Shared state tracker, for the Lifecycle Manager to poll during
    /// shutdown (`Draining` until `Stopped` or a 30s deadline, spec.md
    /// §4.F).
    pub fn state(&self) -> Arc<ConsumerStateTracker> {
        self.state.clone()
    }

    /// Open the broker connection, declare topology idempotently (durable
    /// direct exchange, durable queue, binding — spec.md §4.F step 4),
    /// and run the consume loop until shutdown. Reconnects with
    /// exponential backoff (initial 5s, cap 60s) on connection loss
    /// (spec.md §4.D Recovery).
    pub async fn run(mut self) -> Result<(), ConsumerError> {
        let mut backoff = ReconnectBackoff::default_broker_policy();
        self.state.mark_running();

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            match self.run_once(&mut backoff).await {
                Ok(()) => break,
                Err(err) => {
                    error!(error = %err, "broker connection lost, reconnecting");
                    let delay = backoff.next_delay();
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.state.mark_stopped();
        Ok(())
    }

    async fn connect(&self) -> Result<Channel, ConsumerError> {
        // Drive the AMQP connection on the process's own tokio runtime
        // rather than lapin's default async-global-executor, so broker I/O
        // shares the same scheduler as the rest of the worker.
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let conn = Connection::connect(&self.broker.amqp_url(), properties).await?;
        let channel = conn.create_channel().await?;

        channel
            .exchange_declare(
                &self.broker.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(ConsumerError::Topology)?;

        channel
            .queue_declare(
                &self.broker.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(ConsumerError::Topology)?;

        channel
            .queue_bind(
                &self.broker.queue,
                &self.broker.exchange,
                &self.broker.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(ConsumerError::Topology)?;

        channel
            .basic_qos(self.broker.prefetch, BasicQosOptions::default())
            .await
            .map_err(ConsumerError::Topology)?;

        Ok(channel)
    }

    async fn run_once(&mut self, backoff: &mut ReconnectBackoff) -> Result<(), ConsumerError> {
        let channel = self.connect().await?;
        let mut consumer = channel
            .basic_consume(
                &self.broker.queue,
                "riskflow-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        // A successful (re)subscription means the broker is reachable again;
        // reset the backoff so a later drop doesn't inherit an elevated
        // delay from an earlier, unrelated outage (spec.md §4.D Recovery).
        backoff.reset();
        info!(queue = %self.broker.queue, "batch consumer subscribed");

        let mut buffer =
            BatchBuffer::new(self.batch.size, Duration::from_millis(self.batch.timeout_ms));

        loop {
            let deadline = buffer
                .next_deadline()
                .unwrap_or(Duration::from_millis(self.batch.timeout_ms));

            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        self.state.mark_draining();
                        if !buffer.is_empty() {
                            self.flush(&channel, &mut buffer).await;
                        }
                        return Ok(());
                    }
                }

                _ = tokio::time::sleep(deadline) => {
                    if buffer.should_flush() {
                        self.flush(&channel, &mut buffer).await;
                    }
                }

                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            match decode_message(&delivery.data, delivery.delivery_tag) {
                                DecodeOutcome::Accepted(message) => {
                                    buffer.push(message);
                                    if buffer.should_flush() {
                                        self.flush(&channel, &mut buffer).await;
                                    }
                                }
                                DecodeOutcome::Rejected { envelope, delivery_tag } => {
                                    self.dispatcher.enqueue(envelope);
                                    let _ = channel
                                        .basic_ack(delivery_tag, BasicAckOptions::default())
                                        .await;
                                }
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "delivery error, reconnecting");
                            return Err(ConsumerError::Connection(err));
                        }
                        None => {
                            warn!("broker stream ended, reconnecting");
                            return Err(ConsumerError::Topology(lapin::Error::InvalidChannelState(
                                lapin::ChannelState::Error,
                            )));
                        }
                    }
                }
            }
        }
    }

    async fn flush(&self, channel: &Channel, buffer: &mut BatchBuffer) {
        let batch = buffer.drain();
        if batch.is_empty() {
            return;
        }
        self.state.begin_batch();
        self.execute_batch(channel, batch).await;
        self.state.end_batch();
    }

    async fn execute_batch(&self, channel: &Channel, batch: Vec<PendingMessage>) {
        let vectors: Vec<Vec<f64>> = batch.iter().map(|m| m.vector.clone()).collect();
        let request_ids: Vec<String> = batch.iter().map(|m| m.request_id.clone()).collect();
        let subject_ids: Vec<String> = batch.iter().map(|m| m.subject_id.clone()).collect();

        let envelopes = self
            .kernel
            .score_batch(&vectors, &request_ids, &subject_ids)
            .await;

        debug_assert_eq!(envelopes.len(), batch.len());

        for (envelope, message) in envelopes.into_iter().zip(batch.into_iter()) {
            self.dispatcher.enqueue(envelope);
            // Ack is unconditional on callback outcome (spec.md §4.D step
            // 3) — the dispatcher owns retry semantics entirely.
            let _ = channel
                .basic_ack(message.delivery_tag, BasicAckOptions::default())
                .await;
        }
    }
}
