//! Scheduled dead-letter reprocessing.
//!
//! Each sweep drains the dead-letter queue up to a per-sweep limit.
//! A drained message either returns to its origin queue with its retry
//! counter bumped, or is archived as a permanent failure once the
//! counter reaches its budget or no origin can be recovered. The sweep
//! interval is measured from the end of one sweep to the start of the
//! next, so sweeps never overlap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lantern_core::broker::FIRST_DEATH_QUEUE_HEADER;
use lantern_core::emit;
use lantern_core::metrics::events::{
    DlqDepth, DlqMessagePermanent, DlqMessageRequeued, DlqSweepCompleted,
};
use lantern_core::{
    BrokerRef, DEFAULT_EXCHANGE, Delivery, IterationResult, Lineage, Message, Pipeline,
    PollingProcessor, run_polling_loop,
};
use snafu::ResultExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SweepConfig;
use crate::error::{SweepBrokerSnafu, SweepError};
use crate::topology::{
    DEAD_LETTER_QUEUE, DLQ_RETRY_COUNT_HEADER, dlq_retry_count, origin_from_routing_key,
};

use super::archive::FailureArchive;
use super::types::{FailureReason, PermanentFailure, SweepStats, extract_request_id};

/// Drains the dead-letter queue, one sweep per poll interval.
pub struct DlqReprocessor {
    broker: BrokerRef,
    archive: Option<Arc<FailureArchive>>,
    max_retries: u64,
    receive_timeout: Duration,
    sweep_limit: usize,
    shutdown: CancellationToken,
}

impl DlqReprocessor {
    pub fn new(
        broker: BrokerRef,
        archive: Option<Arc<FailureArchive>>,
        config: &SweepConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            broker,
            archive,
            max_retries: config.max_retries,
            receive_timeout: Duration::from_secs(config.receive_timeout_secs),
            sweep_limit: config.sweep_limit,
            shutdown,
        }
    }

    /// Recover the queue a dead-lettered message came from.
    ///
    /// Tries the death lineage first, then the first-death header, then
    /// the `<queue>.dlq` routing key shape.
    fn recover_origin(delivery: &Delivery) -> Option<String> {
        let headers = &delivery.message.headers;

        Lineage::from_headers(headers)
            .and_then(|lineage| lineage.last_death_queue().map(str::to_string))
            .or_else(|| headers.get_str(FIRST_DEATH_QUEUE_HEADER).map(str::to_string))
            .or_else(|| origin_from_routing_key(&delivery.routing_key).map(str::to_string))
    }

    async fn archive_failure(
        &self,
        delivery: &Delivery,
        origin: Option<&str>,
        reason: FailureReason,
        retry_count: u64,
    ) {
        let request_id = extract_request_id(&delivery.message.body);
        warn!(
            ?request_id,
            origin = origin.unwrap_or("unknown"),
            reason = reason.as_str(),
            retry_count,
            "Dropping dead-lettered message permanently"
        );

        if let Some(archive) = &self.archive {
            archive
                .record(PermanentFailure {
                    request_id,
                    origin: origin.map(str::to_string),
                    reason,
                    retry_count,
                    routing_key: delivery.routing_key.clone(),
                    timestamp: Utc::now(),
                    body: String::from_utf8_lossy(&delivery.message.body).into_owned(),
                })
                .await;
        }

        emit!(DlqMessagePermanent {
            origin: origin.unwrap_or("unknown").to_string(),
        });
    }

    /// Settle one dead-lettered message.
    async fn handle_dead_letter(
        &self,
        delivery: Delivery,
        stats: &mut SweepStats,
    ) -> Result<(), SweepError> {
        let count = dlq_retry_count(&delivery.message.headers);

        let Some(origin) = Self::recover_origin(&delivery) else {
            self.archive_failure(&delivery, None, FailureReason::UnknownOrigin, count)
                .await;
            self.broker.ack(delivery).await.context(SweepBrokerSnafu)?;
            stats.permanent += 1;
            return Ok(());
        };

        if count >= self.max_retries {
            self.archive_failure(&delivery, Some(&origin), FailureReason::RetriesExhausted, count)
                .await;
            self.broker.ack(delivery).await.context(SweepBrokerSnafu)?;
            stats.permanent += 1;
            return Ok(());
        }

        // Republish with the counter bumped; body and every other
        // header travel unchanged.
        let mut headers = delivery.message.headers.clone();
        headers.insert(DLQ_RETRY_COUNT_HEADER, count + 1);
        let message = Message::with_headers(delivery.message.body.clone(), headers);

        match self.broker.publish(DEFAULT_EXCHANGE, &origin, message).await {
            Ok(()) => {
                info!(origin = %origin, retry_count = count + 1, "Requeued dead-lettered message");
                self.broker.ack(delivery).await.context(SweepBrokerSnafu)?;
                stats.requeued += 1;
                emit!(DlqMessageRequeued { origin });
            }
            Err(publish_error) => {
                warn!(
                    error = %publish_error,
                    origin = %origin,
                    "Republish failed, returning message to the dead-letter queue"
                );
                self.broker
                    .reject(delivery, true)
                    .await
                    .context(SweepBrokerSnafu)?;
                stats.pushed_back += 1;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl PollingProcessor for DlqReprocessor {
    /// Queue depth observed at the start of the sweep.
    type State = usize;
    type Error = SweepError;

    async fn prepare(&mut self) -> Result<Option<usize>, SweepError> {
        let depth = self
            .broker
            .queue_len(DEAD_LETTER_QUEUE)
            .await
            .context(SweepBrokerSnafu)?;
        emit!(DlqDepth { count: depth });

        if depth == 0 {
            return Ok(None);
        }
        Ok(Some(depth))
    }

    async fn process(&mut self, depth: usize) -> Result<IterationResult, SweepError> {
        let started = Instant::now();
        let mut stats = SweepStats::default();
        // Pushed-back messages return to the front of the queue, so an
        // unbounded sweep could spin on them; the budget caps one pass.
        let budget = depth.min(self.sweep_limit);
        let mut interrupted = false;

        info!(depth, budget, "Dead-letter sweep started");

        for _ in 0..budget {
            if self.shutdown.is_cancelled() {
                interrupted = true;
                break;
            }

            let delivery = self
                .broker
                .receive(DEAD_LETTER_QUEUE, self.receive_timeout)
                .await
                .context(SweepBrokerSnafu)?;
            let Some(delivery) = delivery else { break };
            self.handle_dead_letter(delivery, &mut stats).await?;
        }

        if let Some(archive) = &self.archive
            && let Err(flush_error) = archive.flush().await
        {
            error!(error = %flush_error, "Failed to flush failure archive after sweep");
        }

        emit!(DlqSweepCompleted {
            drained: stats.drained() as u64,
            duration: started.elapsed(),
        });
        info!(
            drained = stats.drained(),
            requeued = stats.requeued,
            permanent = stats.permanent,
            pushed_back = stats.pushed_back,
            "Dead-letter sweep complete"
        );

        Ok(if interrupted {
            IterationResult::Shutdown
        } else {
            IterationResult::ProcessedItems
        })
    }
}

/// Pipeline wrapper running the reprocessor on a fixed-delay schedule.
pub struct DlqSweeper {
    key: String,
    processor: DlqReprocessor,
    interval: Duration,
    shutdown: CancellationToken,
}

impl DlqSweeper {
    pub fn new(processor: DlqReprocessor, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            key: "dlq-sweeper".to_string(),
            processor,
            interval,
            shutdown,
        }
    }
}

impl Pipeline for DlqSweeper {
    type Key = String;
    type Error = SweepError;

    fn key(&self) -> &String {
        &self.key
    }

    fn run(self) -> impl Future<Output = Result<(), SweepError>> + Send {
        async move {
            let mut processor = self.processor;
            run_polling_loop(&mut processor, self.interval, self.shutdown).await
        }
    }
}
