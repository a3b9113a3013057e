//! Stage consumers: one worker pool per queue.
//!
//! A consumer pulls deliveries off its queue, runs the registered
//! handler under the retry policy, and settles each delivery exactly
//! once: ack on success, reject without requeue on final failure so
//! the queue's dead-letter policy takes over.

pub mod registry;
pub mod retry;

pub use registry::{MessageHandler, Stage, StageRegistry};
pub use retry::{RetryPolicy, run_with_retry};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lantern_core::emit;
use lantern_core::metrics::events::{HandlerCompleted, MessageStatus, StageMessageProcessed};
use lantern_core::{BrokerRef, Delivery, Pipeline};
use snafu::ResultExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ConsumerBrokerSnafu, ConsumerError};

/// How long one receive call waits before the shutdown token is
/// checked again.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// A single consumer worker bound to one queue.
///
/// Shutdown is checked between deliveries only: a delivery that has
/// been pulled is always settled, including its full retry schedule.
pub struct StageConsumer {
    key: String,
    queue: &'static str,
    broker: BrokerRef,
    handler: Arc<dyn MessageHandler>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl StageConsumer {
    pub fn new(
        queue: &'static str,
        worker: usize,
        broker: BrokerRef,
        handler: Arc<dyn MessageHandler>,
        policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            key: format!("{queue}#{worker}"),
            queue,
            broker,
            handler,
            policy,
            shutdown,
        }
    }

    /// Build `workers` consumers for every queue in the registry.
    pub fn pool(
        registry: &StageRegistry,
        broker: &BrokerRef,
        policy: &RetryPolicy,
        workers: usize,
        shutdown: &CancellationToken,
    ) -> Vec<StageConsumer> {
        let mut consumers = Vec::new();
        for queue in registry.queues() {
            let Some(handler) = registry.handler(queue) else {
                continue;
            };
            for worker in 0..workers {
                consumers.push(StageConsumer::new(
                    queue,
                    worker,
                    broker.clone(),
                    handler.clone(),
                    policy.clone(),
                    shutdown.clone(),
                ));
            }
        }
        consumers
    }

    /// Run the handler for one delivery and settle it.
    async fn settle(&self, delivery: Delivery) -> Result<(), ConsumerError> {
        let started = Instant::now();
        let body = delivery.message.body.clone();

        let outcome = run_with_retry(&self.policy, self.queue, |attempt| {
            let handler = self.handler.clone();
            let body = body.clone();
            async move { handler.process(&body, attempt).await }
        })
        .await;

        emit!(HandlerCompleted {
            queue: self.queue.to_string(),
            duration: started.elapsed(),
        });

        match outcome {
            Ok(()) => {
                self.broker
                    .ack(delivery)
                    .await
                    .context(ConsumerBrokerSnafu { queue: self.queue })?;
                emit!(StageMessageProcessed {
                    queue: self.queue.to_string(),
                    status: MessageStatus::Success,
                });
            }
            Err(error) => {
                warn!(%error, queue = self.queue, "Giving up on message, dead-lettering");
                self.broker
                    .reject(delivery, false)
                    .await
                    .context(ConsumerBrokerSnafu { queue: self.queue })?;
                emit!(StageMessageProcessed {
                    queue: self.queue.to_string(),
                    status: MessageStatus::DeadLettered,
                });
            }
        }

        Ok(())
    }
}

impl Pipeline for StageConsumer {
    type Key = String;
    type Error = ConsumerError;

    fn key(&self) -> &String {
        &self.key
    }

    fn run(self) -> impl Future<Output = Result<(), ConsumerError>> + Send {
        async move {
            info!(queue = self.queue, worker = %self.key, "Consumer started");

            loop {
                if self.shutdown.is_cancelled() {
                    info!(queue = self.queue, worker = %self.key, "Consumer stopping");
                    return Ok(());
                }

                let delivery = self
                    .broker
                    .receive(self.queue, RECEIVE_TIMEOUT)
                    .await
                    .context(ConsumerBrokerSnafu { queue: self.queue })?;

                if let Some(delivery) = delivery {
                    self.settle(delivery).await?;
                }
            }
        }
    }
}
