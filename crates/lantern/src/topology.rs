//! Queue and exchange topology for the staged pipeline.
//!
//! Three work queues feed the crawl, OCR, and finalize stages. Each
//! declares the shared `dlx` exchange as its dead-letter target with a
//! `<queue>.dlq` routing key, and a catch-all binding funnels every
//! dead-lettered message into one `dead-letter-queue`.

use lantern_core::{Broker, Headers, MATCH_ALL, QueueSpec};

use crate::error::BrokerError;

/// Queue feeding the crawl stage.
pub const CRAWLING_QUEUE: &str = "crawling-queue";
/// Queue feeding the OCR stage.
pub const OCR_REQUEST_QUEUE: &str = "ocr-request-queue";
/// Queue feeding the finalize stage.
pub const FINALIZE_QUEUE: &str = "finalize-queue";
/// Shared dead-letter queue for all stages.
pub const DEAD_LETTER_QUEUE: &str = "dead-letter-queue";

/// Exchange rejected messages are dead-lettered through.
pub const DLX_EXCHANGE: &str = "dlx";

/// Header counting how often the sweep has requeued a message.
/// Absent means zero; only the sweep writes it, and it only grows.
pub const DLQ_RETRY_COUNT_HEADER: &str = "x-dlq-retry-count";

/// Requeue budget per message before the sweep declares it a
/// permanent failure.
pub const MAX_DLQ_RETRIES: u64 = 3;

/// Stage queues in pipeline order.
pub const STAGE_QUEUES: [&str; 3] = [CRAWLING_QUEUE, OCR_REQUEST_QUEUE, FINALIZE_QUEUE];

/// Routing key a queue's rejected messages carry into the exchange.
pub fn dead_letter_routing_key(queue: &str) -> String {
    format!("{queue}.dlq")
}

/// Recover the origin queue from a `<queue>.dlq` routing key.
pub fn origin_from_routing_key(routing_key: &str) -> Option<&str> {
    routing_key
        .strip_suffix(".dlq")
        .filter(|queue| !queue.is_empty())
}

/// Read the sweep retry counter from message headers.
pub fn dlq_retry_count(headers: &Headers) -> u64 {
    headers.get_u64(DLQ_RETRY_COUNT_HEADER).unwrap_or(0)
}

/// Declare every queue, the dead-letter exchange, and the catch-all
/// binding. Idempotent, so it runs on every startup.
pub async fn declare_pipeline_topology(broker: &dyn Broker) -> Result<(), BrokerError> {
    broker.declare_exchange(DLX_EXCHANGE).await?;
    broker
        .declare_queue(QueueSpec::durable(DEAD_LETTER_QUEUE))
        .await?;
    broker
        .bind_queue(DEAD_LETTER_QUEUE, DLX_EXCHANGE, MATCH_ALL)
        .await?;

    for queue in STAGE_QUEUES {
        broker
            .declare_queue(
                QueueSpec::durable(queue)
                    .with_dead_letter(DLX_EXCHANGE, dead_letter_routing_key(queue)),
            )
            .await?;
    }

    Ok(())
}
