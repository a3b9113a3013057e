//! In-process broker implementation.
//!
//! Queues are FIFO buffers behind a single async mutex, with a per-queue
//! `Notify` for waking pull-based receivers. Dead-letter routing happens
//! inside `reject`: the owning queue's policy names the exchange and routing
//! key, lineage headers are recorded, and the message is routed like any
//! other publish.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use snafu::{OptionExt, ensure};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::emit;
use crate::error::{BrokerError, ExchangeNotFoundSnafu, QueueNotFoundSnafu, UnknownDeliverySnafu};
use crate::metrics::events::{MessageDeadLettered, MessageDelivered, MessagePublished};

use super::metadata::record_death;
use super::types::{DEFAULT_EXCHANGE, Delivery, MATCH_ALL, Message, QueueSpec};

struct Stored {
    message: Message,
    exchange: String,
    routing_key: String,
}

struct QueueState {
    spec: QueueSpec,
    buffer: VecDeque<Stored>,
    notify: Arc<Notify>,
}

struct BoundQueue {
    queue: String,
    pattern: String,
}

#[derive(Default)]
struct ExchangeState {
    bindings: Vec<BoundQueue>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, QueueState>,
    exchanges: HashMap<String, ExchangeState>,
    in_flight: HashSet<u64>,
}

/// In-process broker with AMQP-style queue, exchange, and dead-letter
/// semantics.
pub struct MemoryBroker {
    inner: Mutex<Inner>,
    next_tag: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_tag: AtomicU64::new(1),
        }
    }

    /// Wait for the next delivery on `queue`, without a timeout.
    async fn next_delivery(&self, queue: &str) -> Result<Delivery, BrokerError> {
        loop {
            let notify = {
                let mut inner = self.inner.lock().await;
                let state = inner
                    .queues
                    .get_mut(queue)
                    .context(QueueNotFoundSnafu { queue })?;
                if let Some(stored) = state.buffer.pop_front() {
                    let notify = state.notify.clone();
                    // Waking the next waiter keeps a second buffered message
                    // from sitting idle until its receiver's timeout expires.
                    if !state.buffer.is_empty() {
                        notify.notify_waiters();
                    }
                    return Ok(self.deliver(&mut inner, queue, stored));
                }
                state.notify.clone()
            };

            // Register interest, then re-check the buffer: a publish between
            // releasing the lock and enabling the waiter would otherwise be
            // missed (notify_waiters stores no permit).
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if let Some(state) = inner.queues.get_mut(queue) {
                    if let Some(stored) = state.buffer.pop_front() {
                        return Ok(self.deliver(&mut inner, queue, stored));
                    }
                }
            }

            notified.await;
        }
    }

    fn deliver(&self, inner: &mut Inner, queue: &str, stored: Stored) -> Delivery {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        inner.in_flight.insert(tag);
        emit!(MessageDelivered {
            queue: queue.to_string()
        });
        Delivery {
            tag,
            queue: queue.to_string(),
            exchange: stored.exchange,
            routing_key: stored.routing_key,
            message: stored.message,
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Route a message, either directly to a queue (default exchange) or through
/// a declared exchange's bindings.
fn route(
    inner: &mut Inner,
    exchange: &str,
    routing_key: &str,
    message: Message,
) -> Result<(), BrokerError> {
    if exchange == DEFAULT_EXCHANGE {
        return enqueue(inner, routing_key, exchange, routing_key, message);
    }

    let targets: Vec<String> = inner
        .exchanges
        .get(exchange)
        .context(ExchangeNotFoundSnafu { exchange })?
        .bindings
        .iter()
        .filter(|b| b.pattern == MATCH_ALL || b.pattern == routing_key)
        .map(|b| b.queue.clone())
        .collect();

    if targets.is_empty() {
        warn!(exchange, routing_key, "Unroutable message dropped");
        return Ok(());
    }

    match targets.as_slice() {
        [single] => enqueue(inner, single, exchange, routing_key, message),
        many => {
            for queue in many {
                enqueue(inner, queue, exchange, routing_key, message.clone())?;
            }
            Ok(())
        }
    }
}

fn enqueue(
    inner: &mut Inner,
    queue: &str,
    exchange: &str,
    routing_key: &str,
    message: Message,
) -> Result<(), BrokerError> {
    let state = inner
        .queues
        .get_mut(queue)
        .context(QueueNotFoundSnafu { queue })?;
    state.buffer.push_back(Stored {
        message,
        exchange: exchange.to_string(),
        routing_key: routing_key.to_string(),
    });
    state.notify.notify_waiters();
    emit!(MessagePublished {
        queue: queue.to_string()
    });
    Ok(())
}

#[async_trait]
impl super::Broker for MemoryBroker {
    async fn declare_queue(&self, spec: QueueSpec) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        if inner.queues.contains_key(&spec.name) {
            return Ok(());
        }
        debug!(queue = %spec.name, dead_letter = spec.dead_letter.is_some(), "Declared queue");
        inner.queues.insert(
            spec.name.clone(),
            QueueState {
                spec,
                buffer: VecDeque::new(),
                notify: Arc::new(Notify::new()),
            },
        );
        Ok(())
    }

    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner.exchanges.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        ensure!(
            inner.queues.contains_key(queue),
            QueueNotFoundSnafu { queue }
        );
        let state = inner
            .exchanges
            .get_mut(exchange)
            .context(ExchangeNotFoundSnafu { exchange })?;
        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern == routing_key);
        if !exists {
            state.bindings.push(BoundQueue {
                queue: queue.to_string(),
                pattern: routing_key.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        route(&mut inner, exchange, routing_key, message)
    }

    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        match tokio::time::timeout(timeout, self.next_delivery(queue)).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn ack(&self, delivery: Delivery) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        ensure!(
            inner.in_flight.remove(&delivery.tag),
            UnknownDeliverySnafu { tag: delivery.tag }
        );
        Ok(())
    }

    async fn reject(&self, delivery: Delivery, requeue: bool) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        ensure!(
            inner.in_flight.remove(&delivery.tag),
            UnknownDeliverySnafu { tag: delivery.tag }
        );

        if requeue {
            let state = inner
                .queues
                .get_mut(&delivery.queue)
                .context(QueueNotFoundSnafu {
                    queue: &delivery.queue,
                })?;
            state.buffer.push_front(Stored {
                message: delivery.message,
                exchange: delivery.exchange,
                routing_key: delivery.routing_key,
            });
            state.notify.notify_waiters();
            return Ok(());
        }

        let policy = inner
            .queues
            .get(&delivery.queue)
            .context(QueueNotFoundSnafu {
                queue: &delivery.queue,
            })?
            .spec
            .dead_letter
            .clone();

        match policy {
            None => {
                warn!(queue = %delivery.queue, "Rejected message has no dead-letter policy, dropping");
                Ok(())
            }
            Some(policy) => {
                let mut message = delivery.message;
                record_death(
                    &mut message.headers,
                    &delivery.queue,
                    &policy.exchange,
                    &policy.routing_key,
                );
                emit!(MessageDeadLettered {
                    queue: delivery.queue.clone()
                });
                debug!(
                    queue = %delivery.queue,
                    routing_key = %policy.routing_key,
                    "Dead-lettering rejected message"
                );
                route(&mut inner, &policy.exchange, &policy.routing_key, message)
            }
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, BrokerError> {
        let inner = self.inner.lock().await;
        let state = inner.queues.get(queue).context(QueueNotFoundSnafu { queue })?;
        Ok(state.buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Broker;
    use super::*;
    use crate::broker::metadata::{FIRST_DEATH_QUEUE_HEADER, Lineage};

    fn stage_queue(name: &str) -> QueueSpec {
        QueueSpec::durable(name).with_dead_letter("dlx", format!("{name}.dlq"))
    }

    async fn broker_with_topology() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.declare_exchange("dlx").await.unwrap();
        broker.declare_queue(stage_queue("work-a")).await.unwrap();
        broker.declare_queue(stage_queue("work-b")).await.unwrap();
        broker
            .declare_queue(QueueSpec::durable("dead-letters"))
            .await
            .unwrap();
        broker
            .bind_queue("dead-letters", "dlx", MATCH_ALL)
            .await
            .unwrap();
        broker
    }

    #[tokio::test]
    async fn test_publish_receive_roundtrip() {
        let broker = broker_with_topology().await;

        let mut message = Message::new(r#"{"requestId":"r1"}"#);
        message.headers.insert("x-trace", "abc");
        broker.publish("", "work-a", message).await.unwrap();

        let delivery = broker
            .receive("work-a", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.queue, "work-a");
        assert_eq!(delivery.routing_key, "work-a");
        assert_eq!(delivery.message.body.as_ref(), br#"{"requestId":"r1"}"#);
        assert_eq!(delivery.message.headers.get_str("x-trace"), Some("abc"));

        broker.ack(delivery).await.unwrap();
        assert_eq!(broker.queue_len("work-a").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_empty() {
        let broker = broker_with_topology().await;
        let result = broker
            .receive("work-a", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_receive_unknown_queue_errors() {
        let broker = MemoryBroker::new();
        let err = broker
            .receive("ghost", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::QueueNotFound { .. }));
    }

    #[tokio::test]
    async fn test_publish_unknown_queue_errors() {
        let broker = MemoryBroker::new();
        let err = broker
            .publish("", "ghost", Message::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::QueueNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reject_routes_to_dead_letter_queue_with_lineage() {
        let broker = broker_with_topology().await;
        broker
            .publish("", "work-a", Message::new("poison"))
            .await
            .unwrap();

        let delivery = broker
            .receive("work-a", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        broker.reject(delivery, false).await.unwrap();

        let dead = broker
            .receive("dead-letters", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dead.routing_key, "work-a.dlq");
        assert_eq!(dead.exchange, "dlx");
        assert_eq!(
            dead.message.headers.get_str(FIRST_DEATH_QUEUE_HEADER),
            Some("work-a")
        );

        let lineage = Lineage::from_headers(&dead.message.headers).unwrap();
        assert_eq!(lineage.last_death_queue(), Some("work-a"));
        assert_eq!(lineage.deaths[0].count, 1);
    }

    #[tokio::test]
    async fn test_second_death_from_same_queue_increments_count() {
        let broker = broker_with_topology().await;
        broker
            .publish("", "work-a", Message::new("poison"))
            .await
            .unwrap();

        // First trip to the dead-letter queue
        let delivery = broker
            .receive("work-a", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        broker.reject(delivery, false).await.unwrap();

        // Republish to origin (as the reprocessor would), then fail again
        let dead = broker
            .receive("dead-letters", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let message = Message::with_headers(dead.message.body.clone(), dead.message.headers.clone());
        broker.ack(dead).await.unwrap();
        broker.publish("", "work-a", message).await.unwrap();

        let delivery = broker
            .receive("work-a", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        broker.reject(delivery, false).await.unwrap();

        let dead = broker
            .receive("dead-letters", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let lineage = Lineage::from_headers(&dead.message.headers).unwrap();
        assert_eq!(lineage.deaths.len(), 1);
        assert_eq!(lineage.deaths[0].count, 2);
    }

    #[tokio::test]
    async fn test_reject_with_requeue_returns_to_front() {
        let broker = broker_with_topology().await;
        broker
            .publish("", "work-a", Message::new("first"))
            .await
            .unwrap();
        broker
            .publish("", "work-a", Message::new("second"))
            .await
            .unwrap();

        let delivery = broker
            .receive("work-a", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.body.as_ref(), b"first");
        broker.reject(delivery, true).await.unwrap();

        let delivery = broker
            .receive("work-a", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.body.as_ref(), b"first");
        assert_eq!(broker.queue_len("work-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_catch_all_binding_collects_all_routing_keys() {
        let broker = broker_with_topology().await;

        broker
            .publish("dlx", "work-a.dlq", Message::new("a"))
            .await
            .unwrap();
        broker
            .publish("dlx", "work-b.dlq", Message::new("b"))
            .await
            .unwrap();

        assert_eq!(broker.queue_len("dead-letters").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exact_binding_only_matches_its_key() {
        let broker = MemoryBroker::new();
        broker.declare_exchange("dlx").await.unwrap();
        broker
            .declare_queue(QueueSpec::durable("only-a"))
            .await
            .unwrap();
        broker
            .bind_queue("only-a", "dlx", "work-a.dlq")
            .await
            .unwrap();

        broker
            .publish("dlx", "work-a.dlq", Message::new("a"))
            .await
            .unwrap();
        // No matching binding: dropped, not an error
        broker
            .publish("dlx", "work-b.dlq", Message::new("b"))
            .await
            .unwrap();

        assert_eq!(broker.queue_len("only-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ack_unknown_tag_errors() {
        let broker = broker_with_topology().await;
        broker
            .publish("", "work-a", Message::new("x"))
            .await
            .unwrap();
        let delivery = broker
            .receive("work-a", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let forged = Delivery {
            tag: delivery.tag + 1000,
            queue: delivery.queue.clone(),
            exchange: delivery.exchange.clone(),
            routing_key: delivery.routing_key.clone(),
            message: Message::new("x"),
        };
        assert!(matches!(
            broker.ack(forged).await.unwrap_err(),
            BrokerError::UnknownDelivery { .. }
        ));
        broker.ack(delivery).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_receivers_get_distinct_messages() {
        let broker = Arc::new(broker_with_topology().await);

        let b1 = broker.clone();
        let b2 = broker.clone();
        let r1 = tokio::spawn(async move { b1.receive("work-a", Duration::from_secs(5)).await });
        let r2 = tokio::spawn(async move { b2.receive("work-a", Duration::from_secs(5)).await });

        broker
            .publish("", "work-a", Message::new("m1"))
            .await
            .unwrap();
        broker
            .publish("", "work-a", Message::new("m2"))
            .await
            .unwrap();

        let d1 = r1.await.unwrap().unwrap().unwrap();
        let d2 = r2.await.unwrap().unwrap().unwrap();

        let mut bodies = vec![
            String::from_utf8(d1.message.body.to_vec()).unwrap(),
            String::from_utf8(d2.message.body.to_vec()).unwrap(),
        ];
        bodies.sort();
        assert_eq!(bodies, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[tokio::test]
    async fn test_declare_queue_idempotent() {
        let broker = broker_with_topology().await;
        broker
            .publish("", "work-a", Message::new("kept"))
            .await
            .unwrap();
        // Redeclaration must not clear the buffer
        broker.declare_queue(stage_queue("work-a")).await.unwrap();
        assert_eq!(broker.queue_len("work-a").await.unwrap(), 1);
    }
}
