//! Broker value types: messages, deliveries, and topology declarations.

use bytes::Bytes;

use super::metadata::Headers;

/// Binding pattern that matches every routing key.
pub const MATCH_ALL: &str = "#";

/// Name of the default exchange, which routes directly to the queue named by
/// the routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// Dead-letter routing attached to a queue at declaration time.
///
/// A message rejected without requeue from the owning queue is republished to
/// `exchange` with `routing_key`, after lineage metadata has been recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    pub exchange: String,
    pub routing_key: String,
}

/// Declaration of a work queue.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    /// Durable declarations are idempotent: re-declaring an existing queue
    /// with the same spec is a no-op.
    pub durable: bool,
    pub dead_letter: Option<DeadLetterPolicy>,
}

impl QueueSpec {
    /// A durable queue with no dead-letter routing.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            dead_letter: None,
        }
    }

    /// Attach a dead-letter policy to this queue.
    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.dead_letter = Some(DeadLetterPolicy {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        });
        self
    }
}

/// A message to publish: opaque body plus broker headers.
#[derive(Debug, Clone)]
pub struct Message {
    pub body: Bytes,
    pub headers: Headers,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_headers(body: impl Into<Bytes>, headers: Headers) -> Self {
        Self {
            body: body.into(),
            headers,
        }
    }
}

/// A single delivery pulled from a queue.
///
/// The broker tracks the delivery by `tag` until it is acked or rejected;
/// consuming code must settle every delivery exactly once.
#[derive(Debug)]
pub struct Delivery {
    /// Broker-assigned tag identifying this delivery.
    pub tag: u64,
    /// Queue the delivery was pulled from.
    pub queue: String,
    /// Exchange the message was last published through.
    pub exchange: String,
    /// Routing key the message was last published with.
    pub routing_key: String,
    pub message: Message,
}
