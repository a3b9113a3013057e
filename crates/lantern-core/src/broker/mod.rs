//! Message broker abstraction.
//!
//! The pipeline talks to its broker through the [`Broker`] trait: declare
//! topology at startup, publish messages, pull deliveries with a short
//! timeout, and settle each delivery with an ack or a reject. Rejecting
//! without requeue triggers the owning queue's dead-letter policy, recording
//! lineage metadata on the way.
//!
//! [`MemoryBroker`] is the in-process implementation; the trait is the seam
//! where a networked client would plug in.

mod memory;
pub mod metadata;
mod types;

pub use memory::MemoryBroker;
pub use metadata::{
    DEATH_HEADER, DeathReason, DeathRecord, FIRST_DEATH_QUEUE_HEADER, Headers, LINEAGE_VERSION,
    LINEAGE_VERSION_HEADER, Lineage,
};
pub use types::{DEFAULT_EXCHANGE, DeadLetterPolicy, Delivery, MATCH_ALL, Message, QueueSpec};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;

/// A reference-counted broker handle.
pub type BrokerRef = Arc<dyn Broker>;

/// Operations the pipeline needs from its message broker.
///
/// Delivery semantics are at-least-once: a delivery that is neither acked nor
/// rejected may be seen again, so consumers must be idempotent.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue. Redeclaring an existing queue is a no-op.
    async fn declare_queue(&self, spec: QueueSpec) -> Result<(), BrokerError>;

    /// Declare a direct exchange. Redeclaring is a no-op.
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError>;

    /// Bind a queue to an exchange under a routing key pattern. The pattern
    /// [`MATCH_ALL`] matches every key; anything else matches exactly.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Publish a message. The empty exchange name ([`DEFAULT_EXCHANGE`])
    /// routes directly to the queue named by `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<(), BrokerError>;

    /// Pull the next delivery from `queue`, waiting up to `timeout`.
    /// Returns `None` if nothing arrived in time.
    async fn receive(&self, queue: &str, timeout: Duration)
    -> Result<Option<Delivery>, BrokerError>;

    /// Settle a delivery as successfully processed.
    async fn ack(&self, delivery: Delivery) -> Result<(), BrokerError>;

    /// Settle a delivery as failed. With `requeue` the message returns to the
    /// front of its queue; without it the queue's dead-letter policy applies
    /// (no policy means the message is dropped).
    async fn reject(&self, delivery: Delivery, requeue: bool) -> Result<(), BrokerError>;

    /// Number of messages currently waiting in `queue`.
    async fn queue_len(&self, queue: &str) -> Result<usize, BrokerError>;
}
