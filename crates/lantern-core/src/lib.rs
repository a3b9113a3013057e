//! lantern-core: Shared components for the lead processing pipeline.
//!
//! This crate contains the infrastructure the lantern binary is built on:
//!
//! - `broker/` - Queue broker trait, in-process implementation, and
//!   dead-letter lineage metadata
//! - `metrics/` - Prometheus metrics infrastructure
//! - `config/` - Common configuration types and environment variable interpolation
//! - `storage` - Object storage abstraction (S3, local, in-memory)
//! - `pipeline` - Orchestration primitives for long-lived workers
//! - `polling` - Generic polling loop trait and runner
//! - `signal` - Signal handling for graceful shutdown
//! - `tracing` - Tracing initialization
//! - `error` - Common error types

pub mod broker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod polling;
pub mod signal;
pub mod storage;
pub mod tracing;

// Re-export commonly used items
pub use broker::{
    Broker, BrokerRef, DEFAULT_EXCHANGE, DeadLetterPolicy, Delivery, Headers, Lineage, MATCH_ALL,
    MemoryBroker, Message, QueueSpec,
};
pub use config::{MetricsConfig, interpolate};
pub use error::{
    BrokerError, ConfigError, MetricsError, PipelineSetupError, StorageError,
};
pub use metrics::{
    init_global as init_metrics, init_test as init_metrics_test, server::DEFAULT_METRICS_ADDR,
    server::MetricsController,
};
pub use pipeline::{Pipeline, PipelineContext, PipelineRunner, random_jitter, run_pipelines};
pub use polling::{IterationResult, PollingProcessor, run_polling_loop};
pub use signal::shutdown_signal;
pub use storage::{StorageProvider, StorageProviderRef};
pub use tracing::init_tracing;
