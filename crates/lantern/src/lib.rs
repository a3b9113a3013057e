//! Lantern: staged ingestion of missing-person case leads.
//!
//! This crate handles:
//! - Crawling blog posts that report sightings, staging their images
//! - Extracting text from staged images via an OCR service
//! - Attaching finished leads to per-case records in object storage
//! - Bounded in-process retries, dead-lettering, and a periodic sweep
//!   that requeues dead-lettered messages up to a retry budget

pub mod clients;
pub mod config;
pub mod consumer;
pub mod contacts;
pub mod dlq;
pub mod error;
pub mod message;
pub mod scheduler;
pub mod stages;
pub mod store;
pub mod topology;
pub mod workers;

// Re-export commonly used items
pub use config::{CliArgs, Config};
pub use error::PipelineError;
pub use message::{Contact, ContactKind, CrawlMessage, FinalizeMessage, OcrRequestMessage};
pub use stages::build_registry;
pub use topology::declare_pipeline_topology;
pub use workers::{Worker, build_workers};

// Re-export from lantern-core
pub use lantern_core::{
    Broker, BrokerRef, MemoryBroker, MetricsConfig, StorageProvider, StorageProviderRef,
    init_tracing, run_pipelines, shutdown_signal,
};
