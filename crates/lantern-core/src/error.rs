//! Error types for broker, storage, configuration, and metrics operations.

use snafu::prelude::*;

// ============ Broker Errors ============

/// Errors that can occur during broker operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BrokerError {
    /// Referenced queue has not been declared.
    #[snafu(display("Queue '{queue}' is not declared"))]
    QueueNotFound { queue: String },

    /// Referenced exchange has not been declared.
    #[snafu(display("Exchange '{exchange}' is not declared"))]
    ExchangeNotFound { exchange: String },

    /// Delivery tag does not match any in-flight message.
    #[snafu(display("Delivery tag {tag} is not in flight"))]
    UnknownDelivery { tag: u64 },
}

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// A required field is missing or empty.
    #[snafu(display("Configuration field '{field}' cannot be empty"))]
    MissingValue { field: &'static str },

    /// A numeric field is outside its allowed range.
    #[snafu(display("Configuration field '{field}' is invalid: {message}"))]
    OutOfRange {
        field: &'static str,
        message: String,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics have already been initialized.
    #[snafu(display("Metrics already initialized"))]
    AlreadyInitialized,

    /// Metrics have not been initialized yet.
    #[snafu(display("Metrics not initialized"))]
    NotInitialized,
}

// ============ Pipeline Errors ============

/// Errors that can occur while setting up the pipeline runner.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineSetupError {
    /// Metrics address could not be parsed.
    #[snafu(display("Invalid metrics address '{address}'"))]
    AddressParse {
        address: String,
        source: std::net::AddrParseError,
    },

    /// Metrics initialization failed.
    #[snafu(display("Failed to initialize metrics"))]
    Metrics { source: MetricsError },
}
