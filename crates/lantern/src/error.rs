//! Error types for the lantern ingestion pipeline.

use snafu::prelude::*;

// Re-export common errors
pub use lantern_core::{BrokerError, ConfigError, PipelineSetupError, StorageError};

/// Errors from fetching and parsing blog posts.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BlogError {
    /// HTTP client construction failed.
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild { source: reqwest::Error },

    /// HTTP request failed.
    #[snafu(display("Failed to fetch {url}: {source}"))]
    Fetch { url: String, source: reqwest::Error },

    /// Server answered with a non-success status.
    #[snafu(display("Unexpected status {status} from {url}"))]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// A discovered link could not be resolved against the page URL.
    #[snafu(display("Invalid URL {url}: {source}"))]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    /// Page contained no recognizable post body.
    #[snafu(display("No post content found at {url}"))]
    EmptyPost { url: String },
}

/// Errors from the OCR service client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OcrError {
    /// HTTP request failed.
    #[snafu(display("OCR request failed: {source}"))]
    Request { source: reqwest::Error },

    /// OCR service answered with a non-success status.
    #[snafu(display("OCR service answered with status {status}"))]
    ServiceStatus { status: reqwest::StatusCode },
}

/// Errors from the case document store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CaseStoreError {
    /// Failed to read a case document.
    #[snafu(display("Failed to read case {case_id}: {source}"))]
    ReadCase { case_id: i64, source: StorageError },

    /// Failed to write a case document.
    #[snafu(display("Failed to write case {case_id}: {source}"))]
    WriteCase { case_id: i64, source: StorageError },

    /// Stored case document did not decode.
    #[snafu(display("Case {case_id} is malformed: {source}"))]
    DecodeCase {
        case_id: i64,
        source: serde_json::Error,
    },

    /// Failed to serialize a case document.
    #[snafu(display("Failed to serialize case {case_id}: {source}"))]
    EncodeCase {
        case_id: i64,
        source: serde_json::Error,
    },

    /// Referenced case was never created.
    #[snafu(display("Case {case_id} does not exist"))]
    CaseNotFound { case_id: i64 },
}

/// Errors from the permanent-failure archive.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArchiveError {
    /// Failed to open the archive's storage location.
    #[snafu(display("Failed to open failure archive: {source}"))]
    OpenArchive { source: StorageError },

    /// Failed to serialize a failure record.
    #[snafu(display("Failed to serialize failure record: {source}"))]
    SerializeFailure { source: serde_json::Error },

    /// Failed to write the failure archive.
    #[snafu(display("Failed to write failure archive: {source}"))]
    WriteArchive { source: StorageError },
}

/// Errors returned by stage handlers.
///
/// The retry loop asks `is_terminal` whether a failure is worth
/// another attempt; terminal failures dead-letter on the attempt that
/// produced them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StageError {
    /// Message body did not decode.
    #[snafu(display("Malformed message body: {source}"))]
    MalformedBody { source: serde_json::Error },

    /// Blog fetch or parse failed.
    #[snafu(display("Blog error: {source}"))]
    Blog { source: BlogError },

    /// Image upload failed.
    #[snafu(display("Image store error: {source}"))]
    Image { source: StorageError },

    /// OCR call failed.
    #[snafu(display("OCR error: {source}"))]
    Ocr { source: OcrError },

    /// Case store operation failed.
    #[snafu(display("Case store error: {source}"))]
    Cases { source: CaseStoreError },

    /// The next stage's message did not serialize.
    #[snafu(display("Failed to encode message for {queue}: {source}"))]
    EncodeNext {
        queue: String,
        source: serde_json::Error,
    },

    /// Handing the message to the next stage failed.
    #[snafu(display("Failed to publish to {queue}: {source}"))]
    PublishNext { queue: String, source: BrokerError },
}

impl StageError {
    /// Whether retrying this failure can possibly succeed.
    pub fn is_terminal(&self) -> bool {
        match self {
            StageError::MalformedBody { .. } | StageError::EncodeNext { .. } => true,
            StageError::Cases { source } => {
                matches!(source, CaseStoreError::CaseNotFound { .. })
            }
            _ => false,
        }
    }
}

impl From<BlogError> for StageError {
    fn from(source: BlogError) -> Self {
        StageError::Blog { source }
    }
}

impl From<OcrError> for StageError {
    fn from(source: OcrError) -> Self {
        StageError::Ocr { source }
    }
}

impl From<CaseStoreError> for StageError {
    fn from(source: CaseStoreError) -> Self {
        StageError::Cases { source }
    }
}

/// Errors that stop a stage consumer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConsumerError {
    /// Broker operation failed.
    #[snafu(display("Broker error on {queue}: {source}"))]
    ConsumerBroker { queue: String, source: BrokerError },
}

/// Errors that abort the dead-letter sweeper.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SweepError {
    /// Broker operation failed.
    #[snafu(display("Broker error during sweep: {source}"))]
    SweepBroker { source: BrokerError },
}

/// Errors from the seed publisher.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchedulerError {
    /// Publishing a seed message failed.
    #[snafu(display("Failed to publish seed for case {case_id}: {source}"))]
    SeedPublish { case_id: i64, source: BrokerError },

    /// A seed message did not serialize.
    #[snafu(display("Failed to encode seed for case {case_id}: {source}"))]
    SeedEncode {
        case_id: i64,
        source: serde_json::Error,
    },
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Broker error.
    #[snafu(display("Broker error: {source}"))]
    Broker { source: BrokerError },

    /// Pipeline setup error.
    #[snafu(display("Setup error: {source}"))]
    Setup { source: PipelineSetupError },

    /// Failure archive error.
    #[snafu(display("Archive error: {source}"))]
    Archive { source: ArchiveError },

    /// HTTP client construction failed.
    #[snafu(display("HTTP client error: {source}"))]
    Client { source: BlogError },

    /// Stage consumer error.
    #[snafu(display("Consumer error: {source}"))]
    Consumer { source: ConsumerError },

    /// Dead-letter sweeper error.
    #[snafu(display("Sweep error: {source}"))]
    Sweep { source: SweepError },

    /// Case seeder error.
    #[snafu(display("Seeder error: {source}"))]
    Seed { source: SchedulerError },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::Storage { source }
    }
}

impl From<BrokerError> for PipelineError {
    fn from(source: BrokerError) -> Self {
        PipelineError::Broker { source }
    }
}

impl From<PipelineSetupError> for PipelineError {
    fn from(source: PipelineSetupError) -> Self {
        PipelineError::Setup { source }
    }
}

impl From<ArchiveError> for PipelineError {
    fn from(source: ArchiveError) -> Self {
        PipelineError::Archive { source }
    }
}

impl From<BlogError> for PipelineError {
    fn from(source: BlogError) -> Self {
        PipelineError::Client { source }
    }
}

impl From<ConsumerError> for PipelineError {
    fn from(source: ConsumerError) -> Self {
        PipelineError::Consumer { source }
    }
}

impl From<SweepError> for PipelineError {
    fn from(source: SweepError) -> Self {
        PipelineError::Sweep { source }
    }
}

impl From<SchedulerError> for PipelineError {
    fn from(source: SchedulerError) -> Self {
        PipelineError::Seed { source }
    }
}
