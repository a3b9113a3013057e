//! Dead-letter handling: the scheduled reprocessing sweep and the
//! permanent-failure archive.
//!
//! Rejected messages from every stage land on one shared dead-letter
//! queue. The sweep gives each of them a bounded number of fresh
//! chances on its origin queue; what remains is written to the archive
//! as NDJSON for later inspection.

mod archive;
mod reprocessor;
mod types;

pub use archive::FailureArchive;
pub use reprocessor::{DlqReprocessor, DlqSweeper};
pub use types::{ArchiveStats, FailureReason, PermanentFailure, SweepStats, extract_request_id};
