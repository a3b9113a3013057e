//! Permanent-failure archive.
//!
//! Messages the sweep gives up on are written as NDJSON to a
//! configurable storage location for later inspection and manual
//! replay.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::Utc;
use snafu::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use lantern_core::StorageProvider;

use crate::config::SweepConfig;
use crate::error::{ArchiveError, OpenArchiveSnafu, SerializeFailureSnafu, WriteArchiveSnafu};

use super::types::{ArchiveStats, PermanentFailure};

/// Buffered NDJSON writer for permanent failures.
///
/// Records are buffered and written in batches. Object stores have no
/// append, so every flush writes its own object under a shared
/// run-scoped prefix.
pub struct FailureArchive {
    storage: Arc<StorageProvider>,
    filename_base: String,
    sequence: AtomicU64,
    buffer: Mutex<Vec<PermanentFailure>>,
    stats: Mutex<ArchiveStats>,
    buffer_size: usize,
}

impl FailureArchive {
    /// Create the archive from configuration.
    ///
    /// Returns `None` if no archive URL is configured.
    pub async fn from_config(config: &SweepConfig) -> Result<Option<Self>, ArchiveError> {
        let Some(archive_url) = &config.archive_url else {
            return Ok(None);
        };

        let storage = StorageProvider::for_url_with_options(
            archive_url,
            config.archive_storage_options.clone(),
        )
        .await
        .context(OpenArchiveSnafu)?;

        // One file prefix per process run
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let filename_base = format!("failures-{timestamp}");

        info!("Failure archive enabled: {}/{}-*.ndjson", archive_url, filename_base);

        Ok(Some(Self {
            storage: Arc::new(storage),
            filename_base,
            sequence: AtomicU64::new(0),
            buffer: Mutex::new(Vec::new()),
            stats: Mutex::new(ArchiveStats::default()),
            buffer_size: 100, // Flush every 100 records
        }))
    }

    /// Record a permanent failure.
    pub async fn record(&self, failure: PermanentFailure) {
        debug!(
            request_id = ?failure.request_id,
            reason = failure.reason.as_str(),
            "Recording permanent failure"
        );

        {
            let mut stats = self.stats.lock().await;
            stats.increment(failure.reason);
        }

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(failure);
            buffer.len() >= self.buffer_size
        };

        if should_flush && let Err(e) = self.flush().await {
            error!("Failed to flush failure archive: {}", e);
        }
    }

    /// Flush buffered records to storage.
    pub async fn flush(&self) -> Result<(), ArchiveError> {
        let records = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let count = records.len();
        debug!("Flushing {} failure records", count);

        let mut ndjson = String::new();
        for record in &records {
            let line = serde_json::to_string(record).context(SerializeFailureSnafu)?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let filename = format!("{}-{sequence:04}.ndjson", self.filename_base);
        self.storage
            .put(filename.as_str(), Bytes::from(ndjson))
            .await
            .context(WriteArchiveSnafu)?;

        info!("Flushed {} records to failure archive", count);
        Ok(())
    }

    /// Flush remaining records and log run totals.
    pub async fn finalize(&self) -> Result<(), ArchiveError> {
        self.flush().await?;
        let stats = self.stats.lock().await;
        info!(
            "Failure archive finalized: {} total ({} exhausted, {} unknown origin)",
            stats.total(),
            stats.exhausted,
            stats.unknown_origin
        );
        Ok(())
    }
}
