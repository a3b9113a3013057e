//! Types for permanent-failure records and sweep accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why the sweep gave up on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The retry counter reached its budget.
    RetriesExhausted,
    /// No origin queue could be recovered from the message.
    UnknownOrigin,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::RetriesExhausted => "retries_exhausted",
            FailureReason::UnknownOrigin => "unknown_origin",
        }
    }
}

/// A permanently failed message, as written to the failure archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermanentFailure {
    /// Request id parsed from the body, when the body still decodes.
    pub request_id: Option<Uuid>,
    /// Origin queue, when one was recovered.
    pub origin: Option<String>,
    pub reason: FailureReason,
    /// Final value of the retry counter.
    pub retry_count: u64,
    /// Routing key the message carried in the dead-letter queue.
    pub routing_key: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// Raw message body, lossily decoded for inspection.
    pub body: String,
}

/// Best-effort request id extraction from a raw message body.
///
/// The body may be arbitrary bytes by the time a message is given up
/// on, so every step tolerates failure.
pub fn extract_request_id(body: &[u8]) -> Option<Uuid> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("requestId")?.as_str()?.parse().ok()
}

/// Counters for a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Messages requeued to their origin.
    pub requeued: usize,
    /// Messages archived as permanent failures.
    pub permanent: usize,
    /// Messages pushed back to the dead-letter queue after a failed
    /// republish.
    pub pushed_back: usize,
}

impl SweepStats {
    /// Messages removed from the dead-letter queue this sweep.
    pub fn drained(&self) -> usize {
        self.requeued + self.permanent
    }
}

/// Archive totals by failure reason.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveStats {
    pub exhausted: usize,
    pub unknown_origin: usize,
}

impl ArchiveStats {
    pub fn increment(&mut self, reason: FailureReason) {
        match reason {
            FailureReason::RetriesExhausted => self.exhausted += 1,
            FailureReason::UnknownOrigin => self.unknown_origin += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.exhausted + self.unknown_origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_stats_increment() {
        let mut stats = ArchiveStats::default();
        stats.increment(FailureReason::RetriesExhausted);
        stats.increment(FailureReason::RetriesExhausted);
        stats.increment(FailureReason::UnknownOrigin);

        assert_eq!(stats.exhausted, 2);
        assert_eq!(stats.unknown_origin, 1);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn request_id_extraction_tolerates_malformed_bodies() {
        let body = br#"{"requestId":"6f0f9a44-4a4e-4af1-a7f0-111111111111","caseId":1}"#;
        assert!(extract_request_id(body).is_some());

        assert_eq!(extract_request_id(b"not json"), None);
        assert_eq!(extract_request_id(br#"{"caseId":1}"#), None);
        assert_eq!(extract_request_id(br#"{"requestId":"not-a-uuid"}"#), None);
        assert_eq!(extract_request_id(br#"{"requestId":42}"#), None);
    }

    #[test]
    fn drained_excludes_pushbacks() {
        let stats = SweepStats {
            requeued: 2,
            permanent: 1,
            pushed_back: 4,
        };
        assert_eq!(stats.drained(), 3);
    }
}
