//! Delivery metadata: headers and dead-letter lineage.
//!
//! Lineage is written under an explicit schema version. A missing version,
//! an unknown version, or malformed entries all decode to "lineage unknown"
//! so a consumer can fall back to other recovery hints instead of failing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the lineage schema written by [`record_death`].
pub const LINEAGE_VERSION: u64 = 1;

/// Header carrying the lineage schema version.
pub const LINEAGE_VERSION_HEADER: &str = "x-lineage-version";

/// Header carrying the list of death records, most recent first.
pub const DEATH_HEADER: &str = "x-death";

/// Header carrying the queue of the very first death, set once and never
/// updated afterwards.
pub const FIRST_DEATH_QUEUE_HEADER: &str = "x-first-death-queue";

/// Broker message headers: a string-keyed map of JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(HashMap<String, Value>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// String value for `key`, if present and actually a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Integer value for `key`. Accepts a JSON number or a numeric string,
    /// since header values may have crossed a serialization boundary.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Why a message was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeathReason {
    /// Rejected by a consumer without requeue.
    Rejected,
}

/// One entry in the dead-letter lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeathRecord {
    /// Queue the message was dead-lettered from.
    pub queue: String,
    /// Exchange the message was routed through when it died.
    pub exchange: String,
    /// Routing key the message carried when it died.
    pub routing_key: String,
    pub reason: DeathReason,
    /// How many times this queue/reason pair has occurred.
    pub count: u64,
}

/// Decoded dead-letter lineage, most recent death first.
#[derive(Debug, Clone, PartialEq)]
pub struct Lineage {
    pub deaths: Vec<DeathRecord>,
}

impl Lineage {
    /// Decode lineage from headers.
    ///
    /// Returns `None` when the version header is absent or unrecognized, the
    /// death list is missing or not an array, or no entry in it decodes.
    /// Individual malformed entries are skipped rather than failing the whole
    /// decode.
    pub fn from_headers(headers: &Headers) -> Option<Self> {
        if headers.get_u64(LINEAGE_VERSION_HEADER)? != LINEAGE_VERSION {
            return None;
        }

        let deaths: Vec<DeathRecord> = headers
            .get(DEATH_HEADER)?
            .as_array()?
            .iter()
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect();

        if deaths.is_empty() {
            None
        } else {
            Some(Self { deaths })
        }
    }

    /// Queue of the most recent death.
    pub fn last_death_queue(&self) -> Option<&str> {
        self.deaths.first().map(|d| d.queue.as_str())
    }
}

/// Record a death in the message headers.
///
/// Prepends a new record, or moves an existing record for the same
/// queue/reason pair to the front with its count incremented. Sets the
/// version header, and the first-death-queue header if absent.
pub fn record_death(headers: &mut Headers, queue: &str, exchange: &str, routing_key: &str) {
    headers.insert(LINEAGE_VERSION_HEADER, LINEAGE_VERSION);
    if headers.get_str(FIRST_DEATH_QUEUE_HEADER).is_none() {
        headers.insert(FIRST_DEATH_QUEUE_HEADER, queue);
    }

    let mut deaths: Vec<DeathRecord> = headers
        .get(DEATH_HEADER)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    match deaths
        .iter()
        .position(|d| d.queue == queue && d.reason == DeathReason::Rejected)
    {
        Some(idx) => {
            let mut record = deaths.remove(idx);
            record.count += 1;
            record.exchange = exchange.to_string();
            record.routing_key = routing_key.to_string();
            deaths.insert(0, record);
        }
        None => deaths.insert(
            0,
            DeathRecord {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: DeathReason::Rejected,
                count: 1,
            },
        ),
    }

    let value = serde_json::to_value(&deaths).expect("death records serialize");
    headers.insert(DEATH_HEADER, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_death_first_time() {
        let mut headers = Headers::new();
        record_death(&mut headers, "crawling-queue", "dlx", "crawling-queue.dlq");

        assert_eq!(headers.get_u64(LINEAGE_VERSION_HEADER), Some(1));
        assert_eq!(
            headers.get_str(FIRST_DEATH_QUEUE_HEADER),
            Some("crawling-queue")
        );

        let lineage = Lineage::from_headers(&headers).unwrap();
        assert_eq!(lineage.deaths.len(), 1);
        assert_eq!(lineage.deaths[0].queue, "crawling-queue");
        assert_eq!(lineage.deaths[0].count, 1);
        assert_eq!(lineage.last_death_queue(), Some("crawling-queue"));
    }

    #[test]
    fn test_record_death_same_queue_increments_count() {
        let mut headers = Headers::new();
        record_death(&mut headers, "finalize-queue", "dlx", "finalize-queue.dlq");
        record_death(&mut headers, "finalize-queue", "dlx", "finalize-queue.dlq");

        let lineage = Lineage::from_headers(&headers).unwrap();
        assert_eq!(lineage.deaths.len(), 1);
        assert_eq!(lineage.deaths[0].count, 2);
    }

    #[test]
    fn test_record_death_different_queue_prepends() {
        let mut headers = Headers::new();
        record_death(&mut headers, "crawling-queue", "dlx", "crawling-queue.dlq");
        record_death(&mut headers, "finalize-queue", "dlx", "finalize-queue.dlq");

        let lineage = Lineage::from_headers(&headers).unwrap();
        assert_eq!(lineage.deaths.len(), 2);
        assert_eq!(lineage.last_death_queue(), Some("finalize-queue"));
        // First-death header keeps the original queue
        assert_eq!(
            headers.get_str(FIRST_DEATH_QUEUE_HEADER),
            Some("crawling-queue")
        );
    }

    #[test]
    fn test_lineage_missing_version_is_unknown() {
        let mut headers = Headers::new();
        headers.insert(
            DEATH_HEADER,
            json!([{
                "queue": "crawling-queue",
                "exchange": "dlx",
                "routing_key": "crawling-queue.dlq",
                "reason": "rejected",
                "count": 1
            }]),
        );

        assert!(Lineage::from_headers(&headers).is_none());
    }

    #[test]
    fn test_lineage_unknown_version_is_unknown() {
        let mut headers = Headers::new();
        record_death(&mut headers, "crawling-queue", "dlx", "crawling-queue.dlq");
        headers.insert(LINEAGE_VERSION_HEADER, 99);

        assert!(Lineage::from_headers(&headers).is_none());
    }

    #[test]
    fn test_lineage_skips_malformed_entries() {
        let mut headers = Headers::new();
        headers.insert(LINEAGE_VERSION_HEADER, LINEAGE_VERSION);
        headers.insert(
            DEATH_HEADER,
            json!([
                {"bogus": true},
                {
                    "queue": "ocr-request-queue",
                    "exchange": "dlx",
                    "routing_key": "ocr-request-queue.dlq",
                    "reason": "rejected",
                    "count": 3
                }
            ]),
        );

        let lineage = Lineage::from_headers(&headers).unwrap();
        assert_eq!(lineage.deaths.len(), 1);
        assert_eq!(lineage.deaths[0].queue, "ocr-request-queue");
    }

    #[test]
    fn test_lineage_all_malformed_is_unknown() {
        let mut headers = Headers::new();
        headers.insert(LINEAGE_VERSION_HEADER, LINEAGE_VERSION);
        headers.insert(DEATH_HEADER, json!(["nonsense", 42]));

        assert!(Lineage::from_headers(&headers).is_none());
    }

    #[test]
    fn test_headers_get_u64_accepts_numeric_string() {
        let mut headers = Headers::new();
        headers.insert("x-dlq-retry-count", "2");
        assert_eq!(headers.get_u64("x-dlq-retry-count"), Some(2));

        headers.insert("x-dlq-retry-count", 3);
        assert_eq!(headers.get_u64("x-dlq-retry-count"), Some(3));
    }
}
