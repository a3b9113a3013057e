//! Wire messages exchanged between pipeline stages.
//!
//! Bodies are JSON with camelCase keys. A message is immutable once
//! published; each stage builds a new message for the next queue and
//! carries the originating `requestId` forward unchanged, so the same
//! request can be correlated (and deduplicated) across stages and
//! redeliveries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored image reference produced by the crawl stage.
///
/// `width`/`height` are `None` when the pixel size could not be read
/// from the image header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    /// URL the image was downloaded from.
    pub source_url: String,
    /// Object key in the image store.
    pub key: String,
    /// Hex-encoded SHA-256 of the image bytes.
    pub checksum: String,
    pub content_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// How a contact value was recognized in the post text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Phone,
    Email,
}

/// A contact record extracted from the post body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub kind: ContactKind,
    pub value: String,
}

/// Request to crawl a single blog post for a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlMessage {
    /// Idempotency key, stable across stages and redeliveries.
    pub request_id: Uuid,
    /// Case row this post belongs to. Must exist before finalize runs.
    pub case_id: i64,
    pub blog_url: String,
    pub requested_at: DateTime<Utc>,
}

impl CrawlMessage {
    /// Build a fresh crawl request with a new `requestId`.
    pub fn new(case_id: i64, blog_url: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            case_id,
            blog_url: blog_url.into(),
            requested_at: Utc::now(),
        }
    }
}

/// Crawl output handed to the OCR stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrRequestMessage {
    pub request_id: Uuid,
    pub case_id: i64,
    pub blog_url: String,
    pub title: String,
    pub text: String,
    /// Stored images in the order they appeared in the post.
    pub uploaded_images: Vec<UploadedImage>,
    pub contacts: Vec<Contact>,
}

impl OcrRequestMessage {
    /// Build the OCR request for a crawled post, carrying the crawl
    /// message's identity forward.
    pub fn from_crawl(
        crawl: &CrawlMessage,
        title: String,
        text: String,
        uploaded_images: Vec<UploadedImage>,
        contacts: Vec<Contact>,
    ) -> Self {
        Self {
            request_id: crawl.request_id,
            case_id: crawl.case_id,
            blog_url: crawl.blog_url.clone(),
            title,
            text,
            uploaded_images,
            contacts,
        }
    }
}

/// OCR output handed to the finalize stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeMessage {
    pub request_id: Uuid,
    pub case_id: i64,
    pub blog_url: String,
    pub title: String,
    pub text: String,
    pub uploaded_images: Vec<UploadedImage>,
    pub contacts: Vec<Contact>,
    /// Raw recognized text across all images.
    pub ocr_result: String,
    /// Structured `key: value` fields parsed out of `ocrResult`.
    pub parsed_ocr_data: BTreeMap<String, String>,
}

impl FinalizeMessage {
    /// Build the finalize request from OCR output.
    pub fn from_ocr(
        ocr: OcrRequestMessage,
        ocr_result: String,
        parsed_ocr_data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            request_id: ocr.request_id,
            case_id: ocr.case_id,
            blog_url: ocr.blog_url,
            title: ocr.title,
            text: ocr.text,
            uploaded_images: ocr.uploaded_images,
            contacts: ocr.contacts,
            ocr_result,
            parsed_ocr_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> UploadedImage {
        UploadedImage {
            source_url: "https://blog.example/poster.jpg".to_string(),
            key: "images/ab/abcd1234".to_string(),
            checksum: "abcd1234".to_string(),
            content_type: "image/jpeg".to_string(),
            width: Some(800),
            height: Some(600),
        }
    }

    #[test]
    fn crawl_message_serializes_camel_case() {
        let message = CrawlMessage::new(42, "https://blog.example/post/1");
        let json = serde_json::to_value(&message).unwrap();

        assert!(json.get("requestId").is_some());
        assert_eq!(json["caseId"], 42);
        assert_eq!(json["blogUrl"], "https://blog.example/post/1");
        assert!(json.get("requestedAt").is_some());
        assert!(json.get("request_id").is_none());
    }

    #[test]
    fn fresh_crawl_messages_get_distinct_request_ids() {
        let a = CrawlMessage::new(1, "https://blog.example/a");
        let b = CrawlMessage::new(1, "https://blog.example/a");
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn ocr_request_carries_crawl_identity() {
        let crawl = CrawlMessage::new(7, "https://blog.example/post/7");
        let ocr = OcrRequestMessage::from_crawl(
            &crawl,
            "Missing: Jane Doe".to_string(),
            "Last seen downtown.".to_string(),
            vec![sample_image()],
            vec![Contact {
                kind: ContactKind::Phone,
                value: "010-1234-5678".to_string(),
            }],
        );

        assert_eq!(ocr.request_id, crawl.request_id);
        assert_eq!(ocr.case_id, crawl.case_id);
        assert_eq!(ocr.blog_url, crawl.blog_url);
    }

    #[test]
    fn finalize_carries_everything_forward() {
        let crawl = CrawlMessage::new(7, "https://blog.example/post/7");
        let ocr = OcrRequestMessage::from_crawl(
            &crawl,
            "Missing: Jane Doe".to_string(),
            "Last seen downtown.".to_string(),
            vec![sample_image()],
            vec![],
        );
        let mut parsed = BTreeMap::new();
        parsed.insert("name".to_string(), "Jane Doe".to_string());

        let finalize = FinalizeMessage::from_ocr(ocr.clone(), "name: Jane Doe".to_string(), parsed);

        assert_eq!(finalize.request_id, crawl.request_id);
        assert_eq!(finalize.title, ocr.title);
        assert_eq!(finalize.uploaded_images, ocr.uploaded_images);
        assert_eq!(finalize.parsed_ocr_data["name"], "Jane Doe");
    }

    #[test]
    fn finalize_round_trips_through_json() {
        let crawl = CrawlMessage::new(3, "https://blog.example/post/3");
        let ocr = OcrRequestMessage::from_crawl(
            &crawl,
            "t".to_string(),
            "b".to_string(),
            vec![sample_image()],
            vec![Contact {
                kind: ContactKind::Email,
                value: "tips@example.org".to_string(),
            }],
        );
        let finalize = FinalizeMessage::from_ocr(ocr, "raw".to_string(), BTreeMap::new());

        let bytes = serde_json::to_vec(&finalize).unwrap();
        let decoded: FinalizeMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, finalize);
    }

    #[test]
    fn unknown_body_fields_are_tolerated() {
        let json = r#"{
            "requestId": "6f0f9a44-4a4e-4af1-a7f0-111111111111",
            "caseId": 9,
            "blogUrl": "https://blog.example/post/9",
            "requestedAt": "2024-05-01T00:00:00Z",
            "futureField": true
        }"#;

        let message: CrawlMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.case_id, 9);
    }
}
