//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.
//!
//! ## Queue Labels
//!
//! Broker and consumer metrics carry a `queue` label so the three processing
//! stages can be observed independently (e.g. `"crawling-queue"`,
//! `"ocr-request-queue"`, `"finalize-queue"`).

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Broker events
// ============================================================================

/// Event emitted when a message lands on a queue.
pub struct MessagePublished {
    pub queue: String,
}

impl InternalEvent for MessagePublished {
    fn emit(self) {
        trace!(queue = %self.queue, "Message published");
        counter!("lantern_messages_published_total", "queue" => self.queue).increment(1);
    }
}

/// Event emitted when a message is handed to a receiver.
pub struct MessageDelivered {
    pub queue: String,
}

impl InternalEvent for MessageDelivered {
    fn emit(self) {
        trace!(queue = %self.queue, "Message delivered");
        counter!("lantern_messages_delivered_total", "queue" => self.queue).increment(1);
    }
}

/// Event emitted when a rejected message is routed to its dead-letter
/// exchange. The label is the queue the message died on, not the
/// dead-letter queue it lands on.
pub struct MessageDeadLettered {
    pub queue: String,
}

impl InternalEvent for MessageDeadLettered {
    fn emit(self) {
        trace!(queue = %self.queue, "Message dead-lettered");
        counter!("lantern_messages_dead_lettered_total", "queue" => self.queue).increment(1);
    }
}

// ============================================================================
// Consumer events
// ============================================================================

/// Final status of a consumed message.
#[derive(Debug, Clone, Copy)]
pub enum MessageStatus {
    Success,
    DeadLettered,
}

impl MessageStatus {
    fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Success => "success",
            MessageStatus::DeadLettered => "dead_lettered",
        }
    }
}

/// Event emitted when a stage consumer finishes with a message, whether the
/// handler succeeded or the message was given up on.
pub struct StageMessageProcessed {
    pub queue: String,
    pub status: MessageStatus,
}

impl InternalEvent for StageMessageProcessed {
    fn emit(self) {
        trace!(queue = %self.queue, status = self.status.as_str(), "Stage message processed");
        counter!("lantern_stage_messages_total", "queue" => self.queue, "status" => self.status.as_str())
            .increment(1);
    }
}

/// Event emitted when a handler invocation fails and another attempt is
/// scheduled.
pub struct HandlerRetried {
    pub queue: String,
    pub attempt: u32,
}

impl InternalEvent for HandlerRetried {
    fn emit(self) {
        trace!(queue = %self.queue, attempt = self.attempt, "Handler retried");
        counter!("lantern_handler_retries_total", "queue" => self.queue).increment(1);
    }
}

// ============================================================================
// Histogram events for timing
// ============================================================================

/// Event emitted when a handler invocation completes, covering every retry
/// attempt for the delivery.
pub struct HandlerCompleted {
    pub queue: String,
    pub duration: Duration,
}

impl InternalEvent for HandlerCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            queue = %self.queue,
            "Handler completed"
        );
        histogram!("lantern_handler_duration_seconds", "queue" => self.queue)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a blog page fetch completes.
pub struct PageFetchCompleted {
    pub duration: Duration,
}

impl InternalEvent for PageFetchCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "Page fetch completed");
        histogram!("lantern_page_fetch_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a text extraction request completes.
pub struct OcrRequestCompleted {
    pub duration: Duration,
}

impl InternalEvent for OcrRequestCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "OCR request completed");
        histogram!("lantern_ocr_request_duration_seconds").record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Storage events
// ============================================================================

/// Event emitted when an image upload completes.
pub struct ImageUploaded {
    pub bytes: u64,
}

impl InternalEvent for ImageUploaded {
    fn emit(self) {
        trace!(bytes = self.bytes, "Image uploaded");
        counter!("lantern_images_uploaded_total").increment(1);
        counter!("lantern_image_bytes_uploaded_total").increment(self.bytes);
    }
}

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "lantern_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

// ============================================================================
// Dead-letter sweep events
// ============================================================================

/// Event emitted when a dead-lettered message is requeued to its origin.
pub struct DlqMessageRequeued {
    pub origin: String,
}

impl InternalEvent for DlqMessageRequeued {
    fn emit(self) {
        trace!(origin = %self.origin, "Dead-lettered message requeued");
        counter!("lantern_dlq_requeued_total", "origin" => self.origin).increment(1);
    }
}

/// Event emitted when a dead-lettered message is dropped permanently.
pub struct DlqMessagePermanent {
    pub origin: String,
}

impl InternalEvent for DlqMessagePermanent {
    fn emit(self) {
        trace!(origin = %self.origin, "Dead-lettered message dropped permanently");
        counter!("lantern_dlq_permanent_total", "origin" => self.origin).increment(1);
    }
}

/// Event emitted when a dead-letter sweep finishes.
pub struct DlqSweepCompleted {
    pub drained: u64,
    pub duration: Duration,
}

impl InternalEvent for DlqSweepCompleted {
    fn emit(self) {
        trace!(
            drained = self.drained,
            duration_ms = self.duration.as_millis(),
            "Dead-letter sweep completed"
        );
        counter!("lantern_dlq_swept_total").increment(self.drained);
        histogram!("lantern_dlq_sweep_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted to track the dead-letter queue depth at sweep time.
pub struct DlqDepth {
    pub count: usize,
}

impl InternalEvent for DlqDepth {
    fn emit(self) {
        trace!(count = self.count, "Dead-letter queue depth");
        gauge!("lantern_dlq_depth").set(self.count as f64);
    }
}

// ============================================================================
// Scheduling events
// ============================================================================

/// Event emitted when open cases are seeded into the crawl queue.
pub struct CasesSeeded {
    pub count: u64,
}

impl InternalEvent for CasesSeeded {
    fn emit(self) {
        trace!(count = self.count, "Cases seeded");
        counter!("lantern_cases_seeded_total").increment(self.count);
    }
}
