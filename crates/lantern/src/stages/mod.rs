//! Stage handlers for the three pipeline queues.
//!
//! Crawl fetches the post and stages its images, recognition turns the
//! staged images into text, and finalize attaches the completed lead
//! to its case record. Each stage republishes the enriched message to
//! the next queue; the message a stage consumed is never mutated.

mod crawl;
mod finalize;
mod ocr;

pub use crawl::CrawlStage;
pub use finalize::FinalizeStage;
pub use ocr::OcrStage;

use std::sync::Arc;

use lantern_core::{Broker, BrokerRef, DEFAULT_EXCHANGE, Message};
use serde::Serialize;
use snafu::ResultExt;

use crate::clients::{BlogClient, OcrClient};
use crate::consumer::StageRegistry;
use crate::error::{EncodeNextSnafu, PublishNextSnafu, StageError};
use crate::store::{CaseStore, ImageStore};

/// Serialize a message and hand it to the next stage's queue.
async fn publish_next<T: Serialize>(
    broker: &dyn Broker,
    queue: &'static str,
    message: &T,
) -> Result<(), StageError> {
    let body = serde_json::to_vec(message).context(EncodeNextSnafu { queue })?;
    broker
        .publish(DEFAULT_EXCHANGE, queue, Message::new(body))
        .await
        .context(PublishNextSnafu { queue })
}

/// Wire every stage handler into a registry.
pub fn build_registry(
    broker: BrokerRef,
    blog: Arc<dyn BlogClient>,
    ocr: Arc<dyn OcrClient>,
    images: Arc<dyn ImageStore>,
    cases: Arc<dyn CaseStore>,
) -> StageRegistry {
    let mut registry = StageRegistry::new();
    registry.register(CrawlStage::new(broker.clone(), blog, images.clone()));
    registry.register(OcrStage::new(broker, ocr, images));
    registry.register(FinalizeStage::new(cases));
    registry
}
