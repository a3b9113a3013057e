//! Recognition stage: extract text from staged images.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use lantern_core::BrokerRef;
use tracing::info;

use crate::clients::OcrClient;
use crate::consumer::Stage;
use crate::error::StageError;
use crate::message::{FinalizeMessage, OcrRequestMessage};
use crate::store::ImageStore;
use crate::topology::{FINALIZE_QUEUE, OCR_REQUEST_QUEUE};

use super::publish_next;

pub struct OcrStage {
    broker: BrokerRef,
    ocr: Arc<dyn OcrClient>,
    images: Arc<dyn ImageStore>,
}

impl OcrStage {
    pub fn new(broker: BrokerRef, ocr: Arc<dyn OcrClient>, images: Arc<dyn ImageStore>) -> Self {
        Self {
            broker,
            ocr,
            images,
        }
    }
}

#[async_trait]
impl Stage for OcrStage {
    type Message = OcrRequestMessage;

    fn queue(&self) -> &'static str {
        OCR_REQUEST_QUEUE
    }

    async fn handle(&self, message: OcrRequestMessage, attempt: u32) -> Result<(), StageError> {
        info!(
            request_id = %message.request_id,
            case_id = message.case_id,
            images = message.uploaded_images.len(),
            attempt,
            "Recognizing text"
        );

        let mut fragments = Vec::with_capacity(message.uploaded_images.len());
        for image in &message.uploaded_images {
            let url = self.images.public_url(&image.key);
            let text = self.ocr.recognize(&url).await?;
            if !text.is_empty() {
                fragments.push(text);
            }
        }

        let ocr_result = fragments.join("\n");
        let parsed = parse_ocr_fields(&ocr_result);

        info!(
            request_id = %message.request_id,
            fields = parsed.len(),
            "Text recognized"
        );

        let next = FinalizeMessage::from_ocr(message, ocr_result, parsed);
        publish_next(self.broker.as_ref(), FINALIZE_QUEUE, &next).await
    }
}

/// Parse `key: value` lines out of recognized text. The last
/// occurrence of a key wins.
fn parse_ocr_fields(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        fields.insert(key.to_string(), value.to_string());
    }
    fields
}
