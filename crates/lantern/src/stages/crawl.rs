//! Crawl stage: fetch the post behind a lead and stage its images.

use std::sync::Arc;

use async_trait::async_trait;
use lantern_core::BrokerRef;
use snafu::ResultExt;
use tracing::{info, warn};

use crate::clients::BlogClient;
use crate::consumer::Stage;
use crate::contacts::extract_contacts;
use crate::error::{ImageSnafu, StageError};
use crate::message::{CrawlMessage, OcrRequestMessage, UploadedImage};
use crate::store::ImageStore;
use crate::topology::{CRAWLING_QUEUE, OCR_REQUEST_QUEUE};

use super::publish_next;

pub struct CrawlStage {
    broker: BrokerRef,
    blog: Arc<dyn BlogClient>,
    images: Arc<dyn ImageStore>,
}

impl CrawlStage {
    pub fn new(broker: BrokerRef, blog: Arc<dyn BlogClient>, images: Arc<dyn ImageStore>) -> Self {
        Self {
            broker,
            blog,
            images,
        }
    }

    /// Download and stage every image the post references.
    ///
    /// An image that fails to download is skipped; the lead is still
    /// usable without it. Upload failures are propagated.
    async fn stage_images(&self, urls: &[String]) -> Result<Vec<UploadedImage>, StageError> {
        let mut uploaded = Vec::with_capacity(urls.len());
        for url in urls {
            let bytes = match self.blog.fetch_image(url).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    warn!(url = %url, %error, "Skipping image that failed to download");
                    continue;
                }
            };
            let image = self.images.upload(url, bytes).await.context(ImageSnafu)?;
            uploaded.push(image);
        }
        Ok(uploaded)
    }
}

#[async_trait]
impl Stage for CrawlStage {
    type Message = CrawlMessage;

    fn queue(&self) -> &'static str {
        CRAWLING_QUEUE
    }

    async fn handle(&self, message: CrawlMessage, attempt: u32) -> Result<(), StageError> {
        info!(
            request_id = %message.request_id,
            case_id = message.case_id,
            url = %message.blog_url,
            attempt,
            "Crawling post"
        );

        let post = self.blog.fetch_post(&message.blog_url).await?;
        let uploaded = self.stage_images(&post.image_urls).await?;
        let contacts = extract_contacts(&format!("{}\n{}", post.title, post.text));

        info!(
            request_id = %message.request_id,
            images = uploaded.len(),
            contacts = contacts.len(),
            "Post crawled"
        );

        let next =
            OcrRequestMessage::from_crawl(&message, post.title, post.text, uploaded, contacts);
        publish_next(self.broker.as_ref(), OCR_REQUEST_QUEUE, &next).await
    }
}
