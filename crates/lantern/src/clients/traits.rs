//! Traits for the crawl and OCR stages' external collaborators.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BlogError, OcrError};

/// A fetched blog post, before any images are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostContent {
    pub title: String,
    pub text: String,
    /// Absolute image URLs in document order.
    pub image_urls: Vec<String>,
}

/// Client for fetching missing-person posts from blog hosts.
#[async_trait]
pub trait BlogClient: Send + Sync {
    /// Fetch and parse the post at `url`, following the content iframe
    /// when the host wraps posts in one.
    async fn fetch_post(&self, url: &str) -> Result<PostContent, BlogError>;

    /// Download one image referenced by a post.
    async fn fetch_image(&self, url: &str) -> Result<Bytes, BlogError>;
}

/// Client for the text recognition service.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Recognize text in the image a public URL points at.
    async fn recognize(&self, image_url: &str) -> Result<String, OcrError>;
}
