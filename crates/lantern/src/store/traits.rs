use async_trait::async_trait;
use bytes::Bytes;
use lantern_core::StorageError;

use crate::error::CaseStoreError;
use crate::message::{FinalizeMessage, UploadedImage};

/// Destination for downloaded post images.
#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// Store the image bytes and describe where they landed.
    async fn upload(&self, source_url: &str, bytes: Bytes) -> Result<UploadedImage, StorageError>;

    /// Public URL for a previously stored key.
    fn public_url(&self, key: &str) -> String;
}

/// Destination for completed leads.
#[async_trait]
pub trait CaseStore: Send + Sync + 'static {
    /// Create an empty record for a case unless one already exists.
    async fn create_case(&self, case_id: i64) -> Result<(), CaseStoreError>;

    /// Attach a processed lead to its case record.
    async fn finalize_case(&self, message: &FinalizeMessage) -> Result<(), CaseStoreError>;
}
