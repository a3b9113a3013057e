//! Case records.
//!
//! Each case is a single JSON document at `cases/{case_id}.json`
//! holding every lead processed for it. Leads are keyed by request id,
//! so replaying a finalize message rewrites its lead instead of
//! appending a duplicate.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lantern_core::StorageProvider;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{
    CaseNotFoundSnafu, CaseStoreError, DecodeCaseSnafu, EncodeCaseSnafu, ReadCaseSnafu,
    WriteCaseSnafu,
};
use crate::message::{Contact, FinalizeMessage, UploadedImage};

use super::traits::CaseStore;

/// One processed lead attached to a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseLead {
    pub request_id: Uuid,
    pub blog_url: String,
    pub title: String,
    pub text: String,
    pub uploaded_images: Vec<UploadedImage>,
    pub contacts: Vec<Contact>,
    pub ocr_result: String,
    pub parsed_ocr_data: BTreeMap<String, String>,
    pub finalized_at: DateTime<Utc>,
}

impl CaseLead {
    fn from_message(message: &FinalizeMessage) -> Self {
        Self {
            request_id: message.request_id,
            blog_url: message.blog_url.clone(),
            title: message.title.clone(),
            text: message.text.clone(),
            uploaded_images: message.uploaded_images.clone(),
            contacts: message.contacts.clone(),
            ocr_result: message.ocr_result.clone(),
            parsed_ocr_data: message.parsed_ocr_data.clone(),
            finalized_at: Utc::now(),
        }
    }
}

/// Stored shape of a case and its leads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub case_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub leads: Vec<CaseLead>,
}

impl CaseRecord {
    fn new(case_id: i64) -> Self {
        let now = Utc::now();
        Self {
            case_id,
            created_at: now,
            updated_at: now,
            leads: Vec::new(),
        }
    }

    fn upsert_lead(&mut self, lead: CaseLead) {
        match self
            .leads
            .iter()
            .position(|existing| existing.request_id == lead.request_id)
        {
            Some(index) => self.leads[index] = lead,
            None => self.leads.push(lead),
        }
        self.updated_at = Utc::now();
    }
}

/// [`CaseStore`] backed by an object store.
pub struct ObjectCaseStore {
    storage: Arc<StorageProvider>,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl ObjectCaseStore {
    pub fn new(storage: Arc<StorageProvider>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    fn case_path(case_id: i64) -> String {
        format!("cases/{case_id}.json")
    }

    pub async fn load(&self, case_id: i64) -> Result<CaseRecord, CaseStoreError> {
        self.read_record(case_id).await
    }

    async fn read_record(&self, case_id: i64) -> Result<CaseRecord, CaseStoreError> {
        let path = Self::case_path(case_id);
        let bytes = match self.storage.get(path.as_str()).await {
            Ok(bytes) => bytes,
            Err(error) if error.is_not_found() => return CaseNotFoundSnafu { case_id }.fail(),
            Err(error) => return Err(error).context(ReadCaseSnafu { case_id }),
        };
        serde_json::from_slice(&bytes).context(DecodeCaseSnafu { case_id })
    }

    async fn write_record(&self, record: &CaseRecord) -> Result<(), CaseStoreError> {
        let path = Self::case_path(record.case_id);
        let json = serde_json::to_vec_pretty(record).context(EncodeCaseSnafu {
            case_id: record.case_id,
        })?;
        self.storage
            .put(path.as_str(), json.into())
            .await
            .context(WriteCaseSnafu {
                case_id: record.case_id,
            })
    }
}

#[async_trait]
impl CaseStore for ObjectCaseStore {
    async fn create_case(&self, case_id: i64) -> Result<(), CaseStoreError> {
        let _guard = self.write_lock.lock().await;
        match self.read_record(case_id).await {
            Ok(_) => Ok(()),
            Err(CaseStoreError::CaseNotFound { .. }) => {
                self.write_record(&CaseRecord::new(case_id)).await
            }
            Err(error) => Err(error),
        }
    }

    async fn finalize_case(&self, message: &FinalizeMessage) -> Result<(), CaseStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_record(message.case_id).await?;
        record.upsert_lead(CaseLead::from_message(message));
        self.write_record(&record).await?;
        info!(
            case_id = message.case_id,
            request_id = %message.request_id,
            leads = record.leads.len(),
            "Case record updated"
        );
        Ok(())
    }
}
