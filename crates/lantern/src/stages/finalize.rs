//! Finalize stage: attach the completed lead to its case.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::consumer::Stage;
use crate::error::StageError;
use crate::message::FinalizeMessage;
use crate::store::CaseStore;
use crate::topology::FINALIZE_QUEUE;

pub struct FinalizeStage {
    cases: Arc<dyn CaseStore>,
}

impl FinalizeStage {
    pub fn new(cases: Arc<dyn CaseStore>) -> Self {
        Self { cases }
    }
}

#[async_trait]
impl Stage for FinalizeStage {
    type Message = FinalizeMessage;

    fn queue(&self) -> &'static str {
        FINALIZE_QUEUE
    }

    async fn handle(&self, message: FinalizeMessage, attempt: u32) -> Result<(), StageError> {
        info!(
            request_id = %message.request_id,
            case_id = message.case_id,
            contacts = message.contacts.len(),
            fields = message.parsed_ocr_data.len(),
            attempt,
            "Finalizing lead"
        );

        self.cases.finalize_case(&message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use crate::error::CaseStoreError;
    use crate::message::{CrawlMessage, OcrRequestMessage};

    #[derive(Default)]
    struct RecordingCases {
        finalized: Mutex<Vec<i64>>,
        missing: bool,
    }

    #[async_trait]
    impl CaseStore for RecordingCases {
        async fn create_case(&self, _case_id: i64) -> Result<(), CaseStoreError> {
            Ok(())
        }

        async fn finalize_case(&self, message: &FinalizeMessage) -> Result<(), CaseStoreError> {
            if self.missing {
                return Err(CaseStoreError::CaseNotFound {
                    case_id: message.case_id,
                });
            }
            self.finalized.lock().unwrap().push(message.case_id);
            Ok(())
        }
    }

    fn finalize_message(case_id: i64) -> FinalizeMessage {
        let crawl = CrawlMessage::new(case_id, "https://blog.example/post/1");
        let ocr = OcrRequestMessage::from_crawl(
            &crawl,
            "Missing: Jane Doe".to_string(),
            "Sighting report".to_string(),
            Vec::new(),
            Vec::new(),
        );
        FinalizeMessage::from_ocr(ocr, String::new(), BTreeMap::new())
    }

    #[tokio::test]
    async fn finalize_hands_the_lead_to_the_case_store() {
        let cases = Arc::new(RecordingCases::default());
        let stage = FinalizeStage::new(cases.clone());

        stage.handle(finalize_message(7), 1).await.unwrap();

        assert_eq!(cases.finalized.lock().unwrap().as_slice(), [7]);
    }

    #[tokio::test]
    async fn missing_case_is_terminal() {
        let cases = Arc::new(RecordingCases {
            missing: true,
            ..RecordingCases::default()
        });
        let stage = FinalizeStage::new(cases);

        let error = stage.handle(finalize_message(404), 1).await.unwrap_err();
        assert!(error.is_terminal(), "a lead for an unknown case never succeeds");
    }
}
