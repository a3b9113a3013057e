//! Periodic seeding of crawl requests.
//!
//! Cases under active watch are listed in configuration; every round
//! the seeder publishes a fresh crawl request for each of them, with a
//! new request id, so the posts are re-checked for updates. A missing
//! case record is created before the first seed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lantern_core::metrics::events::CasesSeeded;
use lantern_core::{
    BrokerRef, DEFAULT_EXCHANGE, IterationResult, Message, Pipeline, PollingProcessor, emit,
    run_polling_loop,
};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{SchedulerConfig, SeedConfig};
use crate::error::{SchedulerError, SeedEncodeSnafu, SeedPublishSnafu};
use crate::message::CrawlMessage;
use crate::store::CaseStore;
use crate::topology::CRAWLING_QUEUE;

/// Publishes one crawl request per configured seed, one round per poll
/// interval.
pub struct SeedProcessor {
    broker: BrokerRef,
    cases: Arc<dyn CaseStore>,
    seeds: Vec<SeedConfig>,
    shutdown: CancellationToken,
}

impl SeedProcessor {
    pub fn new(
        broker: BrokerRef,
        cases: Arc<dyn CaseStore>,
        seeds: Vec<SeedConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            broker,
            cases,
            seeds,
            shutdown,
        }
    }

    async fn seed_one(&self, seed: &SeedConfig) -> Result<(), SchedulerError> {
        // A storage blip here must not stall the round; finalize fails
        // loudly later if the record is genuinely missing.
        if let Err(error) = self.cases.create_case(seed.case_id).await {
            warn!(case_id = seed.case_id, %error, "Could not ensure case record");
        }

        let message = CrawlMessage::new(seed.case_id, seed.blog_url.clone());
        let body = serde_json::to_vec(&message).context(SeedEncodeSnafu {
            case_id: seed.case_id,
        })?;
        self.broker
            .publish(DEFAULT_EXCHANGE, CRAWLING_QUEUE, Message::new(body))
            .await
            .context(SeedPublishSnafu {
                case_id: seed.case_id,
            })?;

        debug!(
            case_id = seed.case_id,
            request_id = %message.request_id,
            url = %seed.blog_url,
            "Seeded crawl request"
        );
        Ok(())
    }
}

#[async_trait]
impl PollingProcessor for SeedProcessor {
    type State = ();
    type Error = SchedulerError;

    async fn prepare(&mut self) -> Result<Option<()>, SchedulerError> {
        Ok((!self.seeds.is_empty()).then_some(()))
    }

    async fn process(&mut self, _state: ()) -> Result<IterationResult, SchedulerError> {
        let mut seeded = 0u64;
        for seed in &self.seeds {
            if self.shutdown.is_cancelled() {
                info!(seeded, "Shutdown requested mid-round");
                return Ok(IterationResult::Shutdown);
            }
            self.seed_one(seed).await?;
            seeded += 1;
        }

        emit!(CasesSeeded { count: seeded });
        info!(seeded, "Seed round complete");
        Ok(IterationResult::ProcessedItems)
    }
}

/// Pipeline wrapper running the seeder on a fixed-delay schedule.
pub struct CaseSeeder {
    key: String,
    processor: SeedProcessor,
    interval: Duration,
    shutdown: CancellationToken,
}

impl CaseSeeder {
    pub fn new(
        broker: BrokerRef,
        cases: Arc<dyn CaseStore>,
        config: &SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            key: "case-seeder".to_string(),
            processor: SeedProcessor::new(broker, cases, config.seeds.clone(), shutdown.clone()),
            interval: Duration::from_secs(config.interval_secs),
            shutdown,
        }
    }
}

impl Pipeline for CaseSeeder {
    type Key = String;
    type Error = SchedulerError;

    fn key(&self) -> &String {
        &self.key
    }

    fn run(self) -> impl Future<Output = Result<(), SchedulerError>> + Send {
        async move {
            let mut processor = self.processor;
            run_polling_loop(&mut processor, self.interval, self.shutdown).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lantern_core::{MemoryBroker, StorageProvider};

    use crate::error::CaseStoreError;
    use crate::message::FinalizeMessage;
    use crate::store::ObjectCaseStore;
    use crate::topology::declare_pipeline_topology;

    fn seed(case_id: i64) -> SeedConfig {
        SeedConfig {
            case_id,
            blog_url: format!("https://blog.example/case/{case_id}"),
        }
    }

    async fn memory_cases() -> Arc<ObjectCaseStore> {
        let storage = Arc::new(StorageProvider::for_url("memory:///").await.unwrap());
        Arc::new(ObjectCaseStore::new(storage))
    }

    async fn drain_crawl_queue(broker: &BrokerRef) -> Vec<CrawlMessage> {
        let mut messages = Vec::new();
        while let Some(delivery) = broker
            .receive(CRAWLING_QUEUE, Duration::from_millis(10))
            .await
            .unwrap()
        {
            messages.push(serde_json::from_slice(&delivery.message.body).unwrap());
            broker.ack(delivery).await.unwrap();
        }
        messages
    }

    #[tokio::test]
    async fn each_round_publishes_fresh_requests() {
        let broker: BrokerRef = Arc::new(MemoryBroker::new());
        declare_pipeline_topology(broker.as_ref()).await.unwrap();
        let cases = memory_cases().await;

        let mut processor = SeedProcessor::new(
            broker.clone(),
            cases.clone(),
            vec![seed(7), seed(8)],
            CancellationToken::new(),
        );

        let state = processor.prepare().await.unwrap().expect("seeds configured");
        let result = processor.process(state).await.unwrap();
        assert_eq!(result, IterationResult::ProcessedItems);

        let first_round = drain_crawl_queue(&broker).await;
        assert_eq!(first_round.len(), 2);
        assert_eq!(first_round[0].case_id, 7);
        assert_eq!(first_round[1].case_id, 8);
        assert_eq!(first_round[0].blog_url, "https://blog.example/case/7");

        cases.load(7).await.unwrap();
        cases.load(8).await.unwrap();

        let state = processor.prepare().await.unwrap().unwrap();
        processor.process(state).await.unwrap();
        let second_round = drain_crawl_queue(&broker).await;
        assert_ne!(
            first_round[0].request_id, second_round[0].request_id,
            "every round must use fresh request ids"
        );
    }

    #[tokio::test]
    async fn no_seeds_means_no_work() {
        let broker: BrokerRef = Arc::new(MemoryBroker::new());
        let cases = memory_cases().await;

        let mut processor =
            SeedProcessor::new(broker, cases, Vec::new(), CancellationToken::new());
        assert!(processor.prepare().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_round() {
        let broker: BrokerRef = Arc::new(MemoryBroker::new());
        declare_pipeline_topology(broker.as_ref()).await.unwrap();
        let cases = memory_cases().await;
        let shutdown = CancellationToken::new();

        let mut processor =
            SeedProcessor::new(broker.clone(), cases, vec![seed(7)], shutdown.clone());
        shutdown.cancel();

        let result = processor.process(()).await.unwrap();
        assert_eq!(result, IterationResult::Shutdown);
        assert!(drain_crawl_queue(&broker).await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_case_store_does_not_block_seeding() {
        struct BrokenCases;

        #[async_trait]
        impl CaseStore for BrokenCases {
            async fn create_case(&self, case_id: i64) -> Result<(), CaseStoreError> {
                Err(CaseStoreError::CaseNotFound { case_id })
            }

            async fn finalize_case(&self, _message: &FinalizeMessage) -> Result<(), CaseStoreError> {
                unreachable!("the seeder never finalizes")
            }
        }

        let broker: BrokerRef = Arc::new(MemoryBroker::new());
        declare_pipeline_topology(broker.as_ref()).await.unwrap();

        let mut processor = SeedProcessor::new(
            broker.clone(),
            Arc::new(BrokenCases),
            vec![seed(7)],
            CancellationToken::new(),
        );
        processor.process(()).await.unwrap();

        assert_eq!(drain_crawl_queue(&broker).await.len(), 1);
    }
}
