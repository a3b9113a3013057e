//! Worker wiring.
//!
//! Every long-lived component (stage consumers, the dead-letter
//! sweeper, the case seeder) runs as one [`Pipeline`] unit under a
//! shared runner, so shutdown and start jitter are handled in one
//! place.

use std::sync::Arc;
use std::time::Duration;

use lantern_core::{BrokerRef, Pipeline, PipelineContext};

use crate::config::Config;
use crate::consumer::{StageConsumer, StageRegistry};
use crate::dlq::{DlqReprocessor, DlqSweeper, FailureArchive};
use crate::error::PipelineError;
use crate::scheduler::CaseSeeder;
use crate::store::CaseStore;

/// One of the pipeline's runnable components.
pub enum Worker {
    Consumer(StageConsumer),
    Sweeper(DlqSweeper),
    Seeder(CaseSeeder),
}

impl Pipeline for Worker {
    type Key = String;
    type Error = PipelineError;

    fn key(&self) -> &String {
        match self {
            Worker::Consumer(consumer) => consumer.key(),
            Worker::Sweeper(sweeper) => sweeper.key(),
            Worker::Seeder(seeder) => seeder.key(),
        }
    }

    fn run(self) -> impl Future<Output = Result<(), PipelineError>> + Send {
        async move {
            match self {
                Worker::Consumer(consumer) => consumer.run().await.map_err(Into::into),
                Worker::Sweeper(sweeper) => sweeper.run().await.map_err(Into::into),
                Worker::Seeder(seeder) => seeder.run().await.map_err(Into::into),
            }
        }
    }
}

/// Build every worker the configuration calls for.
pub fn build_workers(
    config: &Config,
    broker: BrokerRef,
    registry: &StageRegistry,
    archive: Option<Arc<FailureArchive>>,
    cases: Arc<dyn CaseStore>,
    context: &PipelineContext,
) -> Vec<Worker> {
    let policy = config.consumer.retry.policy();
    let mut workers: Vec<Worker> = StageConsumer::pool(
        registry,
        &broker,
        &policy,
        config.consumer.concurrency,
        &context.shutdown,
    )
    .into_iter()
    .map(Worker::Consumer)
    .collect();

    let reprocessor = DlqReprocessor::new(
        broker.clone(),
        archive,
        &config.sweep,
        context.shutdown.clone(),
    );
    workers.push(Worker::Sweeper(DlqSweeper::new(
        reprocessor,
        Duration::from_secs(config.sweep.interval_secs),
        context.shutdown.clone(),
    )));

    if !config.scheduler.seeds.is_empty() {
        workers.push(Worker::Seeder(CaseSeeder::new(
            broker,
            cases,
            &config.scheduler,
            context.shutdown.clone(),
        )));
    }

    workers
}
