//! Lantern CLI: staged ingestion of missing-person case leads.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use lantern::clients::{HttpBlogClient, HttpOcrClient, build_http_client};
use lantern::dlq::FailureArchive;
use lantern::store::{ObjectCaseStore, ObjectImageStore};
use lantern::topology::STAGE_QUEUES;
use lantern::{
    BrokerRef, CliArgs, Config, MemoryBroker, PipelineError, StorageProvider, build_registry,
    build_workers, declare_pipeline_topology, init_tracing, run_pipelines,
};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Failed to load config: {error}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        concurrency = config.consumer.concurrency,
        seeds = config.scheduler.seeds.len(),
        "Starting lantern pipeline"
    );
    for queue in STAGE_QUEUES {
        info!("  Stage queue: {queue}");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Pipeline failed: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), PipelineError> {
    let broker: BrokerRef = Arc::new(MemoryBroker::new());
    declare_pipeline_topology(broker.as_ref()).await?;

    let images_storage = Arc::new(
        StorageProvider::for_url_with_options(
            &config.storage.images_url,
            config.storage.storage_options.clone(),
        )
        .await?,
    );
    let cases_storage = Arc::new(
        StorageProvider::for_url_with_options(
            &config.storage.cases_url,
            config.storage.storage_options.clone(),
        )
        .await?,
    );

    let client = build_http_client(config.http.timeout())?;
    let blog = Arc::new(HttpBlogClient::new(client.clone()));
    let ocr = Arc::new(HttpOcrClient::new(client, config.ocr.endpoint.clone()));
    let images = Arc::new(ObjectImageStore::new(images_storage));
    let cases = Arc::new(ObjectCaseStore::new(cases_storage));

    let registry = build_registry(broker.clone(), blog, ocr, images, cases.clone());
    let archive = FailureArchive::from_config(&config.sweep).await?.map(Arc::new);

    let result = run_pipelines(
        &config.metrics,
        config.start_jitter_secs,
        "worker",
        |context| {
            build_workers(
                &config,
                broker,
                &registry,
                archive.clone(),
                cases,
                &context,
            )
        },
    )
    .await;

    if let Some(archive) = &archive {
        archive.finalize().await?;
    }

    result?;
    Ok(())
}
