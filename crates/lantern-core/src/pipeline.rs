//! Pipeline orchestration primitives.
//!
//! This module provides shared abstractions for running multiple long-lived
//! workers (stage consumers, the dead-letter sweeper, the case seeder)
//! concurrently with graceful shutdown handling and jittered starts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use snafu::ResultExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::MetricsConfig;
use crate::error::{AddressParseSnafu, MetricsSnafu, PipelineSetupError};
use crate::signal::shutdown_signal;

/// Shared resources for pipeline execution.
#[derive(Clone)]
pub struct PipelineContext {
    /// Maximum jitter in seconds to add to worker start times.
    pub start_jitter_secs: u64,
    /// Cancellation token for graceful shutdown.
    pub shutdown: CancellationToken,
}

impl PipelineContext {
    pub fn new(start_jitter_secs: u64, shutdown: CancellationToken) -> Self {
        Self {
            start_jitter_secs,
            shutdown,
        }
    }
}

/// A self-contained pipeline unit that can be executed.
///
/// Implement this trait for your specific worker type. The runner will
/// handle spawning, jittered starts, and result collection.
pub trait Pipeline: Send + 'static {
    /// The key type used to identify this pipeline.
    type Key: Clone + Display + Send + 'static;

    /// The error type returned by this pipeline.
    type Error: std::error::Error + Send + 'static;

    /// Get a reference to the pipeline's key.
    fn key(&self) -> &Self::Key;

    /// Run this pipeline to completion.
    fn run(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Orchestrates multiple pipeline executions with shared shutdown handling.
pub struct PipelineRunner<P: Pipeline> {
    pipelines: Vec<P>,
    shutdown: CancellationToken,
    start_jitter_secs: u64,
    typetag: &'static str,
}

impl<P: Pipeline> PipelineRunner<P> {
    pub fn new(
        pipelines: Vec<P>,
        shutdown: CancellationToken,
        start_jitter_secs: u64,
        typetag: &'static str,
    ) -> Self {
        Self {
            pipelines,
            shutdown,
            start_jitter_secs,
            typetag,
        }
    }

    /// Spawn the shutdown signal handler.
    pub fn spawn_shutdown_handler(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    /// Run all pipelines to completion.
    #[allow(clippy::type_complexity)]
    pub async fn run(self) {
        let mut handles: JoinSet<(P::Key, Result<(), P::Error>)> = JoinSet::new();
        let typetag = self.typetag;

        for pipeline in self.pipelines {
            let shutdown = self.shutdown.clone();
            let key = pipeline.key().clone();
            let start_jitter = random_jitter(self.start_jitter_secs);

            handles.spawn(async move {
                // Stagger start times, but respect shutdown signal
                if !start_jitter.is_zero() {
                    info!(
                        target = %key,
                        jitter_secs = start_jitter.as_secs(),
                        "Delaying {} start for jitter", typetag
                    );
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(start_jitter))
                        .await
                        .is_none()
                    {
                        info!(target = %key, "Shutdown requested during jitter delay");
                        return (key, Ok(()));
                    }
                }

                let result = pipeline.run().await;
                (key, result)
            });
        }

        info!("Spawned {} {} tasks", handles.len(), typetag);

        // Wait for all pipelines to complete
        while let Some(result) = handles.join_next().await {
            match result {
                Ok((key, Ok(()))) => {
                    info!(target = %key, "{} completed", typetag);
                }
                Ok((key, Err(e))) => {
                    error!(target = %key, error = %e, "{} failed", typetag);
                }
                Err(e) => {
                    error!(error = %e, "{} task panicked", typetag);
                }
            }
        }

        info!("All {}s complete", typetag);
    }
}

/// Run pipelines with shared setup logic.
///
/// This helper handles common pipeline orchestration:
/// 1. Parse and initialize the metrics endpoint (unless disabled)
/// 2. Create shutdown token and pipeline context
/// 3. Create pipelines via the provided closure
/// 4. Run all pipelines with graceful shutdown handling
pub async fn run_pipelines<P, F>(
    metrics: &MetricsConfig,
    start_jitter_secs: u64,
    typetag: &'static str,
    create_pipelines: F,
) -> Result<(), PipelineSetupError>
where
    P: Pipeline,
    F: FnOnce(PipelineContext) -> Vec<P>,
{
    if metrics.enabled {
        let addr = metrics.address.parse().context(AddressParseSnafu {
            address: &metrics.address,
        })?;
        crate::metrics::init_global(addr).context(MetricsSnafu)?;
    }

    let shutdown = CancellationToken::new();
    let context = PipelineContext::new(start_jitter_secs, shutdown.clone());

    let pipelines = create_pipelines(context);

    let runner = PipelineRunner::new(pipelines, shutdown, start_jitter_secs, typetag);
    runner.spawn_shutdown_handler();
    runner.run().await;

    Ok(())
}

/// Generate a random jitter duration up to the specified maximum seconds.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}
