//! Generic polling loop trait and runner.
//!
//! Provides the fixed-delay scheduling used by the dead-letter sweeper and
//! the case seeder: each iteration runs to completion, then the loop waits
//! the full interval before polling again.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Result of a single processing iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// Items were processed successfully.
    ProcessedItems,
    /// No items were available to process.
    NoItems,
    /// Shutdown was requested.
    Shutdown,
}

/// Trait for implementing a polling-based processor.
///
/// Cancellation only interrupts `prepare`: once `process` starts it runs to
/// completion, so implementations never lose a message they have already
/// pulled off a queue. Long-running `process` implementations should check
/// the shutdown token between items themselves.
#[async_trait]
pub trait PollingProcessor {
    /// The state type prepared for each iteration.
    type State: Send;
    /// The error type for this processor.
    type Error: std::error::Error + Send;

    /// Prepare state for a processing iteration.
    ///
    /// Returns `None` if there is no work to do.
    async fn prepare(&mut self) -> Result<Option<Self::State>, Self::Error>;

    /// Process the prepared state.
    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error>;
}

/// Run a polling loop with the given processor.
///
/// This function handles the common polling logic:
/// 1. Call `prepare()` to set up state
/// 2. Call `process()` if there's work to do
/// 3. Wait for poll_interval or shutdown signal
/// 4. Repeat until shutdown
pub async fn run_polling_loop<P: PollingProcessor>(
    processor: &mut P,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), P::Error> {
    loop {
        // Race preparation against the shutdown signal
        let state = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Shutdown requested during preparation");
                return Ok(());
            }

            result = processor.prepare() => result?,
        };

        let result = match state {
            Some(s) => processor.process(s).await?,
            None => IterationResult::NoItems,
        };

        // Exit on shutdown, otherwise wait and poll again
        match result {
            IterationResult::Shutdown => break,
            IterationResult::NoItems => {
                info!(
                    "No new items, waiting {}s before next poll",
                    poll_interval.as_secs()
                );
            }
            IterationResult::ProcessedItems => {
                info!(
                    "Iteration complete, waiting {}s before next poll",
                    poll_interval.as_secs()
                );
            }
        }

        // Wait for poll interval or shutdown
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested during poll wait");
                break;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    struct CountingProcessor {
        prepares: usize,
        processes: usize,
        stop_after: usize,
    }

    #[async_trait]
    impl PollingProcessor for CountingProcessor {
        type State = ();
        type Error = Infallible;

        async fn prepare(&mut self) -> Result<Option<()>, Infallible> {
            self.prepares += 1;
            Ok(Some(()))
        }

        async fn process(&mut self, _state: ()) -> Result<IterationResult, Infallible> {
            self.processes += 1;
            if self.processes >= self.stop_after {
                Ok(IterationResult::Shutdown)
            } else {
                Ok(IterationResult::ProcessedItems)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_until_shutdown_result() {
        let mut processor = CountingProcessor {
            prepares: 0,
            processes: 0,
            stop_after: 3,
        };

        run_polling_loop(
            &mut processor,
            Duration::from_secs(1800),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(processor.prepares, 3);
        assert_eq!(processor.processes, 3);
    }

    struct SelfCancelling {
        token: CancellationToken,
        prepares: usize,
    }

    #[async_trait]
    impl PollingProcessor for SelfCancelling {
        type State = ();
        type Error = Infallible;

        async fn prepare(&mut self) -> Result<Option<()>, Infallible> {
            self.prepares += 1;
            if self.prepares == 2 {
                self.token.cancel();
            }
            Ok(None)
        }

        async fn process(&mut self, _state: ()) -> Result<IterationResult, Infallible> {
            unreachable!("prepare never yields state")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_when_cancelled() {
        let token = CancellationToken::new();
        let mut processor = SelfCancelling {
            token: token.clone(),
            prepares: 0,
        };

        run_polling_loop(&mut processor, Duration::from_secs(1800), token)
            .await
            .unwrap();

        assert_eq!(processor.prepares, 2);
    }
}
