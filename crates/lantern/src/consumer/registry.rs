//! Stage handler registration and dispatch.
//!
//! Each queue maps to exactly one handler. The mapping is built once at
//! startup, so dispatch inside a consumer is a plain method call with
//! no per-message lookup by type or annotation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

use crate::error::{MalformedBodySnafu, StageError};

/// A pipeline stage: typed message in, side effects out.
///
/// Handlers are invoked at-least-once and must be idempotent; the
/// dead-letter sweep can replay a message long after its first
/// delivery. Retry bookkeeping lives outside the handler, which only
/// sees the attempt number it is running as.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    type Message: DeserializeOwned + Send;

    /// Queue this stage consumes from.
    fn queue(&self) -> &'static str;

    /// Process one decoded message. `attempt` is 1-based.
    async fn handle(&self, message: Self::Message, attempt: u32) -> Result<(), StageError>;
}

/// Object-safe face of a [`Stage`]: decode raw bytes, then handle.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn process(&self, body: &Bytes, attempt: u32) -> Result<(), StageError>;
}

struct JsonStage<S>(S);

#[async_trait]
impl<S: Stage> MessageHandler for JsonStage<S> {
    async fn process(&self, body: &Bytes, attempt: u32) -> Result<(), StageError> {
        // A body that does not decode will never decode; the error is
        // terminal so the retry loop gives up on the first attempt.
        let message = serde_json::from_slice(body).context(MalformedBodySnafu)?;
        self.0.handle(message, attempt).await
    }
}

/// Startup-time mapping from queue name to message handler.
#[derive(Default)]
pub struct StageRegistry {
    handlers: HashMap<&'static str, Arc<dyn MessageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage under its queue.
    ///
    /// # Panics
    ///
    /// Panics if the queue already has a handler; two handlers for one
    /// queue is a wiring bug that must fail at startup.
    pub fn register<S: Stage>(&mut self, stage: S) {
        let queue = stage.queue();
        let replaced = self.handlers.insert(queue, Arc::new(JsonStage(stage)));
        assert!(
            replaced.is_none(),
            "duplicate handler registered for {queue}"
        );
    }

    /// Resolve the handler for a queue.
    pub fn handler(&self, queue: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(queue).cloned()
    }

    /// Queues with a registered handler, sorted for stable iteration.
    pub fn queues(&self) -> Vec<&'static str> {
        let mut queues: Vec<_> = self.handlers.keys().copied().collect();
        queues.sort_unstable();
        queues
    }
}
