//! The handler registry `AsyncJobs` dispatches into (§4.5).

use async_trait::async_trait;
use qntx_core::{Job, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A stage/progress pair a handler persists so a paused or crashed job can resume without
/// redoing completed work.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub stage: String,
    pub progress: serde_json::Value,
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs the job to completion or returns an error to trigger the retry policy. Implementors
    /// should consult `job.pulse_state`/checkpoint to skip already-completed stages on resume,
    /// and must observe `cancel` between stages and return [`qntx_core::Error::Cancelled`]
    /// promptly once it fires (§5 "Handlers must be cancellation-aware").
    async fn execute(&self, job: &Job, cancel: &CancellationToken) -> Result<()>;

    /// Per-handler override of the retry ceiling; `None` uses the registry default.
    fn max_retries(&self) -> Option<u32> {
        None
    }

    /// Called after a non-terminal transition (retry, cooperative pause) to capture a
    /// resumable checkpoint. Handlers that do not need mid-job resumption can leave the
    /// default, in which case no checkpoint row is written.
    async fn checkpoint(&self, _job: &Job) -> Option<Checkpoint> {
        None
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }
}
