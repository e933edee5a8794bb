//! Pulse: the async-job scheduler (queue, handler registry, checkpoints, scheduled jobs) and
//! the WatcherEngine that reacts to new attestations (§4.5/§4.6).

pub mod async_jobs;
pub mod handler;
pub mod handlers;
pub mod scheduled;
pub mod watcher;

pub use async_jobs::AsyncJobs;
pub use handler::{Checkpoint, Handler, HandlerRegistry};
pub use handlers::WebhookHandler;
pub use scheduled::ScheduledJobs;
pub use watcher::{matches_filter, ScriptDispatcher, SemanticMatcher, WatcherEngine};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::async_jobs::AsyncJobs;
    pub use super::handler::{Checkpoint, Handler, HandlerRegistry};
    pub use super::handlers::WebhookHandler;
    pub use super::scheduled::ScheduledJobs;
    pub use super::watcher::{matches_filter, ScriptDispatcher, SemanticMatcher, WatcherEngine};
}
