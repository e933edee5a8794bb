//! Single-process pub/sub fan-out for store/job/watcher/plugin state changes (§4.10).

pub mod bus;

pub use bus::{Envelope, EventBus, QntxEvent};
