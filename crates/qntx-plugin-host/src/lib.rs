//! Plugin process supervision and gRPC bridge (§4.7): spawns plugin binaries, verifies their
//! declared host-version requirement, drives them through a health-polled lifecycle, and
//! optionally mounts their HTTP-bridged routes under `/api/{plugin}/*`.

pub mod client;
pub mod http_bridge;
pub mod proto;
pub mod supervisor;
pub mod version;

pub use client::PluginClient;
pub use qntx_core::config::PluginDescriptor;
pub use supervisor::PluginHost;

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{http_bridge, PluginClient, PluginDescriptor, PluginHost};
}
