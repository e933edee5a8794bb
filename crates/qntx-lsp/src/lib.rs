//! LSPBridge: a generic language-server client/server wrapper (§4.9). The client face drives an
//! external language server over JSON-RPC-over-stdio; the server face re-exposes the same
//! capability surface so editors can attach to this process directly.

pub mod client;
pub mod document_cache;
pub mod framing;
pub mod protocol;
pub mod server;

pub use client::LspClient;
pub use document_cache::DocumentCache;
pub use server::{LspBackend, LspServer};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::client::LspClient;
    pub use super::document_cache::DocumentCache;
    pub use super::protocol::*;
    pub use super::server::{LspBackend, LspServer};
}
