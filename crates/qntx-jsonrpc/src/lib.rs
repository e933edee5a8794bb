//! JSON-RPC 2.0 envelope types and standard error codes, shared by `qntx-lsp`'s client and
//! server faces (§4.9).

pub mod protocol;

pub use protocol::{error_codes, parse_request, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{error_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
}
