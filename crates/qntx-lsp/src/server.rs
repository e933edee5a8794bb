//! The server face: re-exposes the same capability surface over JSON-RPC so editors can attach
//! to this bridge directly (§4.9b).

use crate::document_cache::DocumentCache;
use crate::framing;
use crate::protocol::{self, method};
use async_trait::async_trait;
use futures::FutureExt;
use qntx_core::Result;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::error;

/// Capabilities the server face dispatches into. A `qntx-lsp` deployment typically implements
/// this by forwarding each call onto an [`crate::client::LspClient`] talking to the real
/// upstream language server, but tests can supply a stub.
#[async_trait]
pub trait LspBackend: Send + Sync {
    async fn initialize(&self, root_uri: Option<&str>) -> Result<Value>;
    async fn shutdown(&self) -> Result<()>;
    async fn goto_definition(&self, params: protocol::TextDocumentPositionParams) -> Result<Value>;
    async fn find_references(&self, params: protocol::ReferenceParams) -> Result<Value>;
    async fn hover(&self, params: protocol::TextDocumentPositionParams) -> Result<Value>;
    async fn symbols(&self, document: protocol::TextDocumentIdentifier) -> Result<Value>;
    async fn format(&self, document: protocol::TextDocumentIdentifier) -> Result<Value>;
    async fn rename(&self, params: protocol::RenameParams) -> Result<Value>;
    async fn code_actions(&self, params: protocol::CodeActionParams) -> Result<Value>;
}

pub struct LspServer<B: LspBackend> {
    backend: B,
    documents: DocumentCache,
}

impl<B: LspBackend> LspServer<B> {
    pub fn new(backend: B) -> Self {
        Self { backend, documents: DocumentCache::new() }
    }

    pub fn documents(&self) -> &DocumentCache {
        &self.documents
    }

    /// Runs the read-dispatch-write loop until the peer closes the stream.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf_reader = BufReader::new(reader);
        loop {
            let message = match framing::read_message(&mut buf_reader).await? {
                Some(m) => m,
                None => return Ok(()),
            };
            let id = message.get("id").cloned().unwrap_or(Value::Null);
            let Some(method_name) = message.get("method").and_then(Value::as_str) else {
                continue;
            };
            let params = message.get("params").cloned().unwrap_or(Value::Null);

            let response = self.dispatch_guarded(method_name, params).await;
            let envelope = match response {
                Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                Err(e) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": qntx_jsonrpc::error_codes::INTERNAL_ERROR, "message": e.to_string()},
                }),
            };
            framing::write_message(&mut writer, &envelope).await?;
        }
    }

    /// Dispatches one request behind a panic barrier: a panic inside a handler never reaches
    /// the transport loop, it is converted to a `Corrupt` logged error and an empty result
    /// (§4.9: "never propagating a panic into the transport").
    async fn dispatch_guarded(&self, method_name: &str, params: Value) -> Result<Value> {
        let fut = AssertUnwindSafe(self.dispatch(method_name, params)).catch_unwind();
        match fut.await {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(method = method_name, panic = %msg, "lsp handler panicked");
                Ok(Value::Null)
            }
        }
    }

    async fn dispatch(&self, method_name: &str, params: Value) -> Result<Value> {
        match method_name {
            method::INITIALIZE => {
                let root_uri = params.get("rootUri").and_then(Value::as_str);
                self.backend.initialize(root_uri).await
            }
            method::SHUTDOWN => {
                self.backend.shutdown().await?;
                Ok(Value::Null)
            }
            method::DEFINITION => {
                let p: protocol::TextDocumentPositionParams =
                    serde_json::from_value(params).map_err(qntx_core::Error::Serialization)?;
                self.backend.goto_definition(p).await
            }
            method::REFERENCES => {
                let p: protocol::ReferenceParams = serde_json::from_value(params).map_err(qntx_core::Error::Serialization)?;
                self.backend.find_references(p).await
            }
            method::HOVER => {
                let p: protocol::TextDocumentPositionParams =
                    serde_json::from_value(params).map_err(qntx_core::Error::Serialization)?;
                self.backend.hover(p).await
            }
            method::SYMBOLS => {
                let document: protocol::TextDocumentIdentifier = serde_json::from_value(
                    params.get("textDocument").cloned().unwrap_or(Value::Null),
                )
                .map_err(qntx_core::Error::Serialization)?;
                self.backend.symbols(document).await
            }
            method::FORMATTING => {
                let document: protocol::TextDocumentIdentifier = serde_json::from_value(
                    params.get("textDocument").cloned().unwrap_or(Value::Null),
                )
                .map_err(qntx_core::Error::Serialization)?;
                self.backend.format(document).await
            }
            method::RENAME => {
                let p: protocol::RenameParams = serde_json::from_value(params).map_err(qntx_core::Error::Serialization)?;
                self.backend.rename(p).await
            }
            method::CODE_ACTION => {
                let p: protocol::CodeActionParams = serde_json::from_value(params).map_err(qntx_core::Error::Serialization)?;
                self.backend.code_actions(p).await
            }
            method::APPLY_EDIT => {
                let p: protocol::ApplyWorkspaceEditParams =
                    serde_json::from_value(params).map_err(qntx_core::Error::Serialization)?;
                self.apply_workspace_edit(p).await
            }
            other => Err(qntx_core::Error::invalid_input(format!("unknown LSP method: {other}"))),
        }
    }

    /// Applies a `workspace/applyEdit` against the document cache, bottom-to-top per document
    /// (§4.9), and reports whether every targeted document was open.
    async fn apply_workspace_edit(&self, params: protocol::ApplyWorkspaceEditParams) -> Result<Value> {
        for (uri, edits) in &params.edit.changes {
            let Some(doc) = self.documents.get(uri).await else {
                let result = protocol::ApplyWorkspaceEditResult {
                    applied: false,
                    failure_reason: Some(format!("document not open: {uri}")),
                };
                return serde_json::to_value(result).map_err(qntx_core::Error::Serialization);
            };
            let new_text = protocol::apply_edits(&doc.text, edits);
            self.documents.update(uri, new_text, doc.version + 1).await;
        }
        let result = protocol::ApplyWorkspaceEditResult { applied: true, failure_reason: None };
        serde_json::to_value(result).map_err(qntx_core::Error::Serialization)
    }
}
