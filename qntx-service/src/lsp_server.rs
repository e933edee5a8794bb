//! `lsp-server` subcommand: runs the LSPBridge server face over stdio, forwarding every call onto
//! an upstream language server spawned as a child process (§4.9).

use async_trait::async_trait;
use qntx_core::Result;
use qntx_lsp::protocol::{
    CodeActionParams, ReferenceParams, RenameParams, TextDocumentIdentifier, TextDocumentPositionParams,
};
use qntx_lsp::{LspBackend, LspClient, LspServer};
use serde_json::Value;

struct ForwardingBackend {
    client: LspClient,
}

#[async_trait]
impl LspBackend for ForwardingBackend {
    async fn initialize(&self, root_uri: Option<&str>) -> Result<Value> {
        self.client.initialize(root_uri).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.client.shutdown().await
    }

    async fn goto_definition(&self, params: TextDocumentPositionParams) -> Result<Value> {
        self.client.goto_definition(&params).await
    }

    async fn find_references(&self, params: ReferenceParams) -> Result<Value> {
        self.client.find_references(&params).await
    }

    async fn hover(&self, params: TextDocumentPositionParams) -> Result<Value> {
        self.client.hover(&params).await
    }

    async fn symbols(&self, document: TextDocumentIdentifier) -> Result<Value> {
        self.client.symbols(&document).await
    }

    async fn format(&self, document: TextDocumentIdentifier) -> Result<Value> {
        self.client.format(&document).await
    }

    async fn rename(&self, params: RenameParams) -> Result<Value> {
        self.client.rename(&params).await
    }

    async fn code_actions(&self, params: CodeActionParams) -> Result<Value> {
        self.client.code_actions(&params).await
    }
}

/// Spawns `command args...` as the upstream language server and serves the bridge over this
/// process's own stdio until the peer closes the stream.
pub async fn run(command: &str, args: &[String]) -> anyhow::Result<()> {
    let client = LspClient::spawn(command, args).await?;
    let server = LspServer::new(ForwardingBackend { client });

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    server.serve(stdin, stdout).await?;
    Ok(())
}
