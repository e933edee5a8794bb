//! JSON-RPC-over-stdio client talking to an external language server process (§4.9a).

use crate::framing;
use qntx_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

type Pending = HashMap<i64, oneshot::Sender<Result<Value>>>;

/// A running language server process reached over `Content-Length`-framed JSON-RPC on its
/// stdin/stdout.
pub struct LspClient {
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    next_id: AtomicI64,
    pending: Arc<Mutex<Pending>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl LspClient {
    /// Spawns `command` with `args` and begins reading its responses in the background.
    pub async fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(Error::Io)?;

        let stdin = child.stdin.take().ok_or_else(|| Error::internal("language server stdin not piped"))?;
        let stdout = child.stdout.take().ok_or_else(|| Error::internal("language server stdout not piped"))?;

        let pending: Arc<Mutex<Pending>> = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                match framing::read_message(&mut reader).await {
                    Ok(Some(value)) => {
                        if let Some(id) = value.get("id").and_then(Value::as_i64) {
                            let waiter = reader_pending.lock().await.remove(&id);
                            if let Some(tx) = waiter {
                                let result = if let Some(err) = value.get("error") {
                                    Err(Error::upstream(err.to_string()))
                                } else {
                                    Ok(value.get("result").cloned().unwrap_or(Value::Null))
                                };
                                let _ = tx.send(result);
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("language server closed stdout");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "language server transport error");
                        break;
                    }
                }
            }
            // Fail every outstanding request rather than hanging callers forever.
            let mut guard = reader_pending.lock().await;
            for (_, tx) in guard.drain() {
                let _ = tx.send(Err(Error::upstream("language server connection closed")));
            }
        });

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            next_id: AtomicI64::new(1),
            pending,
            reader_task,
        })
    }

    /// Sends `method` with `params` and awaits the matching response by id.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = framing::write_message(&mut *stdin, &message).await {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
        }

        rx.await.map_err(|_| Error::internal("language server reader task dropped the response channel"))?
    }

    /// Sends a fire-and-forget notification (no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let message = json!({"jsonrpc": "2.0", "method": method, "params": params});
        let mut stdin = self.stdin.lock().await;
        framing::write_message(&mut *stdin, &message).await
    }

    pub async fn initialize(&self, root_uri: Option<&str>) -> Result<Value> {
        self.request(crate::protocol::method::INITIALIZE, json!({"rootUri": root_uri, "capabilities": {}}))
            .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(crate::protocol::method::SHUTDOWN, Value::Null).await?;
        self.notify("exit", Value::Null).await?;
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
        Ok(())
    }

    pub async fn goto_definition(&self, params: &crate::protocol::TextDocumentPositionParams) -> Result<Value> {
        self.request(crate::protocol::method::DEFINITION, serde_json::to_value(params).map_err(Error::Serialization)?)
            .await
    }

    pub async fn find_references(&self, params: &crate::protocol::ReferenceParams) -> Result<Value> {
        self.request(crate::protocol::method::REFERENCES, serde_json::to_value(params).map_err(Error::Serialization)?)
            .await
    }

    pub async fn hover(&self, params: &crate::protocol::TextDocumentPositionParams) -> Result<Value> {
        self.request(crate::protocol::method::HOVER, serde_json::to_value(params).map_err(Error::Serialization)?)
            .await
    }

    pub async fn symbols(&self, document: &crate::protocol::TextDocumentIdentifier) -> Result<Value> {
        self.request(
            crate::protocol::method::SYMBOLS,
            json!({"textDocument": document}),
        )
        .await
    }

    pub async fn format(&self, document: &crate::protocol::TextDocumentIdentifier) -> Result<Value> {
        self.request(
            crate::protocol::method::FORMATTING,
            json!({"textDocument": document, "options": {"tabSize": 4, "insertSpaces": true}}),
        )
        .await
    }

    pub async fn rename(&self, params: &crate::protocol::RenameParams) -> Result<Value> {
        self.request(crate::protocol::method::RENAME, serde_json::to_value(params).map_err(Error::Serialization)?)
            .await
    }

    pub async fn code_actions(&self, params: &crate::protocol::CodeActionParams) -> Result<Value> {
        self.request(crate::protocol::method::CODE_ACTION, serde_json::to_value(params).map_err(Error::Serialization)?)
            .await
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
