//! The uniform provider interface (§4.4).

use async_trait::async_trait;
use qntx_core::Result;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Local,
    Anthropic,
    Openrouter,
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderName::Local => write!(f, "local"),
            ProviderName::Anthropic => write!(f, "anthropic"),
            ProviderName::Openrouter => write!(f, "openrouter"),
        }
    }
}

/// How the caller wants a provider selected for a request.
#[derive(Debug, Clone, Default)]
pub enum ProviderSelection {
    #[default]
    Auto,
    Explicit(ProviderName),
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    /// Only some providers honor a model override; others always use their configured default.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// One chunk of a streaming response. A `done: true` chunk or a populated `error` closes the
/// stream; the sink must not be written to after either.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
    pub error: Option<String>,
}

impl StreamChunk {
    pub fn content(content: impl Into<String>) -> Self {
        Self { content: content.into(), done: false, error: None }
    }

    pub fn done() -> Self {
        Self { content: String::new(), done: true, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { content: String::new(), done: true, error: Some(message.into()) }
    }
}

/// Sink the caller supplies for [`Provider::chat_streaming`]. Chunks are delivered in
/// server-arrival order.
pub type ChunkSink = tokio::sync::mpsc::Sender<StreamChunk>;

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// True if this provider is usable right now (has credentials / is reachable), used by
    /// [`crate::registry::ProviderRegistry`]'s auto-priority selection.
    fn is_enabled(&self) -> bool;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Streams the response into `sink`. Cancelling `cancel` must stop reading the upstream
    /// body and return [`qntx_core::Error::Cancelled`] without writing to `sink` again.
    async fn chat_streaming(&self, request: &ChatRequest, sink: ChunkSink, cancel: CancellationToken) -> Result<()>;
}
