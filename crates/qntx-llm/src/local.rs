//! Local OpenAI-compatible inference endpoint (§4.4). No API key required.

use crate::openai_compat::{self, build_request};
use crate::provider::{ChatRequest, ChatResponse, ChunkSink, Provider, ProviderName};
use async_trait::async_trait;
use qntx_core::Result;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

const DEFAULT_MODEL: &str = "local-default";

pub struct LocalProvider {
    client: Client,
    base_url: String,
    enabled: bool,
}

impl LocalProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: Client::new(), base_url: base_url.into(), enabled: true }
    }

    pub fn disabled() -> Self {
        Self { client: Client::new(), base_url: String::new(), enabled: false }
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Local
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = build_request(request, DEFAULT_MODEL, false);
        let url = format!("{}/chat/completions", self.base_url);
        openai_compat::chat(&self.client, &url, None, &body).await
    }

    async fn chat_streaming(&self, request: &ChatRequest, sink: ChunkSink, cancel: CancellationToken) -> Result<()> {
        let body = build_request(request, DEFAULT_MODEL, true);
        let url = format!("{}/chat/completions", self.base_url);
        let builder = self.client.post(url).json(&body);
        openai_compat::chat_streaming(builder, sink, cancel).await
    }
}
