//! OpenRouter provider (§4.4) — OpenAI-wire-compatible, `Authorization: Bearer` auth.

use crate::openai_compat::{self, build_request};
use crate::provider::{ChatRequest, ChatResponse, ChunkSink, Provider, ProviderName};
use async_trait::async_trait;
use qntx_core::Result;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

const BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "openrouter/auto";

pub struct OpenrouterProvider {
    client: Client,
    api_key: String,
}

impl OpenrouterProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { client: Client::new(), api_key: api_key.into() }
    }
}

#[async_trait]
impl Provider for OpenrouterProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Openrouter
    }

    fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = build_request(request, DEFAULT_MODEL, false);
        let url = format!("{}/chat/completions", BASE_URL);
        openai_compat::chat(&self.client, &url, Some(&self.api_key), &body).await
    }

    async fn chat_streaming(&self, request: &ChatRequest, sink: ChunkSink, cancel: CancellationToken) -> Result<()> {
        let body = build_request(request, DEFAULT_MODEL, true);
        let url = format!("{}/chat/completions", BASE_URL);
        let builder = self.client.post(url).bearer_auth(&self.api_key).json(&body);
        openai_compat::chat_streaming(builder, sink, cancel).await
    }
}
