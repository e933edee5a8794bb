//! Anthropic Claude provider (§4.4).
//!
//! Endpoint: `https://api.anthropic.com/v1/messages`, header `x-api-key` +
//! `anthropic-version: 2023-06-01`. Streaming uses `"stream": true` and parses the
//! `content_block_delta`/`message_delta`/`message_stop` SSE events.

use crate::provider::{ChatRequest, ChatResponse, ChunkSink, Provider, ProviderName, StreamChunk, TokenUsage};
use async_trait::async_trait;
use futures::StreamExt;
use qntx_core::{Error, Result};
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseBlock>,
    model: String,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder().timeout(Duration::from_secs(120)).build().unwrap_or_default(),
            api_key: api_key.into(),
        }
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> AnthropicRequest {
        AnthropicRequest {
            model: request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            messages: vec![AnthropicMessage { role: "user", content: request.user_prompt.clone() }],
            max_tokens: request.max_tokens.unwrap_or(4096),
            system: request.system_prompt.clone(),
            temperature: request.temperature,
            stream,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Anthropic
    }

    fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_request = self.build_request(request, false);
        let response = self
            .client
            .post(format!("{}/messages", BASE_URL))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("anthropic request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(format!("anthropic returned {}: {}", status, body)));
        }

        let parsed: AnthropicResponse =
            response.json().await.map_err(|e| Error::upstream(format!("malformed anthropic response: {}", e)))?;

        let content = parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");
        let usage = parsed.usage.map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ChatResponse { content, model: parsed.model, usage: usage.unwrap_or_default() })
    }

    async fn chat_streaming(&self, request: &ChatRequest, sink: ChunkSink, cancel: CancellationToken) -> Result<()> {
        let api_request = self.build_request(request, true);
        let builder = self
            .client
            .post(format!("{}/messages", BASE_URL))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&api_request);

        let mut source =
            EventSource::new(builder).map_err(|e| Error::internal(format!("cannot open event source: {}", e)))?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    source.close();
                    return Err(Error::Cancelled);
                }
                next = source.next() => {
                    let Some(event) = next else {
                        break;
                    };
                    match event {
                        Ok(Event::Open) => {}
                        Ok(Event::Message(message)) => {
                            let parsed: Result<StreamEvent> = serde_json::from_str::<Value>(&message.data)
                                .map_err(Error::from)
                                .and_then(|v| serde_json::from_value(v).map_err(Error::from));
                            match parsed {
                                Ok(event) if event.kind == "content_block_delta" => {
                                    if let Some(text) = event.delta.and_then(|d| d.text) {
                                        if sink.send(StreamChunk::content(text)).await.is_err() {
                                            source.close();
                                            return Ok(());
                                        }
                                    }
                                }
                                Ok(event) if event.kind == "message_stop" => {
                                    source.close();
                                    let _ = sink.send(StreamChunk::done()).await;
                                    return Ok(());
                                }
                                Ok(_) => {}
                                Err(e) => warn!(error = %e, "skipping malformed anthropic stream event"),
                            }
                        }
                        Err(reqwest_eventsource::Error::StreamEnded) => {
                            let _ = sink.send(StreamChunk::done()).await;
                            return Ok(());
                        }
                        Err(e) => {
                            source.close();
                            let message = e.to_string();
                            let _ = sink.send(StreamChunk::error(message.clone())).await;
                            return Err(Error::upstream(message));
                        }
                    }
                }
            }
        }

        debug!("anthropic stream ended without an explicit message_stop");
        let _ = sink.send(StreamChunk::done()).await;
        Ok(())
    }
}
