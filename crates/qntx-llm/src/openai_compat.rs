//! Shared request/response/stream-parsing for the two OpenAI-wire-compatible providers (local
//! inference and OpenRouter) — both speak the same `/chat/completions` shape, only the base URL
//! and auth header differ.

use crate::provider::{ChatRequest, ChatResponse, ChunkSink, StreamChunk, TokenUsage};
use futures::StreamExt;
use qntx_core::{Error, Result};
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "max_tokens")]
    pub max_tokens: Option<u32>,
}

#[derive(Serialize)]
pub struct Message {
    pub role: &'static str,
    pub content: String,
}

pub fn build_request(request: &ChatRequest, default_model: &str, stream: bool) -> CompletionRequest {
    let mut messages = Vec::new();
    if let Some(system) = &request.system_prompt {
        messages.push(Message { role: "system", content: system.clone() });
    }
    messages.push(Message { role: "user", content: request.user_prompt.clone() });

    CompletionRequest {
        model: request.model.clone().unwrap_or_else(|| default_model.to_string()),
        messages,
        stream,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

pub async fn chat(client: &Client, url: &str, api_key: Option<&str>, body: &CompletionRequest) -> Result<ChatResponse> {
    let mut builder = client.post(url).json(body);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }

    let response = builder.send().await.map_err(|e| Error::upstream(format!("request failed: {}", e)))?;
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(Error::upstream(format!("provider returned {}: {}", status, text)));
    }

    let parsed: CompletionResponse =
        response.json().await.map_err(|e| Error::upstream(format!("malformed response: {}", e)))?;

    let content = parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default();
    let usage = parsed
        .usage
        .map(|u| TokenUsage { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens, total_tokens: u.total_tokens })
        .unwrap_or_default();

    Ok(ChatResponse { content, model: parsed.model, usage })
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamEnvelope {
    choices: Vec<StreamChoice>,
}

pub async fn chat_streaming(
    builder: RequestBuilder,
    sink: ChunkSink,
    cancel: CancellationToken,
) -> Result<()> {
    let mut source = EventSource::new(builder).map_err(|e| Error::internal(format!("cannot open event source: {}", e)))?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                source.close();
                return Err(Error::Cancelled);
            }
            next = source.next() => {
                let Some(event) = next else { break };
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => {
                        if message.data == "[DONE]" {
                            source.close();
                            let _ = sink.send(StreamChunk::done()).await;
                            return Ok(());
                        }
                        let parsed: Result<StreamEnvelope> = serde_json::from_str::<Value>(&message.data)
                            .map_err(Error::from)
                            .and_then(|v| serde_json::from_value(v).map_err(Error::from));
                        match parsed {
                            Ok(envelope) => {
                                for choice in envelope.choices {
                                    if let Some(content) = choice.delta.content {
                                        if !content.is_empty() && sink.send(StreamChunk::content(content)).await.is_err() {
                                            source.close();
                                            return Ok(());
                                        }
                                    }
                                    if choice.finish_reason.is_some() {
                                        source.close();
                                        let _ = sink.send(StreamChunk::done()).await;
                                        return Ok(());
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "skipping malformed stream event"),
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

    let _ = sink.send(StreamChunk::done()).await;
    Ok(())
}
