//! `/api/chat`: blocking and SSE-streaming chat completion through the provider registry (§4.4, §6).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use qntx_llm::{ChatRequest as ProviderChatRequest, ProviderName, ProviderSelection};

use crate::state::AppState;

use super::error_response;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub provider: Option<String>,
}

fn selection(raw: Option<&str>) -> ProviderSelection {
    match raw {
        Some("local") => ProviderSelection::Explicit(ProviderName::Local),
        Some("anthropic") => ProviderSelection::Explicit(ProviderName::Anthropic),
        Some("openrouter") => ProviderSelection::Explicit(ProviderName::Openrouter),
        _ => ProviderSelection::Auto,
    }
}

fn to_provider_request(body: &ChatBody) -> ProviderChatRequest {
    ProviderChatRequest {
        system_prompt: body.system_prompt.clone(),
        user_prompt: body.user_prompt.clone(),
        model: body.model.clone(),
        temperature: body.temperature,
        max_tokens: body.max_tokens,
    }
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    let selection = selection(body.provider.as_deref());
    let request = to_provider_request(&body);
    match state.providers.chat(&selection, &request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Serialize)]
struct StreamEvent {
    content: String,
    done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let selection = selection(body.provider.as_deref());
    let request = to_provider_request(&body);
    let (tx, rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();

    tokio::spawn(async move {
        let sink = tx.clone();
        if let Err(err) = state.providers.chat_streaming(&selection, &request, sink, cancel).await {
            let _ = tx.send(qntx_llm::StreamChunk::error(err.to_string())).await;
        }
    });

    let stream = ReceiverStream::new(rx).map(|chunk| {
        let event = StreamEvent { content: chunk.content, done: chunk.done, error: chunk.error };
        Ok(Event::default().data(serde_json::to_string(&event).unwrap_or_default()))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}
