//! `ProviderRegistry`: provider selection and the usage-accounting wrapper around each call
//! (§4.4).

use crate::provider::{ChatRequest, ChatResponse, ChunkSink, Provider, ProviderName, ProviderSelection};
use crate::usage::{UsageRecord, UsageRecorder};
use chrono::Utc;
use qntx_core::{Error, Result};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct ProviderRegistry {
    providers: HashMap<ProviderName, Box<dyn Provider>>,
    usage: Option<UsageRecorder>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { providers: HashMap::new(), usage: None }
    }

    pub fn with_usage_recorder(mut self, recorder: UsageRecorder) -> Self {
        self.usage = Some(recorder);
        self
    }

    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.insert(provider.name(), provider);
    }

    /// Registered providers with `is_enabled() == true`, in auto-selection priority order.
    pub fn available(&self) -> Vec<ProviderName> {
        [ProviderName::Local, ProviderName::Anthropic, ProviderName::Openrouter]
            .into_iter()
            .filter(|name| self.providers.get(name).is_some_and(|p| p.is_enabled()))
            .collect()
    }

    /// Auto-priority: local-if-enabled → anthropic-if-keyed → openrouter.
    fn select(&self, selection: &ProviderSelection) -> Result<&dyn Provider> {
        match selection {
            ProviderSelection::Explicit(name) => self
                .providers
                .get(name)
                .map(|p| p.as_ref())
                .ok_or_else(|| Error::not_found(format!("provider {} not registered", name))),
            ProviderSelection::Auto => {
                for name in [ProviderName::Local, ProviderName::Anthropic, ProviderName::Openrouter] {
                    if let Some(provider) = self.providers.get(&name) {
                        if provider.is_enabled() {
                            return Ok(provider.as_ref());
                        }
                    }
                }
                Err(Error::upstream("no provider is enabled"))
            }
        }
    }

    pub async fn chat(&self, selection: &ProviderSelection, request: &ChatRequest) -> Result<ChatResponse> {
        let provider = self.select(selection)?;
        info!(provider = %provider.name(), "dispatching chat request");
        let request_timestamp = Utc::now();
        let result = provider.chat(request).await;
        self.record(provider.name(), &request_timestamp, &result, "chat").await;
        result
    }

    pub async fn chat_streaming(
        &self,
        selection: &ProviderSelection,
        request: &ChatRequest,
        sink: ChunkSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        let provider = self.select(selection)?;
        info!(provider = %provider.name(), "dispatching streaming chat request");
        let request_timestamp = Utc::now();
        let result = provider.chat_streaming(request, sink, cancel).await;
        self.record_outcome(provider.name(), &request_timestamp, result.is_ok(), "chat_stream", None, None, None)
            .await;
        result
    }

    async fn record(
        &self,
        provider: ProviderName,
        request_timestamp: &chrono::DateTime<Utc>,
        result: &Result<ChatResponse>,
        operation: &str,
    ) {
        let (model, prompt_tokens, completion_tokens, success) = match result {
            Ok(response) => (Some(response.model.clone()), Some(response.usage.prompt_tokens), Some(response.usage.completion_tokens), true),
            Err(_) => (None, None, None, false),
        };
        self.record_outcome(provider, request_timestamp, success, operation, model, prompt_tokens, completion_tokens)
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_outcome(
        &self,
        provider: ProviderName,
        request_timestamp: &chrono::DateTime<Utc>,
        success: bool,
        operation: &str,
        model: Option<String>,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    ) {
        let Some(usage) = &self.usage else { return };
        let record = UsageRecord {
            provider: provider.to_string(),
            model: model.unwrap_or_default(),
            operation: operation.to_string(),
            entity_tag: None,
            request_timestamp: *request_timestamp,
            response_timestamp: Some(Utc::now()),
            prompt_tokens,
            completion_tokens,
            cost: None,
            success,
        };
        if let Err(e) = usage.record(record).await {
            tracing::warn!(error = %e, "failed to record usage");
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
