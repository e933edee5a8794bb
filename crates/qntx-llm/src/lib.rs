//! Uniform LLM provider interface: `local`, `anthropic`, `openrouter`, with real per-chunk
//! streaming, cancellation, and usage accounting (§4.4).

pub mod anthropic;
pub mod local;
pub mod openai_compat;
pub mod openrouter;
pub mod provider;
pub mod registry;
pub mod usage;

pub use anthropic::AnthropicProvider;
pub use local::LocalProvider;
pub use openrouter::OpenrouterProvider;
pub use provider::{
    ChatRequest, ChatResponse, ChunkSink, Provider, ProviderName, ProviderSelection, StreamChunk, TokenUsage,
};
pub use registry::ProviderRegistry;
pub use usage::{UsageRecord, UsageRecorder};
