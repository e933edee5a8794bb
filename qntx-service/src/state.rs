//! `Services`: the one struct carrying every shared component (§9 "Singleton state"). Built once
//! at startup and handed to the router as axum shared state; tests construct a fresh instance
//! per case instead of relying on module-level statics.

use std::sync::Arc;

use qntx_auth::{AuthContext, AuthStore, PkceStore, TokenCodec};
use qntx_core::config::Settings;
use qntx_events::EventBus;
use qntx_llm::ProviderRegistry;
use qntx_plugin_host::PluginHost;
use qntx_pulse::{AsyncJobs, ScheduledJobs, WatcherEngine};
use qntx_store::{Store, SymbolIndex};

pub struct Services {
    pub settings: Settings,
    pub store: Store,
    pub symbol_index: SymbolIndex,
    pub events: EventBus,
    pub providers: ProviderRegistry,
    pub jobs: Arc<AsyncJobs>,
    pub scheduled: ScheduledJobs,
    pub watchers: WatcherEngine,
    pub auth_store: AuthStore,
    pub token_codec: TokenCodec,
    pub pkce: PkceStore,
    pub plugin_host: Arc<PluginHost>,
}

impl AuthContext for Services {
    fn token_codec(&self) -> &TokenCodec {
        &self.token_codec
    }

    fn auth_store(&self) -> &AuthStore {
        &self.auth_store
    }
}

pub type AppState = Arc<Services>;
