//! QNTX service binary: bootstraps config/logging, wires the shared [`Services`] struct, mounts
//! the HTTP/WebSocket API, and runs the Pulse queue, scheduled-job ticker, and plugin supervisor
//! until a shutdown signal arrives (§2 bootstrapping, §9 "Singleton state").

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use qntx_auth::{AuthStore, PkceStore, TokenCodec};
use qntx_core::config::Settings;
use qntx_events::EventBus;
use qntx_llm::{AnthropicProvider, LocalProvider, OpenrouterProvider, ProviderRegistry, UsageRecorder};
use qntx_plugin_host::PluginHost;
use qntx_pulse::{AsyncJobs, HandlerRegistry, ScheduledJobs, WatcherEngine, WebhookHandler};
use qntx_store::{Store, SymbolIndex};

mod handlers;
mod http;
mod lsp_server;
mod state;

use handlers::{PluginInvokeHandler, PulseScriptDispatcher};
use state::Services;

const DEFAULT_JOB_CONCURRENCY: usize = 4;
/// Grace period handlers get to checkpoint after a shutdown signal before the process exits
/// regardless (§4.5 "Graceful shutdown").
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "qntx-service")]
#[command(about = "QNTX attestation substrate: store, Pulse scheduler, watchers, plugin host, HTTP API")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Bind address (host:port); overrides the settings file and `QNTX_BIND_ADDR`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the LSPBridge server face over stdio, forwarding to an upstream language server.
    LspServer {
        /// Upstream language server command.
        command: String,
        /// Arguments passed to the upstream language server.
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    qntx_core::config::load_environment();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qntx_service=info".parse()?)
                .add_directive("qntx_store=info".parse()?)
                .add_directive("qntx_pulse=info".parse()?)
                .add_directive("qntx_plugin_host=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if let Some(Commands::LspServer { command, args }) = args.command {
        return lsp_server::run(&command, &args).await;
    }

    info!("starting QNTX service");

    let settings = Settings::load()?;
    let bind_addr = args.bind.clone().unwrap_or_else(|| settings.bind_addr());

    // --- Store, SymbolIndex ---

    let db_url = format!("sqlite://{}?mode=rwc", settings.db_path());
    let store = Store::new(&db_url).await?;
    let symbol_index = SymbolIndex::new(store.pool());
    if let Err(e) = symbol_index.refresh().await {
        error!(error = %e, "initial symbol index refresh failed, continuing with an empty cache");
    }

    // --- ProviderRegistry ---

    let mut providers = ProviderRegistry::new();
    if let Some(base_url) = &settings.providers.local_base_url {
        providers.register(Box::new(LocalProvider::new(base_url.clone())));
    }
    if let Some(key) = &settings.providers.anthropic_api_key {
        providers.register(Box::new(AnthropicProvider::new(key.clone())));
    }
    if let Some(key) = &settings.providers.openrouter_api_key {
        providers.register(Box::new(OpenrouterProvider::new(key.clone())));
    }
    let providers = providers.with_usage_recorder(UsageRecorder::new(store.pool()));

    // --- PluginHost ---

    let plugin_host = Arc::new(PluginHost::new(env!("CARGO_PKG_VERSION"), settings.plugins.clone()));

    // --- Pulse: AsyncJobs, ScheduledJobs ---
    //
    // Handlers are registered before `AsyncJobs` is built: the registry is handed over by value
    // and there is no way to add to it afterwards.

    let mut handlers = HandlerRegistry::new();
    handlers.register("webhook", Arc::new(WebhookHandler::new()));
    handlers.register("plugin_invoke", Arc::new(PluginInvokeHandler::new(plugin_host.clone())));
    let jobs = Arc::new(AsyncJobs::new(store.pool(), handlers, DEFAULT_JOB_CONCURRENCY));
    let scheduled = ScheduledJobs::new(store.pool());

    // --- WatcherEngine ---
    //
    // `script` watcher actions hand off to the same handler registry above rather than running
    // inline on the dispatch path (§4.6).

    let watchers = WatcherEngine::new(store.pool())
        .with_script_dispatcher(Arc::new(PulseScriptDispatcher::new(jobs.clone())));

    // --- AuthCore ---

    let jwt_secret = qntx_core::config::get_config("QNTX_JWT_SECRET", "qntx-development-secret-change-me");
    let auth_store = AuthStore::new(store.pool());
    let token_codec = TokenCodec::new(jwt_secret.into_bytes());
    let pkce = PkceStore::new();

    let events = EventBus::new();

    let services = Arc::new(Services {
        settings,
        store,
        symbol_index,
        events,
        providers,
        jobs,
        scheduled,
        watchers,
        auth_store,
        token_codec,
        pkce,
        plugin_host: plugin_host.clone(),
    });

    // --- Background workers, leaves-first teardown on shutdown ---

    let cancel = CancellationToken::new();

    plugin_host.start_all().await;

    let symbol_index_task = tokio::spawn(background_symbol_index_refresh(services.clone(), cancel.clone()));

    let jobs_task = {
        let services = services.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = services.jobs.run(cancel).await {
                error!(error = %e, "async job queue exited with an error");
            }
        })
    };

    let scheduled_task = {
        let services = services.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = services.scheduled.run(&services.jobs, cancel).await {
                error!(error = %e, "scheduled job ticker exited with an error");
            }
        })
    };

    let plugin_health_task = {
        let plugin_host = plugin_host.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            plugin_host.run_health_loop(cancel).await;
        })
    };

    let router = http::build_router(services.clone());

    let server = qntx_http::HttpServer::builder()
        .bind(&bind_addr)
        .router(router)
        .build()?;

    info!(bind = %bind_addr, "QNTX service ready");

    tokio::select! {
        res = server.serve() => {
            if let Err(e) = res {
                error!(error = %e, "HTTP server exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Leaves-first teardown: stop accepting new watcher/job/plugin work, give in-flight work
    // a bounded grace period to checkpoint, then tear down the plugin processes last.
    cancel.cancel();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    plugin_host.shutdown_all().await;

    symbol_index_task.abort();
    jobs_task.abort();
    scheduled_task.abort();
    plugin_health_task.abort();

    info!("QNTX service stopped");
    Ok(())
}

/// Open Question decision (SPEC_FULL.md §9): refresh on demand plus every 60s in the
/// background; no EventBus subscription.
async fn background_symbol_index_refresh(services: Arc<Services>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                if let Err(e) = services.symbol_index.refresh().await {
                    error!(error = %e, "background symbol index refresh failed");
                }
            }
        }
    }
}
