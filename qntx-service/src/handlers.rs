//! Concrete handlers registered into the production [`qntx_pulse::HandlerRegistry`] (§4.5/§4.6):
//! a plugin-invocation handler for async jobs, and the script-watcher dispatcher that hands a
//! matched attestation off to the Pulse handler registry instead of running inline.

use std::sync::Arc;

use async_trait::async_trait;
use qntx_core::{Attestation, Error, Job, Result, Watcher};
use qntx_plugin_host::proto::HttpRequest as PluginHttpRequest;
use qntx_plugin_host::PluginHost;
use qntx_pulse::watcher::ScriptDispatcher;
use qntx_pulse::{AsyncJobs, Handler};
use tokio_util::sync::CancellationToken;

/// `payload: {"plugin": string, "method": string, "path": string, "body": any}` — forwards to the
/// named plugin's HTTPBridge capability the same way `qntx_plugin_host::http_bridge` forwards a
/// live HTTP request, but from a Pulse job instead of an inbound request.
pub struct PluginInvokeHandler {
    plugin_host: Arc<PluginHost>,
}

impl PluginInvokeHandler {
    pub fn new(plugin_host: Arc<PluginHost>) -> Self {
        Self { plugin_host }
    }
}

#[async_trait]
impl Handler for PluginInvokeHandler {
    async fn execute(&self, job: &Job, _cancel: &CancellationToken) -> Result<()> {
        let plugin = job
            .payload
            .get("plugin")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::invalid_input("plugin_invoke job payload missing \"plugin\""))?;
        let method = job.payload.get("method").and_then(|v| v.as_str()).unwrap_or("POST").to_string();
        let path = job.payload.get("path").and_then(|v| v.as_str()).unwrap_or("/").to_string();
        let body = match job.payload.get("body") {
            Some(v) => serde_json::to_vec(v).map_err(|e| Error::invalid_input(format!("invalid job body: {e}")))?,
            None => Vec::new(),
        };

        let request = PluginHttpRequest { method, path, headers: Default::default(), body };
        let response = self.plugin_host.handle_http(plugin, request).await?;
        if response.status >= 400 {
            return Err(Error::upstream(format!("plugin {plugin} returned status {}", response.status)));
        }
        Ok(())
    }

    fn max_retries(&self) -> Option<u32> {
        Some(3)
    }
}

/// Hands a `script`-action watcher match off to the Pulse handler registry instead of running it
/// inline on the `WatcherEngine`'s dispatch path (§4.6: "`script` executes by handing control to a
/// script handler via the Pulse handler registry").
pub struct PulseScriptDispatcher {
    jobs: Arc<AsyncJobs>,
}

impl PulseScriptDispatcher {
    pub fn new(jobs: Arc<AsyncJobs>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl ScriptDispatcher for PulseScriptDispatcher {
    async fn dispatch(&self, watcher: &Watcher, attestation: &Attestation) -> Result<()> {
        let handler_name = watcher
            .action_data
            .get("handler_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::invalid_input("script watcher action_data missing \"handler_name\""))?;
        let mut payload = watcher.action_data.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("watcher_id".to_string(), serde_json::json!(watcher.id));
            obj.insert("attestation".to_string(), serde_json::to_value(attestation).unwrap_or_default());
        }
        self.jobs.submit("watcher", handler_name, payload).await?;
        Ok(())
    }
}
