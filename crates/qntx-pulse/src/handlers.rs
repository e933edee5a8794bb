//! Built-in [`Handler`] implementations the service registers by default (§4.5). Generalizes
//! the watcher's inline webhook POST (`watcher::dispatch_webhook`) into a reusable handler so the
//! same retry/backoff/checkpoint machinery the queue already gives every job also covers a
//! standalone "POST this JSON somewhere" job, instead of every caller hand-rolling its own retry
//! loop the way the watcher does for its own webhook action.

use crate::handler::Handler;
use async_trait::async_trait;
use qntx_core::{Error, Job, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// `payload: {"url": string, "body": any}` — POSTs `body` as JSON to `url`. Retries are left to
/// the queue's own exponential backoff rather than retried internally.
pub struct WebhookHandler {
    http: reqwest::Client,
}

impl Default for WebhookHandler {
    fn default() -> Self {
        Self { http: reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build().expect("http client") }
    }
}

impl WebhookHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Handler for WebhookHandler {
    async fn execute(&self, job: &Job, cancel: &CancellationToken) -> Result<()> {
        let url = job
            .payload
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::invalid_input("webhook job payload missing \"url\""))?;
        let body = job.payload.get("body").cloned().unwrap_or(serde_json::Value::Null);

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.http.post(url).json(&body).send() => {
                match result {
                    Ok(resp) if resp.status().is_success() => Ok(()),
                    Ok(resp) => Err(Error::upstream(format!("webhook {url} returned {}", resp.status()))),
                    Err(e) => Err(Error::upstream(format!("webhook {url} failed: {e}"))),
                }
            }
        }
    }

    fn max_retries(&self) -> Option<u32> {
        Some(3)
    }
}
