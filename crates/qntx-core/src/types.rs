//! The attestation substrate's data model (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical placeholder for an unspecified axis element.
pub const PLACEHOLDER: &str = "_";

/// A five-tuple claim: *subject IS predicate OF context BY actor AT timestamp*.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attestation {
    pub id: String,
    pub subjects: Vec<String>,
    pub predicates: Vec<String>,
    pub contexts: Vec<String>,
    pub actors: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, serde_json::Value>>,
}

impl Attestation {
    /// True if every axis is empty or placeholder-only — violates the §3 invariant that at
    /// least one element across all four axes is non-placeholder.
    pub fn is_unspecified(&self) -> bool {
        [&self.subjects, &self.predicates, &self.contexts, &self.actors]
            .into_iter()
            .all(|axis| axis.iter().all(|v| v == PLACEHOLDER))
    }
}

/// The query filter language over attestations (§4.1/§4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxFilter {
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub predicates: Vec<String>,
    #[serde(default)]
    pub contexts: Vec<String>,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over: Option<OverComparison>,
}

/// The "over" numeric filter: `{value: 5, unit: "y"}` means "more than 5 years".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverComparison {
    pub value: f64,
    pub unit: String,
}

/// Maximum rows `Store::query` will ever return (§4.1).
pub const MAX_ATTESTATION_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are sticky (§8 invariant): once reached, status never changes again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Progress {
    pub current: i64,
    pub total: i64,
}

/// An async job (Pulse, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub source: String,
    pub status: JobStatus,
    pub progress: Progress,
    #[serde(default)]
    pub cost_estimate: Option<f64>,
    #[serde(default)]
    pub cost_actual: Option<f64>,
    pub handler_name: String,
    pub payload: serde_json::Value,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_job_id: Option<String>,
    #[serde(default)]
    pub pulse_state: Option<serde_json::Value>,
}

/// A job's single upserted checkpoint (§3). Exists iff the job has completed at least one
/// stage but has not yet reached a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub job_id: String,
    pub stage: String,
    pub progress: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJobState {
    Active,
    Paused,
}

/// A periodic job definition (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub ats_code: String,
    pub interval_seconds: i64,
    pub next_run_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_execution_id: Option<String>,
    pub state: ScheduledJobState,
    pub handler_name: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// A per-run record of a [`ScheduledJob`] (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseExecution {
    pub id: String,
    pub scheduled_job_id: String,
    pub async_job_id: String,
    pub status: PulseExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    pub logs: String,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherActionType {
    Script,
    Webhook,
    Semantic,
}

/// A standing rule that fires an action when new attestations match its filter (§3/§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watcher {
    pub id: String,
    pub name: String,
    pub filter: AxFilter,
    pub action_type: WatcherActionType,
    pub action_data: serde_json::Value,
    pub max_fires_per_minute: i64,
    pub enabled: bool,
    #[serde(default)]
    pub fire_count: i64,
    #[serde(default)]
    pub error_count: i64,
    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub semantic_query: Option<String>,
    #[serde(default)]
    pub semantic_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BudgetScope {
    Daily,
    Monthly,
}

/// Per-(date, scope) spend and operation counts (§3). Monotonic within a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub date: chrono::NaiveDate,
    pub scope: BudgetScope,
    pub spend: f64,
    pub operation_count: i64,
}

/// A registered user, keyed by (provider, provider_id) (§3/§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub provider: String,
    pub provider_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A session keyed by an opaque id, carrying a hashed refresh token (§3/§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    #[serde(skip_serializing)]
    pub refresh_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

/// A WebAuthn credential bound to a user (§3/§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub user_id: String,
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    pub backup_state: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Starting,
    Ready,
    Paused,
    Stopped,
    Crashed,
}

/// Runtime bookkeeping for a spawned plugin process (§3/§4.7). Not persisted — rebuilt on host
/// startup from the plugin descriptor set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInstance {
    pub name: String,
    pub version: String,
    pub required_host_version: String,
    pub state: PluginState,
    pub config: serde_json::Value,
    pub port: u16,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_health_failures: u32,
    pub restart_count: u32,
}
