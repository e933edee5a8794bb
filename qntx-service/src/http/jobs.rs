//! `/api/jobs`: submit, list, inspect, and cancel async jobs (§3 Pulse, §6).

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use qntx_core::JobStatus;

use crate::state::AppState;

use super::error_response;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/jobs", post(submit).get(list))
        .route("/api/jobs/:id", get(detail).delete(cancel))
        .route("/api/jobs/:id/pause", post(pause))
        .route("/api/jobs/:id/resume", post(resume))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub source: String,
    pub handler_name: String,
    pub payload: serde_json::Value,
}

#[derive(Serialize)]
struct SubmitResponse {
    id: String,
}

async fn submit(State(state): State<AppState>, Json(body): Json<SubmitRequest>) -> Response {
    match state.jobs.submit(&body.source, &body.handler_name, body.payload).await {
        Ok(id) => (axum::http::StatusCode::CREATED, Json(SubmitResponse { id })).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

fn parse_status(raw: &str) -> Option<JobStatus> {
    match raw {
        "pending" => Some(JobStatus::Pending),
        "running" => Some(JobStatus::Running),
        "paused" => Some(JobStatus::Paused),
        "completed" => Some(JobStatus::Completed),
        "failed" => Some(JobStatus::Failed),
        "cancelled" => Some(JobStatus::Cancelled),
        _ => None,
    }
}

async fn list(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let status = params.status.as_deref().and_then(parse_status);
    let limit = params.limit.unwrap_or(50);
    match state.jobs.list(status, limit).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(err) => error_response(err),
    }
}

async fn detail(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let job = match state.jobs.get(&id).await {
        Ok(job) => job,
        Err(err) => return error_response(err),
    };
    let checkpoint = match state.jobs.get_checkpoint(&id).await {
        Ok(checkpoint) => checkpoint,
        Err(err) => return error_response(err),
    };
    let task_logs = match state.jobs.list_task_logs(&id).await {
        Ok(logs) => logs,
        Err(err) => return error_response(err),
    };

    #[derive(Serialize)]
    struct Response {
        job: qntx_core::Job,
        checkpoint: Option<qntx_core::JobCheckpoint>,
        task_logs: Vec<qntx_pulse::async_jobs::TaskLogEntry>,
    }

    Json(Response { job, checkpoint, task_logs }).into_response()
}

async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.jobs.cancel(&id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.jobs.pause(&id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.jobs.resume_job(&id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}
