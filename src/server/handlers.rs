//! # HTTP Handlers

use super::state::AppState;
use crate::{
    error::MonitorError,
    report::{HealthReport, RunRecord, RunTrigger},
    scheduler::MonitorStatus,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json as JsonResponse},
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default number of runs returned by the status route.
const DEFAULT_RECENT_RUNS: usize = 10;

/// Liveness of the monitor process itself. Unauthenticated.
pub async fn health_check() -> impl IntoResponse {
    let health_status = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "provider-sentinel",
        "version": env!("CARGO_PKG_VERSION")
    });

    (StatusCode::OK, JsonResponse(health_status))
}

/// Body of a successful trigger.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run: RunRecord,
    /// Full report; absent when the run itself failed
    pub report: Option<HealthReport>,
}

async fn execute(state: &AppState, trigger: RunTrigger) -> Result<JsonResponse<RunResponse>, MonitorError> {
    let run = state.monitor().run(trigger).await?;
    let report = match run.summary {
        Some(_) => state
            .monitor()
            .last_report()
            .await
            .filter(|report| report.run_id == run.run_id),
        None => None,
    };
    Ok(JsonResponse(RunResponse { run, report }))
}

/// External cron entry point.
pub async fn cron_health_check(State(state): State<AppState>) -> Result<JsonResponse<RunResponse>, MonitorError> {
    info!("📡 Cron trigger received");
    execute(&state, RunTrigger::Scheduled).await
}

/// Manual trigger (`force_run_now`).
pub async fn force_run(State(state): State<AppState>) -> Result<JsonResponse<RunResponse>, MonitorError> {
    info!("👆 Manual run requested");
    execute(&state, RunTrigger::Manual).await
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub recent: Option<usize>,
}

/// Scheduler state, last report summary and recent runs.
pub async fn monitor_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> JsonResponse<MonitorStatus> {
    let recent = query
        .recent
        .unwrap_or(DEFAULT_RECENT_RUNS)
        .min(state.config().history_capacity);
    JsonResponse(state.monitor().status_snapshot(recent).await)
}
