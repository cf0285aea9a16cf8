use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::ApiServer;
use crate::coordinator::{AuditReport, TaskDescriptor};
use crate::database::Round;
use crate::error::{CoordinatorError, Result};
use crate::health::{Component, HealthSnapshot};
use crate::metrics::MetricsSnapshot;
use crate::rounds::RoundParameters;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub round: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedState {
    Ready,
    Faulted,
}

#[derive(Debug, Deserialize)]
pub struct ComponentReport {
    pub state: ReportedState,
}

/// Round path segments must be non-negative integers.
fn parse_round(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| CoordinatorError::malformed("round", "must be a non-negative integer"))
}

/// GET /task/{round}
pub async fn task_handler(
    State(server): State<Arc<ApiServer>>,
    Path(round): Path<String>,
) -> Result<Json<TaskDescriptor>> {
    let round = parse_round(&round)?;
    Ok(Json(server.coordinator().task(round).await))
}

/// POST /submission/{round}
///
/// Duplicates and proof failures still answer `success`; the classification
/// is only visible through the audit.
pub async fn submission_handler(
    State(server): State<Arc<ApiServer>>,
    Path(round): Path<String>,
    body: Bytes,
) -> Result<Json<Value>> {
    let round = parse_round(&round)?;
    let body: Value = serde_json::from_slice(&body)
        .map_err(|_| CoordinatorError::malformed("body", "must be a JSON object"))?;

    let receipt = server.coordinator().submit(round, &body).await?;
    debug!("Submission stored as share {}", receipt.share_id);

    Ok(Json(json!({ "status": "success" })))
}

/// GET /audit
pub async fn audit_handler(
    State(server): State<Arc<ApiServer>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditReport>> {
    Ok(Json(server.coordinator().audit(query.round).await?))
}

/// GET /health and GET /healthz
pub async fn health_handler(State(server): State<Arc<ApiServer>>) -> Json<HealthSnapshot> {
    Json(server.coordinator().health_snapshot())
}

/// POST /health/{component}
pub async fn component_handler(
    State(server): State<Arc<ApiServer>>,
    Path(component): Path<String>,
    body: Bytes,
) -> Result<Json<HealthSnapshot>> {
    let component: Component = component.parse()?;
    let report: ComponentReport = serde_json::from_slice(&body).map_err(|e| {
        CoordinatorError::InvalidParameters(format!(
            "expected {{\"state\": \"ready\"|\"faulted\"}}: {}",
            e
        ))
    })?;

    let health = server.coordinator().health();
    match report.state {
        ReportedState::Ready => health.mark_ready(component)?,
        ReportedState::Faulted => health.mark_faulted(component)?,
    }
    Ok(Json(health.snapshot()))
}

/// POST /rounds/advance
pub async fn advance_handler(
    State(server): State<Arc<ApiServer>>,
    body: Bytes,
) -> Result<Json<Round>> {
    let params: RoundParameters = serde_json::from_slice(&body).map_err(|e| {
        CoordinatorError::InvalidParameters(format!(
            "expected {{\"target_difficulty\": number}}: {}",
            e
        ))
    })?;

    Ok(Json(server.coordinator().advance_round(params).await?))
}

/// GET /stats
pub async fn stats_handler(State(server): State<Arc<ApiServer>>) -> Json<MetricsSnapshot> {
    Json(server.coordinator().stats())
}

/// GET /metrics
pub async fn metrics_handler(State(server): State<Arc<ApiServer>>) -> Result<impl IntoResponse> {
    let text = server.coordinator().metrics().render()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    ))
}
