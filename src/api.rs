//! HTTP endpoints for the web application.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::delivery::is_valid_job_id;
use crate::error::{PipelineError, StoreError};
use crate::moderation::ModerationPipeline;
use crate::store::templates::UserProfile;

const DEFAULT_AUDIT_LIMIT: usize = 20;
const MAX_AUDIT_LIMIT: usize = 200;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ModerationPipeline>,
}

#[derive(Debug, Deserialize)]
pub struct ModerateBody {
    pub user: UserProfile,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

/// Build the axum router with the moderation routes.
pub fn moderation_routes(pipeline: Arc<ModerationPipeline>) -> Router {
    let state = AppState { pipeline };

    Router::new()
        .route("/health", get(health))
        .route("/api/moderation/{template_id}", post(moderate))
        .route("/api/moderation/jobs/{job_id}", get(job_status))
        .route("/api/moderation/audit/{template_id}", get(audit_records))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "civic-moderation"
    }))
}

// ── Moderation ──────────────────────────────────────────────────────────

async fn moderate(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    Json(body): Json<ModerateBody>,
) -> impl IntoResponse {
    // Dropping this future (client gone) cancels the attempt.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state
        .pipeline
        .moderate_template(&template_id, &body.user, &cancel)
        .await
    {
        Ok(result) => {
            info!(
                template_id = %template_id,
                approved = result.approved,
                submitted = result.submission.submitted,
                "Moderation request complete"
            );
            (StatusCode::OK, Json(serde_json::json!(result)))
        }
        Err(PipelineError::TemplateFetch(StoreError::TemplateNotFound { id })) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Template {id} not found")})),
        ),
        Err(PipelineError::InvalidRequest(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": reason})),
        ),
        Err(e) => {
            warn!(template_id = %template_id, error = %e, "Template fetch failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

async fn job_status(State(state): State<AppState>, Path(job_id): Path<String>) -> impl IntoResponse {
    if !is_valid_job_id(&job_id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid job id"})),
        );
    }

    match state.pipeline.refresh_job(&job_id).await {
        Ok(status) => (StatusCode::OK, Json(serde_json::json!(status))),
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "Job re-poll failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

async fn audit_records(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let Some(audit) = state.pipeline.audit_log() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Audit log disabled"})),
        );
    };

    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, MAX_AUDIT_LIMIT);
    match audit.recent_for_template(&template_id, limit).await {
        Ok(records) => (StatusCode::OK, Json(serde_json::json!(records))),
        Err(e) => {
            warn!(template_id = %template_id, error = %e, "Audit read failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}
