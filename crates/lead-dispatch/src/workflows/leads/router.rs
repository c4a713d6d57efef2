use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tracing::error;

use super::domain::{Actor, LeadId, NewLead};
use super::lifecycle::{LeadLifecycleController, LeadServiceError, UpdateLeadStatus};
use super::repository::RepositoryError;

const ACTOR_HEADER: &str = "x-actor";

/// Router exposing lead intake, qualification, dispatch and admin endpoints.
pub fn lead_router(controller: Arc<LeadLifecycleController>) -> Router {
    Router::new()
        .route("/api/v1/leads", post(intake_handler))
        .route(
            "/api/v1/leads/:lead_id",
            get(detail_handler)
                .put(update_handler)
                .delete(delete_handler),
        )
        .route("/api/v1/leads/:lead_id/qualify", post(qualify_handler))
        .route("/api/v1/leads/:lead_id/dispatch", post(dispatch_handler))
        .route("/api/v1/leads/:lead_id/retry", post(retry_handler))
        .with_state(controller)
}

pub(crate) async fn intake_handler(
    State(controller): State<Arc<LeadLifecycleController>>,
    axum::Json(submission): axum::Json<NewLead>,
) -> Response {
    match controller.intake(submission) {
        Ok(lead) => (StatusCode::CREATED, axum::Json(lead)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn qualify_handler(
    State(controller): State<Arc<LeadLifecycleController>>,
    Path(lead_id): Path<String>,
) -> Response {
    match controller.qualify(&LeadId(lead_id)) {
        Ok(qualified) => (StatusCode::OK, axum::Json(qualified)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn dispatch_handler(
    State(controller): State<Arc<LeadLifecycleController>>,
    Path(lead_id): Path<String>,
) -> Response {
    match controller.dispatch(&LeadId(lead_id)).await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn retry_handler(
    State(controller): State<Arc<LeadLifecycleController>>,
    Path(lead_id): Path<String>,
) -> Response {
    match controller.retry_failed(&LeadId(lead_id)).await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn update_handler(
    State(controller): State<Arc<LeadLifecycleController>>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
    axum::Json(update): axum::Json<UpdateLeadStatus>,
) -> Response {
    let actor = actor_from(&headers);
    match controller.update_status(&LeadId(lead_id), update, &actor) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn delete_handler(
    State(controller): State<Arc<LeadLifecycleController>>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let actor = actor_from(&headers);
    match controller.soft_delete(&LeadId(lead_id), &actor) {
        Ok(lead) => (StatusCode::OK, axum::Json(lead)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn detail_handler(
    State(controller): State<Arc<LeadLifecycleController>>,
    Path(lead_id): Path<String>,
) -> Response {
    match controller.get(&LeadId(lead_id)) {
        Ok(detail) => (StatusCode::OK, axum::Json(detail)).into_response(),
        Err(err) => error_response(err),
    }
}

fn actor_from(headers: &HeaderMap) -> Actor {
    let id = headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("admin");
    Actor::admin(id)
}

fn error_response(err: LeadServiceError) -> Response {
    match err {
        LeadServiceError::NotFound(lead_id) => {
            let payload = json!({
                "error": "lead not found",
                "lead_id": lead_id,
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        LeadServiceError::InvalidTransition {
            lead_id,
            current,
            requested,
        } => {
            let payload = json!({
                "error": "invalid status transition",
                "lead_id": lead_id,
                "current": current,
                "requested": requested,
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        LeadServiceError::NoEligibleCandidates { lead_id } => {
            let payload = json!({
                "error": "no eligible companies",
                "lead_id": lead_id,
                "needs_manual_triage": true,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        LeadServiceError::InvalidLead(reason) => {
            let payload = json!({ "error": reason });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        LeadServiceError::Conflict { lead_id } => {
            let payload = json!({
                "error": "lead was modified concurrently",
                "lead_id": lead_id,
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        LeadServiceError::Repository(RepositoryError::Conflict) => {
            let payload = json!({ "error": "lead already exists" });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        other => {
            error!(error = %other, "lead request failed");
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}
