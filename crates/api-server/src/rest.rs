//! Authentication, context, and operational REST endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sacco_core::types::Role;
use sacco_quota::ResourceQuotaTracker;
use sacco_tenancy::{ContextOrchestrator, ContextView, RequestContext};

use crate::error::ApiError;
use crate::locale::Locale;
use crate::middleware::client_ip_from_headers;
use crate::sessions::SessionManager;

/// Shared application state for all REST handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ContextOrchestrator>,
    pub tracker: Arc<ResourceQuotaTracker>,
    pub sessions: Arc<SessionManager>,
    pub instance_id: String,
    pub start_time: Instant,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: Uuid,
    pub role: Role,
    pub tenant_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

/// POST /v1/auth/login — exchange credentials for a bearer token.
pub async fn handle_login(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let locale = locale_from_headers(&headers);
    let ip = client_ip_from_headers(&headers);
    match state.sessions.login(&request.username, &request.password, ip) {
        Some((token, session)) => Ok(Json(LoginResponse {
            token,
            user_id: session.user_id,
            role: session.role,
            tenant_id: session.tenant_id,
            expires_at: session.expires_at,
        })),
        None => Err(ApiError::unauthorized("invalid_credentials", locale)),
    }
}

/// POST /v1/auth/logout — revoke the presented bearer token.
pub async fn handle_logout(State(state): State<ApiState>, headers: HeaderMap) -> StatusCode {
    if let Some(token) = bearer_token(&headers) {
        state.sessions.revoke(token);
    }
    StatusCode::NO_CONTENT
}

/// GET /v1/context — the bound context, as the classic "who am I and
/// where am I" endpoint.
pub async fn handle_context(
    Extension(context): Extension<Arc<RequestContext>>,
) -> Json<ContextView> {
    Json(context.view())
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub instance_id: String,
    pub uptime_secs: u64,
}

/// GET /health — health check endpoint.
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        instance_id: state.instance_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — readiness probe for Kubernetes.
pub async fn readiness(State(state): State<ApiState>) -> StatusCode {
    if state.orchestrator.audit().verify_chain().valid {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live — liveness probe for Kubernetes.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

pub(crate) fn locale_from_headers(headers: &HeaderMap) -> Locale {
    Locale::from_accept_language(
        headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok()),
    )
}
