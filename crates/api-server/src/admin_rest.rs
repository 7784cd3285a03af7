//! Platform administration endpoints. All of them demand a system
//! context with the tenant-management permission; tenant-bound staff
//! get a 403 regardless of role.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sacco_core::error::SaccoError;
use sacco_core::types::{
    slug_is_valid, Permission, Session, SubscriptionPlan, Tenant, TenantStatus,
};
use sacco_quota::{FeatureUsage, ResourceQuotaTracker};
use sacco_storage::Row;
use sacco_tenancy::{ContextView, RequestContext};

use crate::error::ApiError;
use crate::locale::Locale;
use crate::middleware::ClientIp;
use crate::rest::ApiState;

#[derive(Deserialize)]
pub struct CreateTenantRequest {
    pub slug: String,
    pub name: String,
    pub plan: SubscriptionPlan,
    pub contact_email: Option<String>,
}

#[derive(Deserialize)]
pub struct SetTenantStatusRequest {
    pub status: TenantStatus,
}

#[derive(Deserialize)]
pub struct SwitchContextRequest {
    pub tenant_id: Uuid,
}

#[derive(Serialize)]
pub struct UsageReport {
    pub tenant_id: Uuid,
    pub slug: String,
    pub plan: SubscriptionPlan,
    pub period_start: NaiveDate,
    pub features: Vec<FeatureUsage>,
}

#[derive(Serialize)]
pub struct PlatformOverview {
    pub tenants_total: i64,
    pub open_tenant_pools: usize,
    pub active_sessions: usize,
    pub audit_events: usize,
    pub audit_chain_valid: bool,
}

/// GET /v1/admin/tenants — every registered cooperative.
pub async fn list_tenants(
    State(state): State<ApiState>,
    Extension(context): Extension<Arc<RequestContext>>,
    Extension(locale): Extension<Locale>,
) -> Result<Json<Vec<Tenant>>, ApiError> {
    require_operator(&context, locale)?;
    let tenants = state
        .orchestrator
        .directory()
        .store()
        .list()
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;
    Ok(Json(tenants))
}

/// POST /v1/admin/tenants — register a cooperative.
pub async fn create_tenant(
    State(state): State<ApiState>,
    Extension(context): Extension<Arc<RequestContext>>,
    Extension(locale): Extension<Locale>,
    Json(request): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    require_operator(&context, locale)?;
    if !slug_is_valid(&request.slug) || request.name.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "validation_failed",
            locale,
        ));
    }

    let directory = state.orchestrator.directory();
    if directory
        .find_by_slug(&request.slug)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?
        .is_some()
    {
        return Err(ApiError::new(StatusCode::CONFLICT, "slug_taken", locale));
    }

    let mut tenant = Tenant::new(&request.slug, request.name.trim(), request.plan);
    tenant.contact_email = request.contact_email;
    directory
        .store()
        .insert(&tenant)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;
    metrics::counter!("tenants.created").increment(1);
    Ok((StatusCode::CREATED, Json(tenant)))
}

/// POST /v1/admin/tenants/{id}/status — activate or suspend a
/// cooperative. Suspension also drops its cached database pool, so
/// in-flight handles drain and new requests are refused at binding.
pub async fn set_tenant_status(
    State(state): State<ApiState>,
    Extension(context): Extension<Arc<RequestContext>>,
    Extension(locale): Extension<Locale>,
    Path(tenant_id): Path<Uuid>,
    Json(request): Json<SetTenantStatusRequest>,
) -> Result<Json<Tenant>, ApiError> {
    require_operator(&context, locale)?;
    let directory = state.orchestrator.directory();
    directory
        .store()
        .update_status(tenant_id, request.status)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;

    let tenant = directory
        .require_by_id(tenant_id)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;
    if tenant.status != TenantStatus::Active {
        state.orchestrator.router().invalidate(&tenant.slug);
    }
    Ok(Json(tenant))
}

/// GET /v1/admin/tenants/{id}/usage — current-period metered usage.
pub async fn tenant_usage(
    State(state): State<ApiState>,
    Extension(context): Extension<Arc<RequestContext>>,
    Extension(locale): Extension<Locale>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<UsageReport>, ApiError> {
    require_operator_with(&context, Permission::BillingManagement, locale)?;
    let tenant = state
        .orchestrator
        .directory()
        .require_by_id(tenant_id)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;
    let features = state
        .tracker
        .overview(&tenant)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;
    Ok(Json(UsageReport {
        tenant_id: tenant.id,
        slug: tenant.slug,
        plan: tenant.plan,
        period_start: ResourceQuotaTracker::current_period_start(Utc::now()),
        features,
    }))
}

/// POST /v1/admin/context/switch — rebind this request's system
/// context to a cooperative and return the switched view. The binding
/// lives for the rest of this request only.
pub async fn switch_context(
    State(state): State<ApiState>,
    Extension(context): Extension<Arc<RequestContext>>,
    Extension(session): Extension<Session>,
    Extension(locale): Extension<Locale>,
    Extension(client_ip): Extension<ClientIp>,
    Json(request): Json<SwitchContextRequest>,
) -> Result<Json<ContextView>, ApiError> {
    let mut switched = (*context).clone();
    state
        .orchestrator
        .switch_tenant(&mut switched, &session, request.tenant_id, client_ip.0)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;
    Ok(Json(switched.view()))
}

/// GET /v1/admin/overview — platform-wide counters, read through the
/// unguarded system connection.
pub async fn platform_overview(
    State(state): State<ApiState>,
    Extension(context): Extension<Arc<RequestContext>>,
    Extension(locale): Extension<Locale>,
) -> Result<Json<PlatformOverview>, ApiError> {
    require_operator(&context, locale)?;

    let system = state.orchestrator.router().system_connection();
    let row = system
        .fetch_optional("SELECT COUNT(*) AS n FROM tenants", vec![])
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;
    let tenants_total = match row {
        Some(row) => row
            .try_get("n")
            .map_err(|e| ApiError::from_sacco(SaccoError::Storage(e.to_string()), locale))?,
        None => 0,
    };

    let audit = state.orchestrator.audit();
    Ok(Json(PlatformOverview {
        tenants_total,
        open_tenant_pools: state.orchestrator.router().open_pools(),
        active_sessions: state.sessions.active_sessions(),
        audit_events: audit.len(),
        audit_chain_valid: audit.verify_chain().valid,
    }))
}

fn require_operator(context: &RequestContext, locale: Locale) -> Result<(), ApiError> {
    require_operator_with(context, Permission::TenantManagement, locale)
}

fn require_operator_with(
    context: &RequestContext,
    permission: Permission,
    locale: Locale,
) -> Result<(), ApiError> {
    if context.is_system() && context.has_permission(permission) {
        Ok(())
    } else {
        Err(ApiError::forbidden(locale))
    }
}
