//! Member registry endpoints, scoped to the bound cooperative. Every
//! statement below goes through the guarded connection; the tenant
//! predicate is injected before it reaches the database.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sacco_core::error::SaccoError;
use sacco_core::types::{FeatureKey, Permission, Tenant};
use sacco_storage::{Row, SqliteRow, TenantConnection};
use sacco_tenancy::RequestContext;

use crate::error::ApiError;
use crate::locale::Locale;
use crate::rest::ApiState;

#[derive(Debug, Serialize)]
pub struct MemberSummary {
    pub id: Uuid,
    pub member_no: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub status: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct RegisterMemberRequest {
    pub full_name: String,
    pub member_no: Option<String>,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct ListMembersParams {
    pub status: Option<String>,
}

/// GET /v1/members — the bound cooperative's member roll, optionally
/// filtered by status.
pub async fn list_members(
    Extension(context): Extension<Arc<RequestContext>>,
    Extension(locale): Extension<Locale>,
    Query(params): Query<ListMembersParams>,
) -> Result<Json<Vec<MemberSummary>>, ApiError> {
    let (connection, _) = tenant_surface(&context, locale)?;
    require_permission(&context, Permission::MemberRead, locale)?;

    let status = params.status.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let (sql, params) = match status {
        Some(status) => (
            "SELECT id, member_no, full_name, phone, status, joined_at \
             FROM members WHERE status = ? ORDER BY joined_at DESC LIMIT 200",
            vec![status.into()],
        ),
        None => (
            "SELECT id, member_no, full_name, phone, status, joined_at \
             FROM members ORDER BY joined_at DESC LIMIT 200",
            vec![],
        ),
    };
    let rows = connection
        .fetch_all(sql, params)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;

    let members = rows
        .iter()
        .map(member_from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::from_sacco(e, locale))?;
    Ok(Json(members))
}

/// GET /v1/members/{id} — one member of the bound cooperative.
pub async fn get_member(
    Extension(context): Extension<Arc<RequestContext>>,
    Extension(locale): Extension<Locale>,
    Path(member_id): Path<Uuid>,
) -> Result<Json<MemberSummary>, ApiError> {
    let (connection, _) = tenant_surface(&context, locale)?;
    require_permission(&context, Permission::MemberRead, locale)?;

    let row = connection
        .fetch_optional(
            "SELECT id, member_no, full_name, phone, status, joined_at \
             FROM members WHERE id = ?",
            vec![member_id.into()],
        )
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;

    match row {
        Some(row) => Ok(Json(
            member_from_row(&row).map_err(|e| ApiError::from_sacco(e, locale))?,
        )),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "member_not_found",
            locale,
        )),
    }
}

/// POST /v1/members — register a member. Counts against the
/// cooperative's monthly member quota; usage is committed only after
/// the row is written.
pub async fn register_member(
    State(state): State<ApiState>,
    Extension(context): Extension<Arc<RequestContext>>,
    Extension(locale): Extension<Locale>,
    Json(request): Json<RegisterMemberRequest>,
) -> Result<(StatusCode, Json<MemberSummary>), ApiError> {
    let (connection, tenant) = tenant_surface(&context, locale)?;
    require_permission(&context, Permission::MemberWrite, locale)?;
    if request.full_name.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "validation_failed",
            locale,
        ));
    }

    let permit = state
        .tracker
        .permit(tenant, FeatureKey::Members)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;

    let member = MemberSummary {
        id: Uuid::new_v4(),
        member_no: request
            .member_no
            .unwrap_or_else(|| format!("M-{}", &Uuid::new_v4().simple().to_string()[..8])),
        full_name: request.full_name.trim().to_string(),
        phone: request.phone,
        status: "active".to_string(),
        joined_at: Utc::now(),
    };

    connection
        .execute(
            "INSERT INTO members (id, tenant_id, member_no, full_name, phone, status, joined_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            vec![
                member.id.into(),
                tenant.id.into(),
                member.member_no.clone().into(),
                member.full_name.clone().into(),
                member.phone.clone().into(),
                member.status.clone().into(),
                member.joined_at.into(),
            ],
        )
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;

    permit
        .commit(1)
        .await
        .map_err(|e| ApiError::from_sacco(e, locale))?;
    metrics::counter!("members.registered").increment(1);

    Ok((StatusCode::CREATED, Json(member)))
}

fn tenant_surface<'a>(
    context: &'a RequestContext,
    locale: Locale,
) -> Result<(&'a TenantConnection, &'a Tenant), ApiError> {
    match context.binding() {
        Some(binding) => Ok((&binding.connection, &binding.tenant)),
        None => Err(ApiError::from_sacco(
            SaccoError::TenantNotFound(
                "the member registry requires a cooperative subdomain".to_string(),
            ),
            locale,
        )),
    }
}

pub(crate) fn require_permission(
    context: &RequestContext,
    permission: Permission,
    locale: Locale,
) -> Result<(), ApiError> {
    if context.has_permission(permission) {
        Ok(())
    } else {
        Err(ApiError::forbidden(locale))
    }
}

fn member_from_row(row: &SqliteRow) -> Result<MemberSummary, SaccoError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| SaccoError::Storage(e.to_string()))?;
    Ok(MemberSummary {
        id: Uuid::parse_str(&id).map_err(|e| SaccoError::Storage(e.to_string()))?,
        member_no: row
            .try_get("member_no")
            .map_err(|e| SaccoError::Storage(e.to_string()))?,
        full_name: row
            .try_get("full_name")
            .map_err(|e| SaccoError::Storage(e.to_string()))?,
        phone: row
            .try_get("phone")
            .map_err(|e| SaccoError::Storage(e.to_string()))?,
        status: row
            .try_get("status")
            .map_err(|e| SaccoError::Storage(e.to_string()))?,
        joined_at: row
            .try_get("joined_at")
            .map_err(|e| SaccoError::Storage(e.to_string()))?,
    })
}
