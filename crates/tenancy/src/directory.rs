use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use sacco_core::error::{SaccoError, SaccoResult};
use sacco_core::types::{Tenant, TenantStatus};
use sacco_storage::TenantStore;

/// Lookup layer over the tenant store. Absence is a distinct outcome
/// here; it never degrades into a system scope.
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self { store }
    }

    /// The underlying store, for administrative surfaces that manage
    /// tenants directly.
    pub fn store(&self) -> Arc<dyn TenantStore> {
        Arc::clone(&self.store)
    }

    pub async fn find_by_slug(&self, slug: &str) -> SaccoResult<Option<Tenant>> {
        if slug.is_empty() {
            return Ok(None);
        }
        self.store.find_by_slug(slug).await
    }

    pub async fn require_by_slug(&self, slug: &str) -> SaccoResult<Tenant> {
        self.find_by_slug(slug)
            .await?
            .ok_or_else(|| SaccoError::TenantNotFound(slug.to_string()))
    }

    pub async fn require_by_id(&self, id: Uuid) -> SaccoResult<Tenant> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| SaccoError::TenantNotFound(id.to_string()))
    }

    /// A tenant must be active with an open subscription window before
    /// any context binds to it.
    pub fn validate_for_binding(&self, tenant: &Tenant, now: DateTime<Utc>) -> SaccoResult<()> {
        if tenant.status != TenantStatus::Active {
            return Err(SaccoError::TenantInactive {
                slug: tenant.slug.clone(),
                status: tenant.status.to_string(),
            });
        }
        if let Some(ended_at) = tenant.subscription_ends_at {
            if ended_at < now {
                return Err(SaccoError::SubscriptionExpired {
                    slug: tenant.slug.clone(),
                    ended_at,
                });
            }
        }
        Ok(())
    }
}
