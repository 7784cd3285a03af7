use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use sacco_core::types::{Permission, Role, Tenant};
use sacco_storage::TenantConnection;

use crate::security::SecurityFlags;

/// The scope a request operates in.
#[derive(Debug, Clone)]
pub enum ContextMode {
    /// Platform operations against the system database only.
    System,
    /// Bound to a single cooperative.
    Tenant(TenantBinding),
}

/// Everything a tenant-scoped request needs: the tenant record and a
/// guarded connection into its data.
#[derive(Debug, Clone)]
pub struct TenantBinding {
    pub tenant: Tenant,
    pub connection: TenantConnection,
}

/// Per-request authority: who is acting, at what scope, with which
/// permissions and security posture. Built by the orchestrator, owned
/// by the request, dropped when the request ends. Never stored
/// globally and never shared across requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub role: Role,
    pub mode: ContextMode,
    pub permissions: BTreeSet<Permission>,
    pub security: SecurityFlags,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn is_system(&self) -> bool {
        matches!(self.mode, ContextMode::System)
    }

    pub fn binding(&self) -> Option<&TenantBinding> {
        match &self.mode {
            ContextMode::Tenant(binding) => Some(binding),
            ContextMode::System => None,
        }
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        self.binding().map(|b| &b.tenant)
    }

    /// The guarded connection for tenant-scoped work. System contexts
    /// have none; platform operations go through the router directly.
    pub fn connection(&self) -> Option<&TenantConnection> {
        self.binding().map(|b| &b.connection)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn is_secure(&self) -> bool {
        self.security.is_secure()
    }

    /// Read-only projection safe to hand to response serializers.
    pub fn view(&self) -> ContextView {
        let tenant = self.tenant();
        ContextView {
            user_id: self.user_id,
            role: self.role,
            scope: if self.is_system() { "system" } else { "tenant" },
            tenant_id: tenant.map(|t| t.id),
            tenant_slug: tenant.map(|t| t.slug.clone()),
            tenant_name: tenant.map(|t| t.name.clone()),
            permissions: self.permissions.iter().copied().collect(),
            security: self.security,
            secure: self.is_secure(),
            correlation_id: self.correlation_id,
            created_at: self.created_at,
        }
    }
}

/// Serializable snapshot of a context, as exposed by the API.
#[derive(Debug, Clone, Serialize)]
pub struct ContextView {
    pub user_id: Uuid,
    pub role: Role,
    pub scope: &'static str,
    pub tenant_id: Option<Uuid>,
    pub tenant_slug: Option<String>,
    pub tenant_name: Option<String>,
    pub permissions: Vec<Permission>,
    pub security: SecurityFlags,
    pub secure: bool,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sacco_core::config::SecurityConfig;
    use sacco_core::types::Session;

    fn system_context(role: Role) -> RequestContext {
        let now = Utc::now();
        let session = Session {
            user_id: Uuid::new_v4(),
            role,
            tenant_id: None,
            ip: None,
            login_attempts: 0,
            logged_in_at: now,
            expires_at: now + chrono::Duration::hours(8),
            password_rotation_required: false,
        };
        let security =
            SecurityFlags::evaluate(&SecurityConfig::default(), &session, None, None, now);
        RequestContext {
            user_id: session.user_id,
            role,
            mode: ContextMode::System,
            permissions: role.permission_set(),
            security,
            correlation_id: Uuid::new_v4(),
            created_at: now,
        }
    }

    #[test]
    fn system_context_has_no_tenant_surface() {
        let context = system_context(Role::SystemAdmin);
        assert!(context.is_system());
        assert!(context.tenant().is_none());
        assert!(context.connection().is_none());

        let view = context.view();
        assert_eq!(view.scope, "system");
        assert!(view.tenant_id.is_none());
        assert!(view.secure);
    }

    #[test]
    fn permissions_mirror_the_role() {
        let admin = system_context(Role::SystemAdmin);
        assert!(admin.has_permission(Permission::TenantManagement));

        let teller = system_context(Role::Teller);
        assert!(teller.has_permission(Permission::SavingsWrite));
        assert!(!teller.has_permission(Permission::TenantManagement));
    }
}
