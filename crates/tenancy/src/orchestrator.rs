use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sacco_core::config::SecurityConfig;
use sacco_core::error::{SaccoError, SaccoResult};
use sacco_core::types::{Permission, Role, Session, Tenant};
use sacco_storage::ConnectionRouter;

use crate::audit::{ContextAction, ContextAuditTrail};
use crate::context::{ContextMode, RequestContext, TenantBinding};
use crate::directory::TenantDirectory;
use crate::resolver::{HostResolution, TenantResolver};
use crate::security::{validate_session, SecurityFlags};

/// Drives the request-context lifecycle: resolve the host, validate
/// the tenant and session, acquire a guarded connection, and hand out
/// a bound context. Every transition lands in the audit trail under
/// the request's correlation id.
pub struct ContextOrchestrator {
    resolver: TenantResolver,
    directory: TenantDirectory,
    router: Arc<ConnectionRouter>,
    audit: Arc<ContextAuditTrail>,
    security: SecurityConfig,
}

impl ContextOrchestrator {
    pub fn new(
        resolver: TenantResolver,
        directory: TenantDirectory,
        router: Arc<ConnectionRouter>,
        audit: Arc<ContextAuditTrail>,
        security: SecurityConfig,
    ) -> Self {
        Self {
            resolver,
            directory,
            router,
            audit,
            security,
        }
    }

    pub fn audit(&self) -> Arc<ContextAuditTrail> {
        Arc::clone(&self.audit)
    }

    pub fn directory(&self) -> &TenantDirectory {
        &self.directory
    }

    pub fn router(&self) -> Arc<ConnectionRouter> {
        Arc::clone(&self.router)
    }

    /// Resolve `host` and bind a context for `session`. Rejection is
    /// always an error; callers never receive a half-bound context.
    pub async fn bind(
        &self,
        host: &str,
        session: &Session,
        request_ip: Option<IpAddr>,
    ) -> SaccoResult<RequestContext> {
        let correlation_id = Uuid::new_v4();
        let now = Utc::now();
        self.audit.record(
            ContextAction::Resolving,
            session.user_id,
            None,
            correlation_id,
            format!("host '{host}'"),
            None,
        );

        if let Err(err) = validate_session(session, now) {
            self.reject(session.user_id, None, correlation_id, &err);
            return Err(err);
        }

        match self.resolver.resolve(host) {
            HostResolution::Tenant(slug) => {
                let tenant = match self.directory.require_by_slug(&slug).await {
                    Ok(tenant) => tenant,
                    Err(err) => {
                        self.reject(session.user_id, None, correlation_id, &err);
                        return Err(err);
                    }
                };
                self.bind_tenant(tenant, session, request_ip, correlation_id)
                    .await
            }
            HostResolution::System => match session.tenant_id {
                // Staff reaching the apex host stay inside their own
                // cooperative; only unaffiliated operators get the
                // system scope.
                Some(tenant_id) if session.role != Role::SystemAdmin => {
                    let tenant = match self.directory.require_by_id(tenant_id).await {
                        Ok(tenant) => tenant,
                        Err(err) => {
                            self.reject(session.user_id, Some(tenant_id), correlation_id, &err);
                            return Err(err);
                        }
                    };
                    self.bind_tenant(tenant, session, request_ip, correlation_id)
                        .await
                }
                _ => Ok(self.bind_system(session, request_ip, correlation_id)),
            },
            HostResolution::Unresolved => {
                let err =
                    SaccoError::TenantNotFound(format!("host '{host}' does not name a tenant"));
                self.reject(session.user_id, None, correlation_id, &err);
                Err(err)
            }
        }
    }

    async fn bind_tenant(
        &self,
        tenant: Tenant,
        session: &Session,
        request_ip: Option<IpAddr>,
        correlation_id: Uuid,
    ) -> SaccoResult<RequestContext> {
        let now = Utc::now();
        if let Err(err) = self.directory.validate_for_binding(&tenant, now) {
            self.reject(session.user_id, Some(tenant.id), correlation_id, &err);
            return Err(err);
        }

        // A session tied to cooperative A never binds cooperative B.
        // Platform operators are the one exception.
        if let Some(affiliation) = session.tenant_id {
            if affiliation != tenant.id && session.role != Role::SystemAdmin {
                let err = SaccoError::SessionInvalid(
                    "session belongs to a different cooperative".to_string(),
                );
                self.reject(session.user_id, Some(tenant.id), correlation_id, &err);
                return Err(err);
            }
        }

        let connection = match self.router.connection_for(&tenant).await {
            Ok(connection) => connection,
            Err(err) => {
                self.reject(session.user_id, Some(tenant.id), correlation_id, &err);
                return Err(err);
            }
        };

        let security =
            SecurityFlags::evaluate(&self.security, session, request_ip, Some(&tenant), now);
        metrics::counter!("context.bound").increment(1);
        info!(
            tenant_id = %tenant.id,
            slug = %tenant.slug,
            user_id = %session.user_id,
            correlation_id = %correlation_id,
            secure = security.is_secure(),
            "Bound tenant context"
        );
        self.audit.record(
            ContextAction::BoundTenant,
            session.user_id,
            Some(tenant.id),
            correlation_id,
            tenant.slug.clone(),
            Some(security),
        );

        Ok(RequestContext {
            user_id: session.user_id,
            role: session.role,
            permissions: session.role.permission_set(),
            security,
            correlation_id,
            created_at: now,
            mode: ContextMode::Tenant(TenantBinding { tenant, connection }),
        })
    }

    fn bind_system(
        &self,
        session: &Session,
        request_ip: Option<IpAddr>,
        correlation_id: Uuid,
    ) -> RequestContext {
        let now = Utc::now();
        let security = SecurityFlags::evaluate(&self.security, session, request_ip, None, now);
        metrics::counter!("context.bound").increment(1);
        info!(
            user_id = %session.user_id,
            correlation_id = %correlation_id,
            "Bound system context"
        );
        self.audit.record(
            ContextAction::BoundSystem,
            session.user_id,
            None,
            correlation_id,
            "apex host",
            Some(security),
        );
        RequestContext {
            user_id: session.user_id,
            role: session.role,
            permissions: session.role.permission_set(),
            security,
            correlation_id,
            created_at: now,
            mode: ContextMode::System,
        }
    }

    /// Rebind a system context to a cooperative. The caller's context
    /// is mutated only after every fallible step has succeeded; on any
    /// error it is left exactly as it was.
    pub async fn switch_tenant(
        &self,
        context: &mut RequestContext,
        session: &Session,
        target: Uuid,
        request_ip: Option<IpAddr>,
    ) -> SaccoResult<()> {
        if !context.is_system() || !context.has_permission(Permission::TenantManagement) {
            let err = SaccoError::UnauthorizedContextSwitch(
                "switching requires a privileged system context".to_string(),
            );
            self.deny_switch(context, Some(target), &err);
            return Err(err);
        }

        let now = Utc::now();
        let tenant = match self.directory.require_by_id(target).await {
            Ok(tenant) => tenant,
            Err(err) => {
                self.deny_switch(context, Some(target), &err);
                return Err(err);
            }
        };
        if let Err(err) = self.directory.validate_for_binding(&tenant, now) {
            self.deny_switch(context, Some(target), &err);
            return Err(err);
        }
        let connection = match self.router.connection_for(&tenant).await {
            Ok(connection) => connection,
            Err(err) => {
                self.deny_switch(context, Some(target), &err);
                return Err(err);
            }
        };

        let security =
            SecurityFlags::evaluate(&self.security, session, request_ip, Some(&tenant), now);
        metrics::counter!("context.switches").increment(1);
        info!(
            tenant_id = %tenant.id,
            slug = %tenant.slug,
            user_id = %context.user_id,
            correlation_id = %context.correlation_id,
            "Switched context into tenant"
        );
        self.audit.record(
            ContextAction::Switched,
            context.user_id,
            Some(tenant.id),
            context.correlation_id,
            tenant.slug.clone(),
            Some(security),
        );

        context.security = security;
        context.mode = ContextMode::Tenant(TenantBinding { tenant, connection });
        Ok(())
    }

    /// Tear a context down at the end of its request. The binding and
    /// all captured flags drop with it.
    pub fn clear(&self, context: RequestContext) {
        let tenant_id = context.tenant().map(|t| t.id);
        debug!(
            user_id = %context.user_id,
            correlation_id = %context.correlation_id,
            "Cleared request context"
        );
        self.audit.record(
            ContextAction::Cleared,
            context.user_id,
            tenant_id,
            context.correlation_id,
            "context cleared",
            None,
        );
    }

    fn reject(&self, user_id: Uuid, tenant_id: Option<Uuid>, correlation_id: Uuid, err: &SaccoError) {
        metrics::counter!("context.rejected").increment(1);
        warn!(
            user_id = %user_id,
            correlation_id = %correlation_id,
            code = err.error_code(),
            error = %err,
            "Rejected context binding"
        );
        self.audit.record(
            ContextAction::Rejected,
            user_id,
            tenant_id,
            correlation_id,
            err.to_string(),
            None,
        );
    }

    fn deny_switch(&self, context: &RequestContext, target: Option<Uuid>, err: &SaccoError) {
        warn!(
            user_id = %context.user_id,
            correlation_id = %context.correlation_id,
            code = err.error_code(),
            error = %err,
            "Denied context switch"
        );
        self.audit.record(
            ContextAction::SwitchDenied,
            context.user_id,
            target,
            context.correlation_id,
            err.to_string(),
            None,
        );
    }
}
