use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use sacco_core::config::SecurityConfig;
use sacco_core::error::{SaccoError, SaccoResult};
use sacco_core::types::{Session, Tenant, TenantStatus};

/// Advisory security posture evaluated when a context binds. The flags
/// inform downstream authorization (sensitive screens can demand a
/// fully secure posture); none of them blocks the binding on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecurityFlags {
    /// Session is younger than the configured ceiling and the login
    /// attempt counter is within bounds.
    pub session_secure: bool,
    /// Requesting address matches the address captured at login.
    /// Unknown addresses on either side are tolerated.
    pub ip_consistent: bool,
    /// Last successful login falls within the configured window.
    pub recent_login: bool,
    /// No password rotation is pending for the user.
    pub password_fresh: bool,
    /// Bound tenant is active. Vacuously true in system scope.
    pub tenant_active: bool,
    /// Bound tenant's subscription window is open. Vacuously true in
    /// system scope.
    pub subscription_valid: bool,
}

impl SecurityFlags {
    pub fn evaluate(
        config: &SecurityConfig,
        session: &Session,
        request_ip: Option<IpAddr>,
        tenant: Option<&Tenant>,
        now: DateTime<Utc>,
    ) -> Self {
        let session_age = now - session.logged_in_at;
        let age_ok = session_age <= Duration::hours(config.max_session_age_hours);
        let attempts_ok = session.login_attempts <= config.max_login_attempts;

        let ip_consistent = match (session.ip, request_ip) {
            (Some(recorded), Some(current)) => recorded == current,
            _ => true,
        };

        let (tenant_active, subscription_valid) = match tenant {
            Some(t) => (t.status == TenantStatus::Active, !t.subscription_expired(now)),
            None => (true, true),
        };

        Self {
            session_secure: age_ok && attempts_ok,
            ip_consistent,
            recent_login: session_age < Duration::days(config.recent_login_days),
            password_fresh: !session.password_rotation_required,
            tenant_active,
            subscription_valid,
        }
    }

    /// Conjunction of every flag.
    pub fn is_secure(&self) -> bool {
        self.session_secure
            && self.ip_consistent
            && self.recent_login
            && self.password_fresh
            && self.tenant_active
            && self.subscription_valid
    }
}

/// Hard validity check, distinct from the advisory flags above: an
/// expired session never binds any context.
pub fn validate_session(session: &Session, now: DateTime<Utc>) -> SaccoResult<()> {
    if session.is_expired(now) {
        return Err(SaccoError::SessionInvalid("session expired".to_string()));
    }
    Ok(())
}
