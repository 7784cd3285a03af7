//! Development session issuance and bearer-token lookup.
//!
//! Development: a fixed credential table seeded alongside the demo
//! tenants. Production: replace with the platform identity provider.

use std::net::IpAddr;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use sacco_core::config::SecurityConfig;
use sacco_core::types::{Role, Session, Tenant};

const TOKEN_PREFIX: &str = "sacco_dev_";

#[derive(Clone)]
struct StaffCredential {
    user_id: Uuid,
    password: String,
    role: Role,
    tenant_id: Option<Uuid>,
}

/// Issues and resolves bearer-token sessions. Failed attempts are
/// counted per username and land on the next successful session, where
/// the security evaluation picks them up.
pub struct SessionManager {
    ttl: Duration,
    credentials: DashMap<String, StaffCredential>,
    failed_attempts: DashMap<String, u32>,
    sessions: DashMap<String, Session>,
}

impl SessionManager {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            ttl: Duration::minutes(config.session_ttl_minutes),
            credentials: DashMap::new(),
            failed_attempts: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    pub fn register_credential(
        &self,
        username: &str,
        password: &str,
        role: Role,
        tenant_id: Option<Uuid>,
    ) {
        self.credentials.insert(
            username.to_string(),
            StaffCredential {
                user_id: Uuid::new_v4(),
                password: password.to_string(),
                role,
                tenant_id,
            },
        );
    }

    /// The demo credential set: one platform operator plus a manager
    /// and a teller per seeded cooperative.
    pub fn seed_demo_credentials(&self, tenants: &[Tenant]) {
        self.register_credential("admin", "admin", Role::SystemAdmin, None);
        for tenant in tenants {
            self.register_credential(
                &format!("{}-manager", tenant.slug),
                "sacco2026",
                Role::Manager,
                Some(tenant.id),
            );
            self.register_credential(
                &format!("{}-teller", tenant.slug),
                "sacco2026",
                Role::Teller,
                Some(tenant.id),
            );
        }
        info!(credentials = self.credentials.len(), "Seeded demo credentials");
    }

    /// Validate credentials and issue a bearer token. `None` means the
    /// credentials were rejected; the caller decides the response.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        ip: Option<IpAddr>,
    ) -> Option<(String, Session)> {
        let credential = match self.credentials.get(username) {
            Some(c) if c.password == password => c.clone(),
            _ => {
                *self.failed_attempts.entry(username.to_string()).or_insert(0) += 1;
                return None;
            }
        };

        let attempts = self
            .failed_attempts
            .remove(username)
            .map(|(_, n)| n)
            .unwrap_or(0);
        let now = Utc::now();
        let session = Session {
            user_id: credential.user_id,
            role: credential.role,
            tenant_id: credential.tenant_id,
            ip,
            login_attempts: attempts,
            logged_in_at: now,
            expires_at: now + self.ttl,
            password_rotation_required: false,
        };
        let token = format!("{TOKEN_PREFIX}{}", Uuid::new_v4().simple());
        self.sessions.insert(token.clone(), session.clone());
        metrics::counter!("auth.logins").increment(1);
        info!(username, role = ?credential.role, "Issued development session");
        Some((token, session))
    }

    pub fn resolve(&self, token: &str) -> Option<Session> {
        self.sessions.get(token).map(|entry| entry.clone())
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        let manager = SessionManager::new(&SecurityConfig::default());
        manager.register_credential("grace", "correct-horse", Role::Manager, Some(Uuid::new_v4()));
        manager
    }

    #[test]
    fn login_issues_a_resolvable_token() {
        let manager = manager();
        let (token, session) = manager.login("grace", "correct-horse", None).unwrap();
        assert!(token.starts_with(TOKEN_PREFIX));
        assert_eq!(manager.resolve(&token).unwrap().user_id, session.user_id);
    }

    #[test]
    fn wrong_credentials_are_rejected_and_counted() {
        let manager = manager();
        assert!(manager.login("grace", "wrong", None).is_none());
        assert!(manager.login("grace", "wrong", None).is_none());
        assert!(manager.login("nobody", "anything", None).is_none());

        let (_, session) = manager.login("grace", "correct-horse", None).unwrap();
        assert_eq!(session.login_attempts, 2);

        // The counter resets once a login succeeds.
        let (_, session) = manager.login("grace", "correct-horse", None).unwrap();
        assert_eq!(session.login_attempts, 0);
    }

    #[test]
    fn revoked_tokens_stop_resolving() {
        let manager = manager();
        let (token, _) = manager.login("grace", "correct-horse", None).unwrap();
        assert!(manager.revoke(&token));
        assert!(manager.resolve(&token).is_none());
        assert!(!manager.revoke(&token));
    }

    #[test]
    fn repeated_logins_keep_a_stable_user_identity() {
        let manager = manager();
        let (_, first) = manager.login("grace", "correct-horse", None).unwrap();
        let (_, second) = manager.login("grace", "correct-horse", None).unwrap();
        assert_eq!(first.user_id, second.user_id);
    }
}
