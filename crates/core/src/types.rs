use std::collections::BTreeSet;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SaccoError;

/// A registered cooperative (SACCO) on the platform.
///
/// Tenants are never deleted; their lifecycle is expressed through
/// `status` so historical records stay attributable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    /// Unique, lowercase, URL-safe identifier used as the subdomain label.
    pub slug: String,
    pub name: String,
    pub status: TenantStatus,
    pub plan: SubscriptionPlan,
    /// End of the paid subscription window. `None` means no expiry.
    pub subscription_ends_at: Option<DateTime<Utc>>,
    /// Billing contact, notified on quota denials.
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(slug: impl Into<String>, name: impl Into<String>, plan: SubscriptionPlan) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            slug: slug.into().to_lowercase(),
            name: name.into(),
            status: TenantStatus::Active,
            plan,
            subscription_ends_at: None,
            contact_email: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn subscription_expired(&self, now: DateTime<Utc>) -> bool {
        match self.subscription_ends_at {
            Some(ends_at) => ends_at < now,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Inactive,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Inactive => "inactive",
            TenantStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for TenantStatus {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "inactive" => Ok(TenantStatus::Inactive),
            "suspended" => Ok(TenantStatus::Suspended),
            other => Err(SaccoError::Storage(format!(
                "unknown tenant status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    Starter,
    Professional,
    Enterprise,
}

impl SubscriptionPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPlan::Starter => "starter",
            SubscriptionPlan::Professional => "professional",
            SubscriptionPlan::Enterprise => "enterprise",
        }
    }
}

impl FromStr for SubscriptionPlan {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(SubscriptionPlan::Starter),
            "professional" => Ok(SubscriptionPlan::Professional),
            "enterprise" => Ok(SubscriptionPlan::Enterprise),
            other => Err(SaccoError::Storage(format!(
                "unknown subscription plan: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when `slug` is usable as a subdomain label: non-empty,
/// ASCII alphanumeric or hyphen, no leading/trailing hyphen.
pub fn slug_is_valid(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
}

/// Staff and member roles within a cooperative. `SystemAdmin` is the
/// platform operator role and the only one eligible for system context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SystemAdmin,
    Manager,
    LoanOfficer,
    Teller,
    Accountant,
    Member,
}

impl Role {
    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::SystemAdmin => &[
                MemberRead,
                MemberWrite,
                SavingsRead,
                SavingsWrite,
                LoanRead,
                LoanWrite,
                LoanApprove,
                LedgerRead,
                LedgerWrite,
                ReportRead,
                UserManage,
                TenantSettings,
                TenantManagement,
                BillingManagement,
                SystemConfiguration,
            ],
            Role::Manager => &[
                MemberRead,
                MemberWrite,
                SavingsRead,
                SavingsWrite,
                LoanRead,
                LoanWrite,
                LoanApprove,
                LedgerRead,
                LedgerWrite,
                ReportRead,
                UserManage,
                TenantSettings,
            ],
            Role::LoanOfficer => &[MemberRead, LoanRead, LoanWrite, ReportRead],
            Role::Teller => &[MemberRead, SavingsRead, SavingsWrite, LedgerRead],
            Role::Accountant => &[SavingsRead, LoanRead, LedgerRead, LedgerWrite, ReportRead],
            Role::Member => &[MemberRead, SavingsRead, LoanRead],
        }
    }

    pub fn permission_set(&self) -> BTreeSet<Permission> {
        self.permissions().iter().copied().collect()
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    MemberRead,
    MemberWrite,
    SavingsRead,
    SavingsWrite,
    LoanRead,
    LoanWrite,
    LoanApprove,
    LedgerRead,
    LedgerWrite,
    ReportRead,
    UserManage,
    TenantSettings,
    // System-context permissions, held by platform operators only.
    TenantManagement,
    BillingManagement,
    SystemConfiguration,
}

/// Authenticated session state, produced by the auth boundary and
/// consumed read-only during context binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
    /// Tenant the user belongs to. `None` marks a platform operator.
    pub tenant_id: Option<Uuid>,
    /// Address recorded at login, compared against the requesting address.
    pub ip: Option<IpAddr>,
    pub login_attempts: u32,
    pub logged_in_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub password_rotation_required: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Metered features tracked per tenant and calendar month.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    Members,
    Users,
    StorageMb,
    ApiCalls,
    Reports,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 5] = [
        FeatureKey::Members,
        FeatureKey::Users,
        FeatureKey::StorageMb,
        FeatureKey::ApiCalls,
        FeatureKey::Reports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKey::Members => "members",
            FeatureKey::Users => "users",
            FeatureKey::StorageMb => "storage_mb",
            FeatureKey::ApiCalls => "api_calls",
            FeatureKey::Reports => "reports",
        }
    }
}

impl FromStr for FeatureKey {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "members" => Ok(FeatureKey::Members),
            "users" => Ok(FeatureKey::Users),
            "storage_mb" => Ok(FeatureKey::StorageMb),
            "api_calls" => Ok(FeatureKey::ApiCalls),
            "reports" => Ok(FeatureKey::Reports),
            other => Err(SaccoError::Storage(format!("unknown feature key: {other}"))),
        }
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn subscription_expiry_respects_open_ended_plans() {
        let now = Utc::now();
        let mut tenant = Tenant::new("kilimo", "Kilimo SACCO", SubscriptionPlan::Starter);
        assert!(!tenant.subscription_expired(now));

        tenant.subscription_ends_at = Some(now - Duration::days(1));
        assert!(tenant.subscription_expired(now));

        tenant.subscription_ends_at = Some(now + Duration::days(30));
        assert!(!tenant.subscription_expired(now));
    }

    #[test]
    fn slug_validation_rejects_unsafe_labels() {
        assert!(slug_is_valid("acme"));
        assert!(slug_is_valid("umoja-sacco"));
        assert!(!slug_is_valid(""));
        assert!(!slug_is_valid("-acme"));
        assert!(!slug_is_valid("acme-"));
        assert!(!slug_is_valid("ac me"));
        assert!(!slug_is_valid("a.b"));
    }

    #[test]
    fn operator_role_holds_system_permissions() {
        let perms = Role::SystemAdmin.permission_set();
        assert!(perms.contains(&Permission::TenantManagement));
        assert!(perms.contains(&Permission::SystemConfiguration));

        let manager = Role::Manager.permission_set();
        assert!(!manager.contains(&Permission::TenantManagement));
        assert!(manager.contains(&Permission::LoanApprove));
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            TenantStatus::Active,
            TenantStatus::Inactive,
            TenantStatus::Suspended,
        ] {
            assert_eq!(status.as_str().parse::<TenantStatus>().unwrap(), status);
        }
        assert!("deleted".parse::<TenantStatus>().is_err());
    }
}
