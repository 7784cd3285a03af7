use sacco_core::types::{FeatureKey, SubscriptionPlan};

/// Feature ceilings for a subscription plan. `None` means unbounded.
/// Per-tenant overrides in the usage store take precedence over these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub members: Option<u64>,
    pub users: Option<u64>,
    pub storage_mb: Option<u64>,
    pub api_calls: Option<u64>,
    pub reports: Option<u64>,
}

impl PlanLimits {
    pub fn for_plan(plan: SubscriptionPlan) -> Self {
        match plan {
            SubscriptionPlan::Starter => Self {
                members: Some(250),
                users: Some(5),
                storage_mb: Some(512),
                api_calls: Some(10_000),
                reports: Some(20),
            },
            SubscriptionPlan::Professional => Self {
                members: Some(2_500),
                users: Some(25),
                storage_mb: Some(4_096),
                api_calls: Some(100_000),
                reports: Some(200),
            },
            SubscriptionPlan::Enterprise => Self {
                members: None,
                users: None,
                storage_mb: Some(32_768),
                api_calls: None,
                reports: None,
            },
        }
    }

    pub fn limit_for(&self, feature: FeatureKey) -> Option<u64> {
        match feature {
            FeatureKey::Members => self.members,
            FeatureKey::Users => self.users,
            FeatureKey::StorageMb => self.storage_mb,
            FeatureKey::ApiCalls => self.api_calls,
            FeatureKey::Reports => self.reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_plan_is_capped() {
        let limits = PlanLimits::for_plan(SubscriptionPlan::Starter);
        assert_eq!(limits.limit_for(FeatureKey::Members), Some(250));
        assert_eq!(limits.limit_for(FeatureKey::ApiCalls), Some(10_000));
    }

    #[test]
    fn enterprise_plan_is_mostly_unbounded() {
        let limits = PlanLimits::for_plan(SubscriptionPlan::Enterprise);
        assert_eq!(limits.limit_for(FeatureKey::Members), None);
        assert_eq!(limits.limit_for(FeatureKey::StorageMb), Some(32_768));
    }
}
