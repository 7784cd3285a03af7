use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use sacco_core::error::{SaccoError, SaccoResult};
use sacco_core::types::{FeatureKey, Tenant};
use sacco_storage::UsageStore;

use crate::notify::{QuotaDenial, QuotaNotifier};
use crate::plans::PlanLimits;

/// Outcome of a quota check. Checking never mutates counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed { current: u64, limit: Option<u64> },
    Denied { current: u64, limit: u64 },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed { .. })
    }
}

/// Current-period usage of one feature, with its effective limit.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureUsage {
    pub feature: FeatureKey,
    pub current: u64,
    pub limit: Option<u64>,
    pub period_start: NaiveDate,
}

/// Meters feature usage per tenant against plan limits. Checks are
/// read-only; recording goes through the store's atomic increment, so
/// parallel requests cannot lose updates. Counters reset by keying on
/// the calendar month, never by mutating old rows.
pub struct ResourceQuotaTracker {
    usage: Arc<dyn UsageStore>,
    notifier: Arc<dyn QuotaNotifier>,
    notify_denials: bool,
}

impl ResourceQuotaTracker {
    pub fn new(
        usage: Arc<dyn UsageStore>,
        notifier: Arc<dyn QuotaNotifier>,
        notify_denials: bool,
    ) -> Self {
        Self {
            usage,
            notifier,
            notify_denials,
        }
    }

    /// First day of the month containing `now`, in UTC.
    pub fn current_period_start(now: DateTime<Utc>) -> NaiveDate {
        NaiveDate::from_ymd_opt(now.year(), now.month(), 1).unwrap_or_else(|| now.date_naive())
    }

    /// Would one more unit of `feature` be within quota? A denial
    /// reports the standing counters and fires the notifier; it never
    /// consumes usage.
    pub async fn check_access(
        &self,
        tenant: &Tenant,
        feature: FeatureKey,
    ) -> SaccoResult<AccessDecision> {
        let period = Self::current_period_start(Utc::now());
        let record = self.usage.record(tenant.id, feature, period).await?;
        let current = record.as_ref().map(|r| r.current_usage).unwrap_or(0);
        let limit = record
            .as_ref()
            .and_then(|r| r.limit_value)
            .or_else(|| PlanLimits::for_plan(tenant.plan).limit_for(feature));

        match limit {
            Some(limit) if current >= limit => {
                metrics::counter!("quota.denied").increment(1);
                if self.notify_denials {
                    self.notifier.notify(&QuotaDenial {
                        tenant_id: tenant.id,
                        slug: tenant.slug.clone(),
                        contact_email: tenant.contact_email.clone(),
                        feature,
                        current,
                        limit,
                        at: Utc::now(),
                    });
                }
                Ok(AccessDecision::Denied { current, limit })
            }
            _ => Ok(AccessDecision::Allowed { current, limit }),
        }
    }

    /// Like [`check_access`](Self::check_access) but maps denial onto
    /// the error taxonomy for call sites that abort on it.
    pub async fn ensure(&self, tenant: &Tenant, feature: FeatureKey) -> SaccoResult<()> {
        match self.check_access(tenant, feature).await? {
            AccessDecision::Allowed { .. } => Ok(()),
            AccessDecision::Denied { current, limit } => Err(SaccoError::QuotaExceeded {
                feature: feature.to_string(),
                current,
                limit,
            }),
        }
    }

    /// Record consumed usage. The increment is a single atomic
    /// statement at the storage layer.
    pub async fn record_usage(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        delta: u64,
    ) -> SaccoResult<u64> {
        let period = Self::current_period_start(Utc::now());
        let total = self.usage.increment(tenant_id, feature, period, delta).await?;
        debug!(tenant_id = %tenant_id, feature = %feature, total, "Recorded feature usage");
        Ok(total)
    }

    /// Check quota, then hold the right to record. The counter moves
    /// only when the caller commits after the guarded action succeeded;
    /// a dropped permit leaves usage untouched.
    pub async fn permit(
        &self,
        tenant: &Tenant,
        feature: FeatureKey,
    ) -> SaccoResult<UsagePermit<'_>> {
        self.ensure(tenant, feature).await?;
        Ok(UsagePermit {
            tracker: self,
            tenant_id: tenant.id,
            feature,
        })
    }

    /// Current-period snapshot across all metered features.
    pub async fn overview(&self, tenant: &Tenant) -> SaccoResult<Vec<FeatureUsage>> {
        let period = Self::current_period_start(Utc::now());
        let plan_limits = PlanLimits::for_plan(tenant.plan);
        let mut out = Vec::with_capacity(FeatureKey::ALL.len());
        for feature in FeatureKey::ALL {
            let record = self.usage.record(tenant.id, feature, period).await?;
            let current = record.as_ref().map(|r| r.current_usage).unwrap_or(0);
            let limit = record
                .as_ref()
                .and_then(|r| r.limit_value)
                .or_else(|| plan_limits.limit_for(feature));
            out.push(FeatureUsage {
                feature,
                current,
                limit,
                period_start: period,
            });
        }
        Ok(out)
    }
}

/// Permission to record usage for one action, issued after a passing
/// quota check.
pub struct UsagePermit<'a> {
    tracker: &'a ResourceQuotaTracker,
    tenant_id: Uuid,
    feature: FeatureKey,
}

impl UsagePermit<'_> {
    pub async fn commit(self, delta: u64) -> SaccoResult<u64> {
        self.tracker
            .record_usage(self.tenant_id, self.feature, delta)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sacco_core::types::SubscriptionPlan;
    use sacco_storage::MemorySystemStore;

    use crate::notify::capture_notifier;

    fn tracker_with_capture() -> (ResourceQuotaTracker, Arc<crate::notify::CaptureNotifier>) {
        let store = Arc::new(MemorySystemStore::new());
        let capture = capture_notifier();
        let tracker = ResourceQuotaTracker::new(store, capture.clone(), true);
        (tracker, capture)
    }

    #[test]
    fn period_starts_on_the_first_of_the_month() {
        let now = Utc.with_ymd_and_hms(2026, 8, 21, 10, 30, 0).unwrap();
        assert_eq!(
            ResourceQuotaTracker::current_period_start(now),
            NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
        );
    }

    #[tokio::test]
    async fn denial_happens_exactly_at_the_limit() {
        let (tracker, capture) = tracker_with_capture();
        // Starter plan caps reports at 20.
        let tenant = Tenant::new("boundary", "Boundary SACCO", SubscriptionPlan::Starter);

        tracker
            .record_usage(tenant.id, FeatureKey::Reports, 19)
            .await
            .unwrap();
        let decision = tracker
            .check_access(&tenant, FeatureKey::Reports)
            .await
            .unwrap();
        assert_eq!(
            decision,
            AccessDecision::Allowed {
                current: 19,
                limit: Some(20)
            }
        );

        tracker
            .record_usage(tenant.id, FeatureKey::Reports, 1)
            .await
            .unwrap();
        let decision = tracker
            .check_access(&tenant, FeatureKey::Reports)
            .await
            .unwrap();
        assert_eq!(
            decision,
            AccessDecision::Denied {
                current: 20,
                limit: 20
            }
        );
        assert_eq!(capture.count(), 1);
        assert_eq!(capture.denials()[0].slug, "boundary");
    }

    #[tokio::test]
    async fn denied_checks_never_consume_usage() {
        let (tracker, capture) = tracker_with_capture();
        let tenant = Tenant::new("readonly", "ReadOnly SACCO", SubscriptionPlan::Starter);

        tracker
            .record_usage(tenant.id, FeatureKey::Reports, 20)
            .await
            .unwrap();
        for _ in 0..3 {
            let decision = tracker
                .check_access(&tenant, FeatureKey::Reports)
                .await
                .unwrap();
            assert!(!decision.is_allowed());
        }

        let overview = tracker.overview(&tenant).await.unwrap();
        let reports = overview
            .iter()
            .find(|u| u.feature == FeatureKey::Reports)
            .unwrap();
        assert_eq!(reports.current, 20);
        assert_eq!(capture.count(), 3);
    }

    #[tokio::test]
    async fn dropped_permit_leaves_counters_untouched() {
        let (tracker, _) = tracker_with_capture();
        let tenant = Tenant::new("permits", "Permit SACCO", SubscriptionPlan::Starter);

        {
            let _permit = tracker.permit(&tenant, FeatureKey::Members).await.unwrap();
            // Action failed; permit dropped without commit.
        }
        let overview = tracker.overview(&tenant).await.unwrap();
        let members = overview
            .iter()
            .find(|u| u.feature == FeatureKey::Members)
            .unwrap();
        assert_eq!(members.current, 0);

        let permit = tracker.permit(&tenant, FeatureKey::Members).await.unwrap();
        assert_eq!(permit.commit(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unbounded_features_always_allow() {
        let (tracker, capture) = tracker_with_capture();
        let tenant = Tenant::new("unbounded", "Big SACCO", SubscriptionPlan::Enterprise);

        tracker
            .record_usage(tenant.id, FeatureKey::ApiCalls, 1_000_000)
            .await
            .unwrap();
        let decision = tracker
            .check_access(&tenant, FeatureKey::ApiCalls)
            .await
            .unwrap();
        assert!(decision.is_allowed());
        assert_eq!(capture.count(), 0);
    }

    #[tokio::test]
    async fn ensure_maps_denial_to_quota_error() {
        let store = Arc::new(MemorySystemStore::new());
        let tracker = ResourceQuotaTracker::new(store.clone(), capture_notifier(), true);
        let tenant = Tenant::new("caps", "Caps SACCO", SubscriptionPlan::Starter);

        let period = ResourceQuotaTracker::current_period_start(Utc::now());
        store
            .set_limit_override(tenant.id, FeatureKey::Members, period, Some(1))
            .await
            .unwrap();
        tracker
            .record_usage(tenant.id, FeatureKey::Members, 1)
            .await
            .unwrap();

        let err = tracker
            .ensure(&tenant, FeatureKey::Members)
            .await
            .unwrap_err();
        match err {
            SaccoError::QuotaExceeded {
                feature,
                current,
                limit,
            } => {
                assert_eq!(feature, "members");
                assert_eq!(current, 1);
                assert_eq!(limit, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
