use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use sacco_core::error::{SaccoError, SaccoResult};
use sacco_core::types::{FeatureKey, SubscriptionPlan, Tenant, TenantStatus};

/// Monthly usage counter for one tenant and feature. `limit_value` is a
/// per-tenant override; `None` defers to the plan's limit.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureUsageRecord {
    pub tenant_id: Uuid,
    pub feature: FeatureKey,
    pub period_start: NaiveDate,
    pub current_usage: u64,
    pub limit_value: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

/// Read and write access to the tenant directory.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> SaccoResult<Option<Tenant>>;
    async fn find_by_id(&self, id: Uuid) -> SaccoResult<Option<Tenant>>;
    async fn insert(&self, tenant: &Tenant) -> SaccoResult<()>;
    async fn update_status(&self, id: Uuid, status: TenantStatus) -> SaccoResult<()>;
    async fn list(&self) -> SaccoResult<Vec<Tenant>>;
}

/// Metered feature counters. `increment` must be atomic at the storage
/// layer; callers never read-modify-write.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn record(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        period_start: NaiveDate,
    ) -> SaccoResult<Option<FeatureUsageRecord>>;

    /// Add `delta` to the counter, creating it at zero first if the
    /// period has no row yet. Returns the new total.
    async fn increment(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        period_start: NaiveDate,
        delta: u64,
    ) -> SaccoResult<u64>;

    async fn set_limit_override(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        period_start: NaiveDate,
        limit: Option<u64>,
    ) -> SaccoResult<()>;

    async fn usage_for_tenant(
        &self,
        tenant_id: Uuid,
        period_start: NaiveDate,
    ) -> SaccoResult<Vec<FeatureUsageRecord>>;
}

/// A small set of cooperatives covering the lifecycle states the
/// binding path must distinguish: healthy, healthy-minimal, suspended,
/// and subscription-lapsed.
pub fn demo_tenants() -> Vec<Tenant> {
    let mut umoja = Tenant::new("umoja", "Umoja SACCO", SubscriptionPlan::Professional);
    umoja.contact_email = Some("accounts@umoja.example".to_string());

    let kilimo = Tenant::new(
        "kilimo",
        "Kilimo Savings & Credit",
        SubscriptionPlan::Starter,
    );

    let mut pamoja = Tenant::new("pamoja", "Pamoja Co-operative", SubscriptionPlan::Starter);
    pamoja.status = TenantStatus::Suspended;

    let mut zamani = Tenant::new("zamani", "Zamani SACCO", SubscriptionPlan::Professional);
    zamani.subscription_ends_at = Some(Utc::now() - Duration::days(7));

    vec![umoja, kilimo, pamoja, zamani]
}

type UsageKey = (Uuid, FeatureKey, NaiveDate);

#[derive(Debug, Clone)]
struct UsageCell {
    current: u64,
    limit_value: Option<u64>,
    updated_at: DateTime<Utc>,
}

/// In-memory system store backed by DashMap. Used by tests and demo
/// deployments; production uses [`crate::SqliteSystemStore`].
#[derive(Default)]
pub struct MemorySystemStore {
    tenants: DashMap<Uuid, Tenant>,
    slugs: DashMap<String, Uuid>,
    usage: DashMap<UsageKey, UsageCell>,
}

impl MemorySystemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the demo cooperatives.
    pub async fn seed_demo_tenants(&self) -> SaccoResult<Vec<Tenant>> {
        let tenants = demo_tenants();
        for tenant in &tenants {
            self.insert(tenant).await?;
        }
        Ok(tenants)
    }

    fn to_record(key: &UsageKey, cell: &UsageCell) -> FeatureUsageRecord {
        FeatureUsageRecord {
            tenant_id: key.0,
            feature: key.1,
            period_start: key.2,
            current_usage: cell.current,
            limit_value: cell.limit_value,
            updated_at: cell.updated_at,
        }
    }
}

#[async_trait]
impl TenantStore for MemorySystemStore {
    async fn find_by_slug(&self, slug: &str) -> SaccoResult<Option<Tenant>> {
        let id = match self.slugs.get(slug) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.tenants.get(&id).map(|t| t.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> SaccoResult<Option<Tenant>> {
        Ok(self.tenants.get(&id).map(|t| t.clone()))
    }

    async fn insert(&self, tenant: &Tenant) -> SaccoResult<()> {
        if self.slugs.contains_key(&tenant.slug) {
            return Err(SaccoError::Storage(format!(
                "tenant slug '{}' already registered",
                tenant.slug
            )));
        }
        self.slugs.insert(tenant.slug.clone(), tenant.id);
        self.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: TenantStatus) -> SaccoResult<()> {
        match self.tenants.get_mut(&id) {
            Some(mut tenant) => {
                tenant.status = status;
                tenant.updated_at = Utc::now();
                Ok(())
            }
            None => Err(SaccoError::TenantNotFound(id.to_string())),
        }
    }

    async fn list(&self) -> SaccoResult<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.tenants.iter().map(|t| t.clone()).collect();
        tenants.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(tenants)
    }
}

#[async_trait]
impl UsageStore for MemorySystemStore {
    async fn record(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        period_start: NaiveDate,
    ) -> SaccoResult<Option<FeatureUsageRecord>> {
        let key = (tenant_id, feature, period_start);
        Ok(self.usage.get(&key).map(|cell| Self::to_record(&key, &cell)))
    }

    async fn increment(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        period_start: NaiveDate,
        delta: u64,
    ) -> SaccoResult<u64> {
        let mut cell = self
            .usage
            .entry((tenant_id, feature, period_start))
            .or_insert_with(|| UsageCell {
                current: 0,
                limit_value: None,
                updated_at: Utc::now(),
            });
        cell.current += delta;
        cell.updated_at = Utc::now();
        Ok(cell.current)
    }

    async fn set_limit_override(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        period_start: NaiveDate,
        limit: Option<u64>,
    ) -> SaccoResult<()> {
        let mut cell = self
            .usage
            .entry((tenant_id, feature, period_start))
            .or_insert_with(|| UsageCell {
                current: 0,
                limit_value: None,
                updated_at: Utc::now(),
            });
        cell.limit_value = limit;
        cell.updated_at = Utc::now();
        Ok(())
    }

    async fn usage_for_tenant(
        &self,
        tenant_id: Uuid,
        period_start: NaiveDate,
    ) -> SaccoResult<Vec<FeatureUsageRecord>> {
        let mut records: Vec<FeatureUsageRecord> = self
            .usage
            .iter()
            .filter(|entry| entry.key().0 == tenant_id && entry.key().2 == period_start)
            .map(|entry| Self::to_record(entry.key(), entry.value()))
            .collect();
        records.sort_by_key(|r| r.feature.as_str());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
    }

    #[tokio::test]
    async fn slug_lookup_distinguishes_absence() {
        let store = MemorySystemStore::new();
        store.seed_demo_tenants().await.unwrap();

        let found = store.find_by_slug("umoja").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().name, "Umoja SACCO");

        assert!(store.find_by_slug("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_slug_is_rejected() {
        let store = MemorySystemStore::new();
        let first = Tenant::new("acme", "Acme SACCO", SubscriptionPlan::Starter);
        let second = Tenant::new("acme", "Other SACCO", SubscriptionPlan::Starter);
        store.insert(&first).await.unwrap();
        assert!(store.insert(&second).await.is_err());
    }

    #[tokio::test]
    async fn increments_accumulate_within_a_period() {
        let store = MemorySystemStore::new();
        let tenant = Uuid::new_v4();

        let first = store
            .increment(tenant, FeatureKey::Members, period(), 3)
            .await
            .unwrap();
        assert_eq!(first, 3);

        let second = store
            .increment(tenant, FeatureKey::Members, period(), 2)
            .await
            .unwrap();
        assert_eq!(second, 5);

        // A new period starts from zero.
        let next_period = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let rolled = store
            .increment(tenant, FeatureKey::Members, next_period, 1)
            .await
            .unwrap();
        assert_eq!(rolled, 1);
    }

    #[tokio::test]
    async fn limit_override_is_readable() {
        let store = MemorySystemStore::new();
        let tenant = Uuid::new_v4();

        store
            .set_limit_override(tenant, FeatureKey::ApiCalls, period(), Some(10_000))
            .await
            .unwrap();
        let record = store
            .record(tenant, FeatureKey::ApiCalls, period())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.limit_value, Some(10_000));
        assert_eq!(record.current_usage, 0);
    }
}
