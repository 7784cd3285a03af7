use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use sacco_core::config::DatabaseConfig;
use sacco_core::error::{SaccoError, SaccoResult};
use sacco_core::types::{FeatureKey, Tenant, TenantStatus};

use crate::schema::{init_system_schema, open_pool, storage_err};
use crate::store::{FeatureUsageRecord, TenantStore, UsageStore};

const TENANT_COLUMNS: &str =
    "id, slug, name, status, plan, subscription_ends_at, contact_email, created_at, updated_at";

/// SQLite-backed system store: tenant directory plus usage counters.
/// Counter updates are single upsert statements, so concurrent
/// increments from parallel requests serialize inside the database.
pub struct SqliteSystemStore {
    pool: SqlitePool,
}

impl SqliteSystemStore {
    /// Open the system database and ensure its schema exists.
    pub async fn bootstrap(config: &DatabaseConfig) -> SaccoResult<Self> {
        let pool = open_pool(&config.system_url, config).await?;
        init_system_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an already-initialized pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_uuid(raw: &str) -> SaccoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| SaccoError::Storage(format!("corrupt uuid in row: {e}")))
}

fn map_tenant_row(row: &SqliteRow) -> SaccoResult<Tenant> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;
    let plan: String = row.try_get("plan").map_err(storage_err)?;
    Ok(Tenant {
        id: parse_uuid(&id)?,
        slug: row.try_get("slug").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        status: status.parse()?,
        plan: plan.parse()?,
        subscription_ends_at: row
            .try_get::<Option<DateTime<Utc>>, _>("subscription_ends_at")
            .map_err(storage_err)?,
        contact_email: row
            .try_get::<Option<String>, _>("contact_email")
            .map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

fn map_usage_row(tenant_id: Uuid, row: &SqliteRow) -> SaccoResult<FeatureUsageRecord> {
    let feature: String = row.try_get("feature_key").map_err(storage_err)?;
    let current: i64 = row.try_get("current_usage").map_err(storage_err)?;
    let limit: Option<i64> = row.try_get("limit_value").map_err(storage_err)?;
    Ok(FeatureUsageRecord {
        tenant_id,
        feature: feature.parse()?,
        period_start: row.try_get("period_start").map_err(storage_err)?,
        current_usage: current.max(0) as u64,
        limit_value: limit.map(|v| v.max(0) as u64),
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

#[async_trait]
impl TenantStore for SqliteSystemStore {
    async fn find_by_slug(&self, slug: &str) -> SaccoResult<Option<Tenant>> {
        let row = sqlx::query(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE slug = ?"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(map_tenant_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> SaccoResult<Option<Tenant>> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(map_tenant_row).transpose()
    }

    async fn insert(&self, tenant: &Tenant) -> SaccoResult<()> {
        sqlx::query(
            "INSERT INTO tenants (id, slug, name, status, plan, subscription_ends_at, \
             contact_email, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tenant.id.to_string())
        .bind(&tenant.slug)
        .bind(&tenant.name)
        .bind(tenant.status.as_str())
        .bind(tenant.plan.as_str())
        .bind(tenant.subscription_ends_at)
        .bind(&tenant.contact_email)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: TenantStatus) -> SaccoResult<()> {
        let result = sqlx::query("UPDATE tenants SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(SaccoError::TenantNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> SaccoResult<Vec<Tenant>> {
        let rows = sqlx::query(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants ORDER BY slug"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(map_tenant_row).collect()
    }
}

#[async_trait]
impl UsageStore for SqliteSystemStore {
    async fn record(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        period_start: NaiveDate,
    ) -> SaccoResult<Option<FeatureUsageRecord>> {
        let row = sqlx::query(
            "SELECT feature_key, period_start, current_usage, limit_value, updated_at \
             FROM tenant_feature_usage \
             WHERE tenant_id = ? AND feature_key = ? AND period_start = ?",
        )
        .bind(tenant_id.to_string())
        .bind(feature.as_str())
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(|r| map_usage_row(tenant_id, r)).transpose()
    }

    async fn increment(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        period_start: NaiveDate,
        delta: u64,
    ) -> SaccoResult<u64> {
        let row = sqlx::query(
            "INSERT INTO tenant_feature_usage \
             (tenant_id, feature_key, period_start, current_usage, limit_value, updated_at) \
             VALUES (?, ?, ?, ?, NULL, ?) \
             ON CONFLICT (tenant_id, feature_key, period_start) \
             DO UPDATE SET current_usage = current_usage + excluded.current_usage, \
             updated_at = excluded.updated_at \
             RETURNING current_usage",
        )
        .bind(tenant_id.to_string())
        .bind(feature.as_str())
        .bind(period_start)
        .bind(delta as i64)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        let current: i64 = row.try_get("current_usage").map_err(storage_err)?;
        Ok(current.max(0) as u64)
    }

    async fn set_limit_override(
        &self,
        tenant_id: Uuid,
        feature: FeatureKey,
        period_start: NaiveDate,
        limit: Option<u64>,
    ) -> SaccoResult<()> {
        sqlx::query(
            "INSERT INTO tenant_feature_usage \
             (tenant_id, feature_key, period_start, current_usage, limit_value, updated_at) \
             VALUES (?, ?, ?, 0, ?, ?) \
             ON CONFLICT (tenant_id, feature_key, period_start) \
             DO UPDATE SET limit_value = excluded.limit_value, updated_at = excluded.updated_at",
        )
        .bind(tenant_id.to_string())
        .bind(feature.as_str())
        .bind(period_start)
        .bind(limit.map(|v| v as i64))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn usage_for_tenant(
        &self,
        tenant_id: Uuid,
        period_start: NaiveDate,
    ) -> SaccoResult<Vec<FeatureUsageRecord>> {
        let rows = sqlx::query(
            "SELECT feature_key, period_start, current_usage, limit_value, updated_at \
             FROM tenant_feature_usage \
             WHERE tenant_id = ? AND period_start = ? ORDER BY feature_key",
        )
        .bind(tenant_id.to_string())
        .bind(period_start)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(|r| map_usage_row(tenant_id, r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sacco_core::types::SubscriptionPlan;

    async fn store() -> SqliteSystemStore {
        let config = DatabaseConfig {
            system_url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        SqliteSystemStore::bootstrap(&config).await.unwrap()
    }

    fn period() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
    }

    #[tokio::test]
    async fn tenant_rows_round_trip() {
        let store = store().await;
        let mut tenant = Tenant::new("umoja", "Umoja SACCO", SubscriptionPlan::Professional);
        tenant.subscription_ends_at = Some(Utc::now() + Duration::days(30));
        tenant.contact_email = Some("billing@umoja.example".to_string());
        store.insert(&tenant).await.unwrap();

        let loaded = store.find_by_slug("umoja").await.unwrap().unwrap();
        assert_eq!(loaded.id, tenant.id);
        assert_eq!(loaded.plan, SubscriptionPlan::Professional);
        assert_eq!(loaded.status, TenantStatus::Active);
        assert!(loaded.subscription_ends_at.is_some());

        assert!(store.find_by_slug("missing").await.unwrap().is_none());
        let by_id = store.find_by_id(tenant.id).await.unwrap().unwrap();
        assert_eq!(by_id.slug, "umoja");
    }

    #[tokio::test]
    async fn duplicate_slug_violates_unique_constraint() {
        let store = store().await;
        let first = Tenant::new("acme", "Acme", SubscriptionPlan::Starter);
        let second = Tenant::new("acme", "Clone", SubscriptionPlan::Starter);
        store.insert(&first).await.unwrap();
        assert!(store.insert(&second).await.is_err());
    }

    #[tokio::test]
    async fn status_update_requires_existing_tenant() {
        let store = store().await;
        let tenant = Tenant::new("kilimo", "Kilimo", SubscriptionPlan::Starter);
        store.insert(&tenant).await.unwrap();

        store
            .update_status(tenant.id, TenantStatus::Suspended)
            .await
            .unwrap();
        let loaded = store.find_by_id(tenant.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TenantStatus::Suspended);

        let err = store
            .update_status(Uuid::new_v4(), TenantStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, SaccoError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn usage_upsert_is_cumulative_and_period_scoped() {
        let store = store().await;
        let tenant = Uuid::new_v4();

        assert_eq!(
            store
                .increment(tenant, FeatureKey::ApiCalls, period(), 10)
                .await
                .unwrap(),
            10
        );
        assert_eq!(
            store
                .increment(tenant, FeatureKey::ApiCalls, period(), 5)
                .await
                .unwrap(),
            15
        );

        let next = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        assert_eq!(
            store
                .increment(tenant, FeatureKey::ApiCalls, next, 1)
                .await
                .unwrap(),
            1
        );

        let records = store.usage_for_tenant(tenant, period()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].current_usage, 15);
    }

    #[tokio::test]
    async fn limit_override_survives_increments() {
        let store = store().await;
        let tenant = Uuid::new_v4();

        store
            .set_limit_override(tenant, FeatureKey::Members, period(), Some(250))
            .await
            .unwrap();
        store
            .increment(tenant, FeatureKey::Members, period(), 4)
            .await
            .unwrap();

        let record = store
            .record(tenant, FeatureKey::Members, period())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.current_usage, 4);
        assert_eq!(record.limit_value, Some(250));
    }
}
