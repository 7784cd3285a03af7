use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sqlx::sqlite::SqlitePool;
use tracing::info;

use sacco_core::config::DatabaseConfig;
use sacco_core::error::{SaccoError, SaccoResult};
use sacco_core::types::Tenant;

use crate::handle::TenantConnection;
use crate::registry::ProtectedTableRegistry;
use crate::rewriter::QuerySafetyRewriter;
use crate::schema::{init_tenant_schema, open_pool};

/// Maps a validated tenant to its database pool. One SQLite database
/// per cooperative; pools are cached per slug and opened lazily with a
/// bounded timeout. There is no fallback pool: acquisition failure is
/// fatal for the request.
pub struct ConnectionRouter {
    config: DatabaseConfig,
    rewriter: Arc<QuerySafetyRewriter>,
    system_pool: SqlitePool,
    pools: DashMap<String, SqlitePool>,
}

impl ConnectionRouter {
    pub fn new(
        config: DatabaseConfig,
        registry: Arc<ProtectedTableRegistry>,
        system_pool: SqlitePool,
    ) -> Self {
        Self {
            config,
            rewriter: Arc::new(QuerySafetyRewriter::new(registry)),
            system_pool,
            pools: DashMap::new(),
        }
    }

    /// Handle bound to `tenant`'s database. The handle carries the
    /// tenant identity, so statements executed through it can never
    /// reach another tenant's pool.
    pub async fn connection_for(&self, tenant: &Tenant) -> SaccoResult<TenantConnection> {
        if let Some(pool) = self.pools.get(tenant.slug.as_str()) {
            return Ok(TenantConnection::bound(
                tenant,
                pool.clone(),
                self.rewriter.clone(),
            ));
        }

        let url = self.tenant_url(&tenant.slug);
        let opened = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            async {
                let pool = open_pool(&url, &self.config).await?;
                init_tenant_schema(&pool).await?;
                Ok::<SqlitePool, SaccoError>(pool)
            },
        )
        .await;

        let pool = match opened {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                return Err(SaccoError::ConnectionAcquisitionFailed {
                    slug: tenant.slug.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(SaccoError::ConnectionAcquisitionFailed {
                    slug: tenant.slug.clone(),
                    reason: format!(
                        "database open timed out after {}ms",
                        self.config.connect_timeout_ms
                    ),
                })
            }
        };

        // Concurrent first requests may race here; the loser's pool is
        // dropped and the cached one wins.
        let pool = self
            .pools
            .entry(tenant.slug.clone())
            .or_insert(pool)
            .clone();
        info!(tenant_id = %tenant.id, slug = %tenant.slug, "Opened tenant database pool");
        Ok(TenantConnection::bound(tenant, pool, self.rewriter.clone()))
    }

    /// Unbound handle over the system database. Statements pass through
    /// the rewriter untouched; system context is deliberate.
    pub fn system_connection(&self) -> TenantConnection {
        TenantConnection::system(self.system_pool.clone(), self.rewriter.clone())
    }

    /// Drop a cached pool, e.g. when a tenant is suspended.
    pub fn invalidate(&self, slug: &str) {
        if self.pools.remove(slug).is_some() {
            info!(slug = %slug, "Dropped tenant database pool");
        }
    }

    pub fn open_pools(&self) -> usize {
        self.pools.len()
    }

    fn tenant_url(&self, slug: &str) -> String {
        match &self.config.tenant_data_dir {
            Some(dir) => format!("sqlite://{}/{}.db?mode=rwc", dir.trim_end_matches('/'), slug),
            None => format!("sqlite:file:sacco_tenant_{slug}?mode=memory&cache=shared"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sacco_core::types::SubscriptionPlan;

    async fn memory_router() -> ConnectionRouter {
        let config = DatabaseConfig {
            system_url: "sqlite::memory:".to_string(),
            tenant_data_dir: None,
            ..DatabaseConfig::default()
        };
        let system_pool = open_pool(&config.system_url, &config).await.unwrap();
        crate::schema::init_system_schema(&system_pool).await.unwrap();
        ConnectionRouter::new(
            config,
            Arc::new(ProtectedTableRegistry::standard()),
            system_pool,
        )
    }

    #[tokio::test]
    async fn pools_are_cached_per_slug() {
        let router = memory_router().await;
        let tenant = Tenant::new("router-cache", "Cache SACCO", SubscriptionPlan::Starter);

        router.connection_for(&tenant).await.unwrap();
        router.connection_for(&tenant).await.unwrap();
        assert_eq!(router.open_pools(), 1);

        let other = Tenant::new("router-other", "Other SACCO", SubscriptionPlan::Starter);
        router.connection_for(&other).await.unwrap();
        assert_eq!(router.open_pools(), 2);
    }

    #[tokio::test]
    async fn invalidate_drops_the_cached_pool() {
        let router = memory_router().await;
        let tenant = Tenant::new("router-drop", "Drop SACCO", SubscriptionPlan::Starter);

        router.connection_for(&tenant).await.unwrap();
        assert_eq!(router.open_pools(), 1);
        router.invalidate(&tenant.slug);
        assert_eq!(router.open_pools(), 0);
    }

    #[tokio::test]
    async fn handles_carry_their_binding() {
        let router = memory_router().await;
        let tenant = Tenant::new("router-bind", "Bind SACCO", SubscriptionPlan::Starter);

        let handle = router.connection_for(&tenant).await.unwrap();
        assert_eq!(handle.tenant_id(), Some(tenant.id));
        assert_eq!(handle.slug(), Some("router-bind"));
        assert!(!handle.is_system());

        let system = router.system_connection();
        assert!(system.is_system());
        assert_eq!(system.tenant_id(), None);
    }
}
