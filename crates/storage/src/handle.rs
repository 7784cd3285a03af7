use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::{debug, warn};
use uuid::Uuid;

use sacco_core::error::SaccoResult;
use sacco_core::types::Tenant;

use crate::rewriter::{GuardedQuery, QuerySafetyRewriter, RewriteDecision};
use crate::schema::storage_err;
use crate::value::SqlValue;

#[derive(Debug, Clone)]
struct ConnectionBinding {
    tenant_id: Uuid,
    slug: String,
}

/// Database handle routed for one request. Bound handles run every
/// statement through the safety rewriter with their tenant id; the
/// system handle passes statements through untouched.
#[derive(Debug, Clone)]
pub struct TenantConnection {
    binding: Option<ConnectionBinding>,
    pool: SqlitePool,
    rewriter: Arc<QuerySafetyRewriter>,
}

impl TenantConnection {
    pub(crate) fn bound(
        tenant: &Tenant,
        pool: SqlitePool,
        rewriter: Arc<QuerySafetyRewriter>,
    ) -> Self {
        Self {
            binding: Some(ConnectionBinding {
                tenant_id: tenant.id,
                slug: tenant.slug.clone(),
            }),
            pool,
            rewriter,
        }
    }

    pub(crate) fn system(pool: SqlitePool, rewriter: Arc<QuerySafetyRewriter>) -> Self {
        Self {
            binding: None,
            pool,
            rewriter,
        }
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.binding.as_ref().map(|b| b.tenant_id)
    }

    pub fn slug(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.slug.as_str())
    }

    pub fn is_system(&self) -> bool {
        self.binding.is_none()
    }

    pub async fn fetch_all(&self, sql: &str, params: Vec<SqlValue>) -> SaccoResult<Vec<SqliteRow>> {
        let guarded = self.guard(sql, params)?;
        let mut query = sqlx::query(&guarded.sql);
        for value in guarded.params {
            query = value.bind(query);
        }
        query.fetch_all(&self.pool).await.map_err(storage_err)
    }

    pub async fn fetch_optional(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> SaccoResult<Option<SqliteRow>> {
        let guarded = self.guard(sql, params)?;
        let mut query = sqlx::query(&guarded.sql);
        for value in guarded.params {
            query = value.bind(query);
        }
        query.fetch_optional(&self.pool).await.map_err(storage_err)
    }

    /// Execute a statement, returning affected rows.
    pub async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> SaccoResult<u64> {
        let guarded = self.guard(sql, params)?;
        let mut query = sqlx::query(&guarded.sql);
        for value in guarded.params {
            query = value.bind(query);
        }
        let result = query.execute(&self.pool).await.map_err(storage_err)?;
        Ok(result.rows_affected())
    }

    fn slug_label(&self) -> &str {
        self.binding.as_ref().map(|b| b.slug.as_str()).unwrap_or("system")
    }

    fn guard(&self, sql: &str, params: Vec<SqlValue>) -> SaccoResult<GuardedQuery> {
        let tenant_id = self.binding.as_ref().map(|b| b.tenant_id);
        match self.rewriter.rewrite(sql, params, tenant_id) {
            Ok(guarded) => {
                if guarded.decision == RewriteDecision::Injected {
                    metrics::counter!("query.rewritten").increment(1);
                    debug!(slug = self.slug_label(), sql = %guarded.sql, "Injected tenant predicate");
                }
                Ok(guarded)
            }
            Err(e) => {
                metrics::counter!("query.rejected").increment(1);
                warn!(slug = self.slug_label(), error = %e, "Rejected unsafe statement");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sacco_core::config::DatabaseConfig;
    use sacco_core::error::SaccoError;
    use sacco_core::types::SubscriptionPlan;
    use sqlx::Row;

    use crate::registry::ProtectedTableRegistry;
    use crate::router::ConnectionRouter;
    use crate::schema::{init_system_schema, init_tenant_schema, open_pool};

    async fn memory_router() -> ConnectionRouter {
        let config = DatabaseConfig {
            system_url: "sqlite::memory:".to_string(),
            tenant_data_dir: None,
            ..DatabaseConfig::default()
        };
        let system_pool = open_pool(&config.system_url, &config).await.unwrap();
        init_system_schema(&system_pool).await.unwrap();
        ConnectionRouter::new(
            config,
            Arc::new(ProtectedTableRegistry::standard()),
            system_pool,
        )
    }

    async fn insert_member(handle: &TenantConnection, tenant_id: Uuid, name: &str) {
        handle
            .execute(
                "INSERT INTO members (id, tenant_id, member_no, full_name, status, joined_at) \
                 VALUES (?, ?, ?, ?, 'active', ?)",
                vec![
                    Uuid::new_v4().into(),
                    tenant_id.into(),
                    SqlValue::from("M-001"),
                    name.into(),
                    Utc::now().into(),
                ],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tenant_handles_see_only_their_rows() {
        let router = memory_router().await;
        let alpha = Tenant::new("handle-alpha", "Alpha SACCO", SubscriptionPlan::Starter);
        let beta = Tenant::new("handle-beta", "Beta SACCO", SubscriptionPlan::Starter);

        let alpha_handle = router.connection_for(&alpha).await.unwrap();
        let beta_handle = router.connection_for(&beta).await.unwrap();

        insert_member(&alpha_handle, alpha.id, "Grace Wanjiru").await;
        insert_member(&beta_handle, beta.id, "John Otieno").await;

        let rows = alpha_handle
            .fetch_all("SELECT full_name FROM members", vec![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let name: String = rows[0].try_get("full_name").unwrap();
        assert_eq!(name, "Grace Wanjiru");
    }

    // Even if two cooperatives ended up sharing a database, the
    // injected predicate alone keeps their rows apart.
    #[tokio::test]
    async fn predicate_isolates_rows_sharing_one_database() {
        let config = DatabaseConfig {
            system_url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        let pool = open_pool("sqlite:file:handle_shared?mode=memory&cache=shared", &config)
            .await
            .unwrap();
        init_tenant_schema(&pool).await.unwrap();
        let rewriter = Arc::new(QuerySafetyRewriter::new(Arc::new(
            ProtectedTableRegistry::standard(),
        )));

        let alpha = Tenant::new("shared-alpha", "Alpha", SubscriptionPlan::Starter);
        let beta = Tenant::new("shared-beta", "Beta", SubscriptionPlan::Starter);
        let alpha_handle = TenantConnection::bound(&alpha, pool.clone(), rewriter.clone());
        let beta_handle = TenantConnection::bound(&beta, pool.clone(), rewriter);

        insert_member(&alpha_handle, alpha.id, "Amina Yusuf").await;
        insert_member(&beta_handle, beta.id, "Peter Kamau").await;

        let rows = beta_handle
            .fetch_all("SELECT full_name FROM members", vec![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let name: String = rows[0].try_get("full_name").unwrap();
        assert_eq!(name, "Peter Kamau");
    }

    #[tokio::test]
    async fn unsafe_statements_are_refused() {
        let router = memory_router().await;
        let tenant = Tenant::new("handle-unsafe", "Unsafe SACCO", SubscriptionPlan::Starter);
        let handle = router.connection_for(&tenant).await.unwrap();

        let err = handle
            .fetch_all(
                "SELECT * FROM members JOIN loans ON loans.member_id = members.id",
                vec![],
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SaccoError::UnsafeQueryShape(_)));
    }

    #[tokio::test]
    async fn system_handle_reaches_system_tables() {
        let router = memory_router().await;
        let system = router.system_connection();

        let row = system
            .fetch_optional("SELECT COUNT(*) AS n FROM tenants", vec![])
            .await
            .unwrap()
            .unwrap();
        let count: i64 = row.try_get("n").unwrap();
        assert_eq!(count, 0);
    }
}
