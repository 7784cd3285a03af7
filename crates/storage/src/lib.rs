pub mod handle;
pub mod registry;
pub mod rewriter;
pub mod router;
pub mod schema;
pub mod sql_store;
pub mod store;
pub mod value;

pub use handle::TenantConnection;
pub use registry::ProtectedTableRegistry;
pub use rewriter::{GuardedQuery, QuerySafetyRewriter, RewriteDecision};
pub use router::ConnectionRouter;
pub use schema::{init_system_schema, init_tenant_schema, open_pool};
pub use sql_store::SqliteSystemStore;
pub use store::{demo_tenants, FeatureUsageRecord, MemorySystemStore, TenantStore, UsageStore};
pub use value::SqlValue;

// Row access for consumers of TenantConnection results.
pub use sqlx::sqlite::SqliteRow;
pub use sqlx::Row;
