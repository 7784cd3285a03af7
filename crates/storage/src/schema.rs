use std::time::Duration;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use sacco_core::config::DatabaseConfig;
use sacco_core::error::{SaccoError, SaccoResult};

/// System database: tenant directory and metered usage.
pub const SYSTEM_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    plan TEXT NOT NULL,
    subscription_ends_at TEXT,
    contact_email TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tenant_feature_usage (
    tenant_id TEXT NOT NULL,
    feature_key TEXT NOT NULL,
    period_start TEXT NOT NULL,
    current_usage INTEGER NOT NULL DEFAULT 0,
    limit_value INTEGER,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, feature_key, period_start)
);
"#;

/// Per-tenant database. Every tenant-scoped table carries a tenant_id
/// column even though each cooperative gets its own database file; the
/// column is what the safety rewriter predicates against.
/// Monetary amounts are stored in minor units.
pub const TENANT_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS members (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    member_no TEXT NOT NULL,
    full_name TEXT NOT NULL,
    phone TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    joined_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_members_tenant ON members (tenant_id);

CREATE TABLE IF NOT EXISTS savings_accounts (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    member_id TEXT NOT NULL,
    account_no TEXT NOT NULL,
    balance INTEGER NOT NULL DEFAULT 0,
    opened_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_savings_accounts_tenant ON savings_accounts (tenant_id);

CREATE TABLE IF NOT EXISTS savings_transactions (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    account_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    amount INTEGER NOT NULL,
    posted_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_savings_transactions_tenant ON savings_transactions (tenant_id);

CREATE TABLE IF NOT EXISTS loans (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    member_id TEXT NOT NULL,
    principal INTEGER NOT NULL,
    interest_rate REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    disbursed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_loans_tenant ON loans (tenant_id);

CREATE TABLE IF NOT EXISTS loan_repayments (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    loan_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    paid_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_loan_repayments_tenant ON loan_repayments (tenant_id);

CREATE TABLE IF NOT EXISTS share_accounts (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    member_id TEXT NOT NULL,
    units INTEGER NOT NULL DEFAULT 0,
    unit_value INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_share_accounts_tenant ON share_accounts (tenant_id);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    account TEXT NOT NULL,
    debit INTEGER NOT NULL DEFAULT 0,
    credit INTEGER NOT NULL DEFAULT 0,
    memo TEXT,
    posted_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ledger_entries_tenant ON ledger_entries (tenant_id);

CREATE TABLE IF NOT EXISTS member_documents (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    member_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    path TEXT NOT NULL,
    uploaded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_member_documents_tenant ON member_documents (tenant_id);
"#;

pub(crate) fn storage_err(e: sqlx::Error) -> SaccoError {
    SaccoError::Storage(e.to_string())
}

/// Open a SQLite pool with bounded acquisition. In-memory databases get
/// a single pinned connection: a shared in-memory database disappears
/// with its last connection.
pub async fn open_pool(url: &str, config: &DatabaseConfig) -> SaccoResult<SqlitePool> {
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    let mut options = SqlitePoolOptions::new()
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms));
    if in_memory {
        options = options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        options = options.max_connections(config.max_connections);
    }
    options.connect(url).await.map_err(storage_err)
}

pub async fn init_system_schema(pool: &SqlitePool) -> SaccoResult<()> {
    sqlx::raw_sql(SYSTEM_SCHEMA_SQL)
        .execute(pool)
        .await
        .map_err(storage_err)?;
    Ok(())
}

pub async fn init_tenant_schema(pool: &SqlitePool) -> SaccoResult<()> {
    sqlx::raw_sql(TENANT_SCHEMA_SQL)
        .execute(pool)
        .await
        .map_err(storage_err)?;
    Ok(())
}
