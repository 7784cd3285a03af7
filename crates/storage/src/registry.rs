use std::collections::HashSet;

/// Tables that carry per-cooperative rows and must never be queried
/// without a tenant predicate while a tenant context is bound.
const TENANT_SCOPED_TABLES: &[&str] = &[
    "members",
    "savings_accounts",
    "savings_transactions",
    "loans",
    "loan_repayments",
    "share_accounts",
    "ledger_entries",
    "member_documents",
];

/// Static classification of table names into tenant-scoped and
/// everything else. System tables (`tenants`, `tenant_feature_usage`,
/// `subscription_plans`) are deliberately absent: statements against
/// them pass through the rewriter untouched.
#[derive(Debug, Clone)]
pub struct ProtectedTableRegistry {
    tenant_scoped: HashSet<String>,
}

impl ProtectedTableRegistry {
    /// Registry covering the standard cooperative schema.
    pub fn standard() -> Self {
        Self::with_tables(TENANT_SCOPED_TABLES.iter().copied())
    }

    pub fn with_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tenant_scoped: tables
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn is_tenant_scoped(&self, table: &str) -> bool {
        self.tenant_scoped.contains(&table.to_lowercase())
    }
}
