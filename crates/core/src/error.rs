use chrono::{DateTime, Utc};
use thiserror::Error;

pub type SaccoResult<T> = Result<T, SaccoError>;

#[derive(Error, Debug)]
pub enum SaccoError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Tenant '{slug}' is {status}")]
    TenantInactive { slug: String, status: String },

    #[error("Subscription for tenant '{slug}' expired on {ended_at}")]
    SubscriptionExpired {
        slug: String,
        ended_at: DateTime<Utc>,
    },

    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    #[error("Context switch denied: {0}")]
    UnauthorizedContextSwitch(String),

    #[error("Connection acquisition failed for tenant '{slug}': {reason}")]
    ConnectionAcquisitionFailed { slug: String, reason: String },

    #[error("Quota exceeded for {feature}: {current} of {limit}")]
    QuotaExceeded {
        feature: String,
        current: u64,
        limit: u64,
    },

    #[error("Unsafe query shape: {0}")]
    UnsafeQueryShape(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SaccoError {
    /// Stable machine-readable code carried on the wire and in audit
    /// records. Messages may be localized; codes never change.
    pub fn error_code(&self) -> &'static str {
        match self {
            SaccoError::Config(_) => "config_error",
            SaccoError::TenantNotFound(_) => "tenant_not_found",
            SaccoError::TenantInactive { .. } => "tenant_inactive",
            SaccoError::SubscriptionExpired { .. } => "subscription_expired",
            SaccoError::SessionInvalid(_) => "session_invalid",
            SaccoError::UnauthorizedContextSwitch(_) => "context_switch_denied",
            SaccoError::ConnectionAcquisitionFailed { .. } => "connection_failed",
            SaccoError::QuotaExceeded { .. } => "quota_exceeded",
            SaccoError::UnsafeQueryShape(_) => "unsafe_query_shape",
            SaccoError::Storage(_) => "storage_error",
            SaccoError::Serialization(_) => "serialization_error",
            SaccoError::Io(_) => "io_error",
            SaccoError::Internal(_) => "internal_error",
        }
    }
}
