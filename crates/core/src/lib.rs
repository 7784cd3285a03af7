pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{SaccoError, SaccoResult};
pub use types::{
    FeatureKey, Permission, Role, Session, SubscriptionPlan, Tenant, TenantStatus,
};
