pub mod audit;
pub mod context;
pub mod directory;
pub mod orchestrator;
pub mod resolver;
pub mod security;

pub use audit::{ChainVerification, ContextAction, ContextAuditEvent, ContextAuditTrail};
pub use context::{ContextMode, ContextView, RequestContext, TenantBinding};
pub use directory::TenantDirectory;
pub use orchestrator::ContextOrchestrator;
pub use resolver::{HostResolution, TenantResolver};
pub use security::{validate_session, SecurityFlags};
