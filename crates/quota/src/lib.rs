pub mod notify;
pub mod plans;
pub mod tracker;

pub use notify::{
    capture_notifier, log_notifier, noop_notifier, CaptureNotifier, LogNotifier, NoOpNotifier,
    QuotaDenial, QuotaNotifier,
};
pub use plans::PlanLimits;
pub use tracker::{AccessDecision, FeatureUsage, ResourceQuotaTracker, UsagePermit};
