use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use sacco_core::types::FeatureKey;

/// Denial event handed to the notifier when a quota check refuses
/// access.
#[derive(Debug, Clone)]
pub struct QuotaDenial {
    pub tenant_id: Uuid,
    pub slug: String,
    pub contact_email: Option<String>,
    pub feature: FeatureKey,
    pub current: u64,
    pub limit: u64,
    pub at: DateTime<Utc>,
}

/// Receives quota denials. Delivery is best-effort and must not block:
/// heavy transports (mail, webhooks) belong behind an internal queue.
/// A failed notification never fails the originating request.
pub trait QuotaNotifier: Send + Sync {
    fn notify(&self, denial: &QuotaDenial);
}

/// Default notifier: one structured log line per denial.
pub struct LogNotifier;

impl QuotaNotifier for LogNotifier {
    fn notify(&self, denial: &QuotaDenial) {
        warn!(
            tenant_id = %denial.tenant_id,
            slug = %denial.slug,
            feature = %denial.feature,
            current = denial.current,
            limit = denial.limit,
            "Quota denial notification"
        );
    }
}

/// Notifier that drops everything.
pub struct NoOpNotifier;

impl QuotaNotifier for NoOpNotifier {
    fn notify(&self, _denial: &QuotaDenial) {}
}

/// Captures denials for inspection in tests.
#[derive(Default)]
pub struct CaptureNotifier {
    denials: Mutex<Vec<QuotaDenial>>,
}

impl CaptureNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denials(&self) -> Vec<QuotaDenial> {
        self.denials.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.denials.lock().len()
    }
}

impl QuotaNotifier for CaptureNotifier {
    fn notify(&self, denial: &QuotaDenial) {
        self.denials.lock().push(denial.clone());
    }
}

pub fn log_notifier() -> Arc<dyn QuotaNotifier> {
    Arc::new(LogNotifier)
}

pub fn noop_notifier() -> Arc<dyn QuotaNotifier> {
    Arc::new(NoOpNotifier)
}

pub fn capture_notifier() -> Arc<CaptureNotifier> {
    Arc::new(CaptureNotifier::new())
}
