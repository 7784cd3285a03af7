use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::security::SecurityFlags;

/// Context-lifecycle actions recorded in the trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextAction {
    Resolving,
    BoundTenant,
    BoundSystem,
    Rejected,
    Switched,
    SwitchDenied,
    Cleared,
}

impl ContextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextAction::Resolving => "context.resolving",
            ContextAction::BoundTenant => "context.bound_tenant",
            ContextAction::BoundSystem => "context.bound_system",
            ContextAction::Rejected => "context.rejected",
            ContextAction::Switched => "context.switched",
            ContextAction::SwitchDenied => "context.switch_denied",
            ContextAction::Cleared => "context.cleared",
        }
    }
}

/// One audit record. `event_hash` covers the previous event's hash, so
/// rewriting history breaks verification from that point on.
#[derive(Debug, Clone, Serialize)]
pub struct ContextAuditEvent {
    pub id: Uuid,
    pub sequence: u64,
    pub action: ContextAction,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub correlation_id: Uuid,
    pub detail: String,
    pub security: Option<SecurityFlags>,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub event_hash: String,
}

struct ChainHead {
    sequence: u64,
    last_hash: String,
}

/// Append-only, hash-chained record of context transitions. Held in
/// memory; a deployment that needs durable audit ships these rows to
/// the system database or a log pipeline.
pub struct ContextAuditTrail {
    events: DashMap<u64, ContextAuditEvent>,
    head: Mutex<ChainHead>,
}

impl ContextAuditTrail {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            head: Mutex::new(ChainHead {
                sequence: 0,
                last_hash: "genesis".to_string(),
            }),
        }
    }

    pub fn record(
        &self,
        action: ContextAction,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        correlation_id: Uuid,
        detail: impl Into<String>,
        security: Option<SecurityFlags>,
    ) -> ContextAuditEvent {
        let timestamp = Utc::now();
        let mut head = self.head.lock();
        head.sequence += 1;
        let sequence = head.sequence;
        let event_hash = chain_hash(
            sequence,
            action,
            user_id,
            tenant_id,
            correlation_id,
            timestamp,
            &head.last_hash,
        );
        let event = ContextAuditEvent {
            id: Uuid::new_v4(),
            sequence,
            action,
            user_id,
            tenant_id,
            correlation_id,
            detail: detail.into(),
            security,
            timestamp,
            previous_hash: std::mem::replace(&mut head.last_hash, event_hash.clone()),
            event_hash,
        };
        drop(head);
        self.events.insert(sequence, event.clone());
        event
    }

    /// Walk the chain from the genesis hash and recompute every link.
    pub fn verify_chain(&self) -> ChainVerification {
        let total = self.head.lock().sequence;
        let mut previous = "genesis".to_string();
        for sequence in 1..=total {
            let Some(event) = self.events.get(&sequence) else {
                return ChainVerification::broken(sequence, "event missing from trail");
            };
            if event.previous_hash != previous {
                return ChainVerification::broken(sequence, "previous hash mismatch");
            }
            let expected = chain_hash(
                event.sequence,
                event.action,
                event.user_id,
                event.tenant_id,
                event.correlation_id,
                event.timestamp,
                &event.previous_hash,
            );
            if expected != event.event_hash {
                return ChainVerification::broken(sequence, "event hash mismatch");
            }
            previous = event.event_hash.clone();
        }
        ChainVerification {
            valid: true,
            checked: total,
            broken_at: None,
            reason: None,
        }
    }

    /// Every event for one request, in recording order.
    pub fn for_correlation(&self, correlation_id: Uuid) -> Vec<ContextAuditEvent> {
        let mut events: Vec<_> = self
            .events
            .iter()
            .filter(|entry| entry.value().correlation_id == correlation_id)
            .map(|entry| entry.value().clone())
            .collect();
        events.sort_by_key(|e| e.sequence);
        events
    }

    pub fn for_tenant(&self, tenant_id: Uuid) -> Vec<ContextAuditEvent> {
        let mut events: Vec<_> = self
            .events
            .iter()
            .filter(|entry| entry.value().tenant_id == Some(tenant_id))
            .map(|entry| entry.value().clone())
            .collect();
        events.sort_by_key(|e| e.sequence);
        events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for ContextAuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a full chain walk.
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub checked: u64,
    pub broken_at: Option<u64>,
    pub reason: Option<String>,
}

impl ChainVerification {
    fn broken(sequence: u64, reason: &str) -> Self {
        Self {
            valid: false,
            checked: sequence.saturating_sub(1),
            broken_at: Some(sequence),
            reason: Some(reason.to_string()),
        }
    }
}

fn chain_hash(
    sequence: u64,
    action: ContextAction,
    user_id: Uuid,
    tenant_id: Option<Uuid>,
    correlation_id: Uuid,
    timestamp: DateTime<Utc>,
    previous_hash: &str,
) -> String {
    let tenant = tenant_id.map(|t| t.to_string()).unwrap_or_default();
    let payload = format!(
        "{}:{}:{}:{}:{}:{}:{}",
        sequence,
        action.as_str(),
        user_id,
        tenant,
        correlation_id,
        timestamp.to_rfc3339(),
        previous_hash
    );
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
