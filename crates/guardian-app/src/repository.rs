//! Configuration & event store seam
//!
//! The pipeline reads policies, appends audit records and registers push
//! tokens through [`EventRepository`]. [`MemoryRepository`] backs the headless
//! binary and the tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use guardian_core::prelude::*;
use guardian_core::{DeliveryAttempt, FallEvent};

use crate::policy::EscalationPolicy;

/// One escalation as written to the event history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event: FallEvent,
    pub attempts: Vec<DeliveryAttempt>,
    pub recorded_at: DateTime<Utc>,
}

/// Durable settings and event history
#[trait_variant::make(EventRepository: Send)]
pub trait LocalEventRepository {
    /// Current policy snapshot for a user
    async fn load_policy(&self, user_id: &str) -> Result<EscalationPolicy>;

    /// Append an escalation to the event history
    async fn append_audit_record(&self, event: &FallEvent, attempts: &[DeliveryAttempt])
        -> Result<()>;

    /// Remember the push token this device receives relays on
    async fn register_notification_token(&self, user_id: &str, token: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    policies: HashMap<String, EscalationPolicy>,
    default_policy: EscalationPolicy,
    audit: Vec<AuditRecord>,
    tokens: HashMap<String, Vec<String>>,
    fail_policy_loads: bool,
    stall_policy_loads: bool,
    audit_failures_remaining: u32,
}

/// In-memory repository
///
/// Clones share state. Failure injection lets callers exercise the storage
/// error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `policy` for users without their own
    pub fn with_default_policy(policy: EscalationPolicy) -> Self {
        let repo = Self::new();
        repo.lock().default_policy = policy;
        repo
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_policy(&self, user_id: &str, policy: EscalationPolicy) {
        self.lock().policies.insert(user_id.to_string(), policy);
    }

    /// Make every `load_policy` fail until turned off
    pub fn fail_policy_loads(&self, fail: bool) {
        self.lock().fail_policy_loads = fail;
    }

    /// Make every `load_policy` hang until turned off
    pub fn stall_policy_loads(&self, stall: bool) {
        self.lock().stall_policy_loads = stall;
    }

    /// Make the next `count` audit writes fail
    pub fn fail_next_audit_writes(&self, count: u32) {
        self.lock().audit_failures_remaining = count;
    }

    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.lock().audit.clone()
    }

    pub fn tokens(&self, user_id: &str) -> Vec<String> {
        self.lock().tokens.get(user_id).cloned().unwrap_or_default()
    }
}

impl EventRepository for MemoryRepository {
    async fn load_policy(&self, user_id: &str) -> Result<EscalationPolicy> {
        let stalled = self.lock().stall_policy_loads;
        if stalled {
            std::future::pending::<()>().await;
        }
        let state = self.lock();
        if state.fail_policy_loads {
            return Err(Error::storage("policy store unavailable"));
        }
        Ok(state
            .policies
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| state.default_policy.clone()))
    }

    async fn append_audit_record(
        &self,
        event: &FallEvent,
        attempts: &[DeliveryAttempt],
    ) -> Result<()> {
        let mut state = self.lock();
        if state.audit_failures_remaining > 0 {
            state.audit_failures_remaining -= 1;
            return Err(Error::storage("event history unavailable"));
        }
        state.audit.push(AuditRecord {
            event: event.clone(),
            attempts: attempts.to_vec(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn register_notification_token(&self, user_id: &str, token: &str) -> Result<()> {
        let mut state = self.lock();
        let tokens = state.tokens.entry(user_id.to_string()).or_default();
        if !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{EventRepository, MemoryRepository};
    use crate::policy::EscalationPolicy;
    use crate::test_utils::test_event;
    use guardian_core::prelude::*;
    use guardian_core::{Channel, DeliveryAttempt, DeliveryStatus};

    #[tokio::test]
    async fn test_policy_per_user_with_default() {
        let repo = MemoryRepository::with_default_policy(EscalationPolicy {
            call_enabled: false,
            ..Default::default()
        });
        repo.set_policy(
            "grandma",
            EscalationPolicy {
                sms_enabled: false,
                ..Default::default()
            },
        );

        assert!(!repo.load_policy("grandma").await.unwrap().sms_enabled);
        assert!(!repo.load_policy("someone").await.unwrap().call_enabled);
    }

    #[tokio::test]
    async fn test_policy_load_failure() {
        let repo = MemoryRepository::new();
        repo.fail_policy_loads(true);
        let err = repo.load_policy("local").await.unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_policy_load_hangs() {
        let repo = MemoryRepository::new();
        repo.stall_policy_loads(true);
        let load = tokio::time::timeout(Duration::from_secs(60), repo.load_policy("local")).await;
        assert!(load.is_err());

        repo.stall_policy_loads(false);
        assert!(repo.load_policy("local").await.is_ok());
    }

    #[tokio::test]
    async fn test_audit_failure_injection() {
        let repo = MemoryRepository::new();
        let event = test_event();
        let mut attempt = DeliveryAttempt::pending(event.id.clone(), Channel::Sms);
        attempt.finish(DeliveryStatus::Succeeded);

        repo.fail_next_audit_writes(1);
        assert!(repo.append_audit_record(&event, &[attempt.clone()]).await.is_err());
        assert!(repo.append_audit_record(&event, &[attempt]).await.is_ok());

        let records = repo.audit_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.id, event.id);
        assert_eq!(records[0].attempts[0].status, DeliveryStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_register_token_is_idempotent() {
        let repo = MemoryRepository::new();
        repo.register_notification_token("local", "tok-1").await.unwrap();
        repo.register_notification_token("local", "tok-1").await.unwrap();
        repo.register_notification_token("local", "tok-2").await.unwrap();
        assert_eq!(repo.tokens("local"), vec!["tok-1", "tok-2"]);
        assert!(repo.tokens("other").is_empty());
    }
}
