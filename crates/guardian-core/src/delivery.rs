//! Notification channels and per-channel delivery bookkeeping

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventId;

/// A notification channel an escalation can fan out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Sms,
    Call,
    Push,
}

impl Channel {
    /// Dispatch order. In-app always goes first.
    pub const ALL: [Channel; 4] = [Channel::InApp, Channel::Sms, Channel::Call, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::InApp => "in_app",
            Channel::Sms => "sms",
            Channel::Call => "call",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a [`DeliveryAttempt`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Succeeded => write!(f, "succeeded"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a channel driver reports back for a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Succeeded,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Succeeded)
    }
}

/// One record per (event, channel).
///
/// Status only moves forward: `Pending` to exactly one terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub event_id: EventId,
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn pending(event_id: EventId, channel: Channel) -> Self {
        Self {
            event_id,
            channel,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Count one driver call and remember its failure reason, if any.
    ///
    /// Does not change the status; the dispatch decides when it is done.
    pub fn record(&mut self, outcome: &DeliveryOutcome) {
        self.attempt_count += 1;
        if let DeliveryOutcome::Failed(reason) = outcome {
            self.last_error = Some(reason.clone());
        }
        self.updated_at = Utc::now();
    }

    /// Move to a terminal status. Returns false if already terminal.
    pub fn finish(&mut self, status: DeliveryStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> DeliveryAttempt {
        DeliveryAttempt::pending(EventId::from("manual:fall:unknown:0"), Channel::Sms)
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(Channel::InApp.to_string(), "in_app");
        assert_eq!(Channel::Sms.to_string(), "sms");
        assert_eq!(Channel::ALL[0], Channel::InApp);
    }

    #[test]
    fn test_pending_is_not_terminal() {
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(DeliveryStatus::Succeeded.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(DeliveryStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_record_failure_keeps_pending() {
        let mut a = attempt();
        a.record(&DeliveryOutcome::failed("gateway timeout"));
        assert_eq!(a.attempt_count, 1);
        assert_eq!(a.status, DeliveryStatus::Pending);
        assert_eq!(a.last_error.as_deref(), Some("gateway timeout"));

        a.record(&DeliveryOutcome::Succeeded);
        assert_eq!(a.attempt_count, 2);
        assert_eq!(a.last_error.as_deref(), Some("gateway timeout"));
    }

    #[test]
    fn test_finish_only_once() {
        let mut a = attempt();
        assert!(a.finish(DeliveryStatus::Succeeded));
        assert!(!a.finish(DeliveryStatus::Cancelled));
        assert_eq!(a.status, DeliveryStatus::Succeeded);
    }

    #[test]
    fn test_finish_rejects_pending() {
        let mut a = attempt();
        assert!(!a.finish(DeliveryStatus::Pending));
        assert!(!a.is_terminal());
    }
}
