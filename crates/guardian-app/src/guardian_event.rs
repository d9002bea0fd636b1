//! Events emitted by the [`Guardian`](crate::Guardian) for external consumers
//!
//! The headless surface subscribes via `Guardian::subscribe()` and renders
//! each event as one JSON line.

use guardian_core::{Channel, CheckInSession, EventId, FallEvent, LinkState};

use crate::checkin::CheckInReport;
use crate::escalation::EscalationReport;

/// Pipeline events, broadcast in the order they happen.
#[derive(Debug, Clone)]
pub enum GuardianEvent {
    // ─────────────────────────────────────────────────────────
    // Link
    // ─────────────────────────────────────────────────────────
    /// The link state machine moved
    LinkStateChanged(LinkState),

    /// A link failure surfaced as a non-blocking status
    LinkFailure { message: String },

    // ─────────────────────────────────────────────────────────
    // Escalation
    // ─────────────────────────────────────────────────────────
    /// An input was normalized into a canonical event
    EventNormalized(FallEvent),

    /// The event repeated one already being handled
    EscalationSuppressed { event_id: EventId },

    /// Channel attempts were registered and dispatch started
    EscalationStarted {
        event_id: EventId,
        channels: Vec<Channel>,
    },

    /// Every channel reached a terminal status
    EscalationFinished(EscalationReport),

    /// Pending retries were cancelled by an in-app dismissal
    AlertDismissed { event_ids: Vec<EventId> },

    /// The policy could not be loaded; a fallback was used
    PolicyFallback { reason: String },

    // ─────────────────────────────────────────────────────────
    // Check-in
    // ─────────────────────────────────────────────────────────
    CheckInIssued(CheckInSession),
    CheckInClosed(CheckInReport),

    // ─────────────────────────────────────────────────────────
    // Misc
    // ─────────────────────────────────────────────────────────
    TokenRegistered { token: String },

    /// The pipeline is shutting down
    Shutdown,
}

impl GuardianEvent {
    /// Short label for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LinkStateChanged(_) => "link_state",
            Self::LinkFailure { .. } => "link_failure",
            Self::EventNormalized(_) => "event_normalized",
            Self::EscalationSuppressed { .. } => "escalation_suppressed",
            Self::EscalationStarted { .. } => "escalation_started",
            Self::EscalationFinished(_) => "escalation_finished",
            Self::AlertDismissed { .. } => "alert_dismissed",
            Self::PolicyFallback { .. } => "policy_fallback",
            Self::CheckInIssued(_) => "check_in_issued",
            Self::CheckInClosed(_) => "check_in_closed",
            Self::TokenRegistered { .. } => "token_registered",
            Self::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types_are_snake_case() {
        let events = [
            GuardianEvent::LinkStateChanged(LinkState::Connected),
            GuardianEvent::LinkFailure {
                message: "gone".into(),
            },
            GuardianEvent::EscalationSuppressed {
                event_id: EventId::from("a"),
            },
            GuardianEvent::Shutdown,
        ];
        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                "link_state",
                "link_failure",
                "escalation_suppressed",
                "shutdown"
            ]
        );
    }
}
