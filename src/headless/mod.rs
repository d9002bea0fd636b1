//! Headless mode - JSON event output and stdin control
//!
//! Fall Guardian has no UI of its own. The binary reads one command per line
//! on stdin and writes structured JSON events to stdout, so a front end (or a
//! test script) can drive the pipeline and render alerts.
//!
//! # Event Format
//!
//! Events are output as NDJSON (newline-delimited JSON), one event per line.
//! Each event has an "event" field indicating its type, along with
//! event-specific data.
//!
//! # Example Output
//!
//! ```json
//! {"event":"link_state","state":"connected","timestamp":1704700001000}
//! {"event":"fall_event","event_id":"direct_link:fall:40000,-73000:28411666","kind":"fall","source":"direct_link","location":"40.0,-73.0","timestamp":1704700002000}
//! {"event":"sms_sent","event_id":"direct_link:fall:40000,-73000:28411666","to":["+15551234567"],"body":"EMERGENCY: Fall detected! Location: 40.0,-73.0.","timestamp":1704700002010}
//! ```

pub mod drivers;
pub mod runner;

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::error;

use guardian_app::{AlertNotice, CheckInReport, EscalationReport, GuardianEvent};
use guardian_core::{DeliveryAttempt, DeviceIdentity, FallEvent, LinkState};

/// Per-channel result inside [`HeadlessEvent::EscalationFinished`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSummary {
    pub channel: String,
    pub status: String,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&DeliveryAttempt> for AttemptSummary {
    fn from(attempt: &DeliveryAttempt) -> Self {
        Self {
            channel: attempt.channel.to_string(),
            status: format!("{:?}", attempt.status).to_lowercase(),
            attempt_count: attempt.attempt_count,
            last_error: attempt.last_error.clone(),
        }
    }
}

/// Events emitted in headless mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Link state machine moved
    LinkState {
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        timestamp: i64,
    },

    /// Link failure surfaced as a status
    LinkFailure { message: String, timestamp: i64 },

    /// A paired device
    DeviceDetected {
        address: String,
        name: String,
        timestamp: i64,
    },

    /// An input became a canonical event
    FallEvent {
        event_id: String,
        kind: String,
        source: String,
        location: String,
        timestamp: i64,
    },

    EscalationSuppressed { event_id: String, timestamp: i64 },

    EscalationStarted {
        event_id: String,
        channels: Vec<String>,
        timestamp: i64,
    },

    EscalationFinished {
        event_id: String,
        attempts: Vec<AttemptSummary>,
        audit_written: bool,
        timestamp: i64,
    },

    /// In-app alert to show
    Alert {
        event_id: String,
        title: String,
        message: String,
        location: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        map_url: Option<String>,
        timestamp: i64,
    },

    SmsSent {
        event_id: String,
        to: Vec<String>,
        body: String,
        timestamp: i64,
    },

    CallPlaced {
        event_id: String,
        to: String,
        timestamp: i64,
    },

    PushSent {
        event_id: String,
        message: String,
        timestamp: i64,
    },

    AlertDismissed {
        event_ids: Vec<String>,
        timestamp: i64,
    },

    CheckInIssued { session_id: u64, timestamp: i64 },

    CheckInClosed {
        session_id: u64,
        outcome: String,
        timestamp: i64,
    },

    PolicyFallback { reason: String, timestamp: i64 },

    TokenRegistered { token: String, timestamp: i64 },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },

    Shutdown { timestamp: i64 },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        // NDJSON: one event per line, flushed immediately
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }
        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    /// Current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn link_state(state: &LinkState) -> Self {
        let detail = match state {
            LinkState::Reconnecting { attempt } => Some(format!("attempt {}", attempt)),
            LinkState::Error { reason } => Some(reason.clone()),
            _ => None,
        };
        Self::LinkState {
            state: state.name().to_string(),
            detail,
            timestamp: Self::now(),
        }
    }

    pub fn device_detected(device: &DeviceIdentity) -> Self {
        Self::DeviceDetected {
            address: device.address.clone(),
            name: device.display_name().to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn fall_event(event: &FallEvent) -> Self {
        Self::FallEvent {
            event_id: event.id.to_string(),
            kind: event.kind.to_string(),
            source: event.source.to_string(),
            location: event.location_text(),
            timestamp: Self::now(),
        }
    }

    pub fn escalation_finished(report: &EscalationReport) -> Self {
        Self::EscalationFinished {
            event_id: report.event_id.to_string(),
            attempts: report.attempts.iter().map(AttemptSummary::from).collect(),
            audit_written: report.audit_written,
            timestamp: Self::now(),
        }
    }

    pub fn alert(notice: AlertNotice) -> Self {
        Self::Alert {
            event_id: notice.event_id.to_string(),
            title: notice.title,
            message: notice.message,
            location: notice.location,
            map_url: notice.map_url,
            timestamp: Self::now(),
        }
    }

    pub fn sms_sent(event: &FallEvent, to: Vec<String>, body: String) -> Self {
        Self::SmsSent {
            event_id: event.id.to_string(),
            to,
            body,
            timestamp: Self::now(),
        }
    }

    pub fn call_placed(event: &FallEvent, to: String) -> Self {
        Self::CallPlaced {
            event_id: event.id.to_string(),
            to,
            timestamp: Self::now(),
        }
    }

    pub fn push_sent(event: &FallEvent, message: String) -> Self {
        Self::PushSent {
            event_id: event.id.to_string(),
            message,
            timestamp: Self::now(),
        }
    }

    pub fn check_in_closed(report: &CheckInReport) -> Self {
        Self::CheckInClosed {
            session_id: report.session.id,
            outcome: report.outcome.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn error(message: impl Into<String>, fatal: bool) -> Self {
        Self::Error {
            message: message.into(),
            fatal,
            timestamp: Self::now(),
        }
    }
}

impl From<&GuardianEvent> for HeadlessEvent {
    fn from(event: &GuardianEvent) -> Self {
        let timestamp = Self::now();
        match event {
            GuardianEvent::LinkStateChanged(state) => Self::link_state(state),
            GuardianEvent::LinkFailure { message } => Self::LinkFailure {
                message: message.clone(),
                timestamp,
            },
            GuardianEvent::EventNormalized(event) => Self::fall_event(event),
            GuardianEvent::EscalationSuppressed { event_id } => Self::EscalationSuppressed {
                event_id: event_id.to_string(),
                timestamp,
            },
            GuardianEvent::EscalationStarted { event_id, channels } => Self::EscalationStarted {
                event_id: event_id.to_string(),
                channels: channels.iter().map(|c| c.to_string()).collect(),
                timestamp,
            },
            GuardianEvent::EscalationFinished(report) => Self::escalation_finished(report),
            GuardianEvent::AlertDismissed { event_ids } => Self::AlertDismissed {
                event_ids: event_ids.iter().map(|id| id.to_string()).collect(),
                timestamp,
            },
            GuardianEvent::PolicyFallback { reason } => Self::PolicyFallback {
                reason: reason.clone(),
                timestamp,
            },
            GuardianEvent::CheckInIssued(session) => Self::CheckInIssued {
                session_id: session.id,
                timestamp,
            },
            GuardianEvent::CheckInClosed(report) => Self::check_in_closed(report),
            GuardianEvent::TokenRegistered { token } => Self::TokenRegistered {
                token: token.clone(),
                timestamp,
            },
            GuardianEvent::Shutdown => Self::Shutdown { timestamp },
        }
    }
}

/// Where headless events go
#[derive(Debug, Clone)]
pub enum EventSink {
    Stdout,
    /// Collected by a test
    Channel(mpsc::UnboundedSender<HeadlessEvent>),
}

impl EventSink {
    pub fn emit(&self, event: HeadlessEvent) {
        match self {
            EventSink::Stdout => event.emit(),
            EventSink::Channel(tx) => {
                let _ = tx.send(event);
            }
        }
    }

    /// A sink that collects events, and the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HeadlessEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::Channel(tx), rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_core::{Coordinates, EventKind, EventSource, Location};
    use std::time::Duration;

    fn to_json(event: &HeadlessEvent) -> String {
        serde_json::to_string(event).expect("serialization failed")
    }

    fn fall() -> FallEvent {
        FallEvent::new(
            EventKind::Fall,
            EventSource::DirectLink,
            Location::from(Coordinates::new(40.0, -73.0)),
            chrono::DateTime::from_timestamp(1_704_700_000, 0).unwrap(),
            Duration::from_secs(60),
        )
    }

    /// JSON with the trailing timestamp replaced
    fn redacted(event: &HeadlessEvent) -> String {
        let json = to_json(event);
        match json.rfind(r#","timestamp":"#) {
            Some(at) => format!(r#"{},"timestamp":"[ts]"}}"#, &json[..at]),
            None => json,
        }
    }

    #[test]
    fn test_link_state_serialization() {
        insta::assert_snapshot!(
            redacted(&HeadlessEvent::link_state(&LinkState::Connected)),
            @r#"{"event":"link_state","state":"connected","timestamp":"[ts]"}"#
        );
        insta::assert_snapshot!(
            redacted(&HeadlessEvent::link_state(&LinkState::Reconnecting { attempt: 3 })),
            @r#"{"event":"link_state","state":"reconnecting","detail":"attempt 3","timestamp":"[ts]"}"#
        );
    }

    #[test]
    fn test_fall_event_serialization() {
        insta::assert_snapshot!(
            redacted(&HeadlessEvent::fall_event(&fall())),
            @r#"{"event":"fall_event","event_id":"direct_link:fall:40000,-73000:28411666","kind":"fall","source":"direct_link","location":"40.0,-73.0","timestamp":"[ts]"}"#
        );
    }

    #[test]
    fn test_alert_serialization() {
        insta::assert_snapshot!(
            redacted(&HeadlessEvent::alert(AlertNotice::for_event(&fall()))),
            @r#"{"event":"alert","event_id":"direct_link:fall:40000,-73000:28411666","title":"Fall detected","message":"Fall detected! Location: 40.0,-73.0","location":"40.0,-73.0","map_url":"https://www.google.com/maps/search/?api=1&query=40.0,-73.0","timestamp":"[ts]"}"#
        );
    }

    #[test]
    fn test_error_serialization() {
        let json = to_json(&HeadlessEvent::error("Connection failed", true));
        let value: serde_json::Value = serde_json::from_str(&json).expect("invalid JSON");

        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "Connection failed");
        assert_eq!(value["fatal"], true);
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_escalation_finished_serialization() {
        let event = fall();
        let mut sms = DeliveryAttempt::pending(event.id.clone(), guardian_core::Channel::Sms);
        sms.record(&guardian_core::DeliveryOutcome::failed("no SMS recipients configured"));
        sms.finish(guardian_core::DeliveryStatus::Failed);
        let report = EscalationReport {
            event_id: event.id.clone(),
            attempts: vec![sms],
            audit_written: true,
        };

        insta::assert_snapshot!(
            redacted(&HeadlessEvent::escalation_finished(&report)),
            @r#"{"event":"escalation_finished","event_id":"direct_link:fall:40000,-73000:28411666","attempts":[{"channel":"sms","status":"failed","attempt_count":1,"last_error":"no SMS recipients configured"}],"audit_written":true,"timestamp":"[ts]"}"#
        );
    }

    #[test]
    fn test_guardian_event_conversion() {
        let event = HeadlessEvent::from(&GuardianEvent::Shutdown);
        assert!(matches!(event, HeadlessEvent::Shutdown { .. }));

        let event = HeadlessEvent::from(&GuardianEvent::LinkFailure {
            message: "Link to device lost".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&to_json(&event)).unwrap();
        assert_eq!(value["event"], "link_failure");
        assert_eq!(value["message"], "Link to device lost");
    }

    #[tokio::test]
    async fn test_channel_sink_collects() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(HeadlessEvent::error("boom", false));
        assert!(matches!(
            rx.recv().await.unwrap(),
            HeadlessEvent::Error { fatal: false, .. }
        ));
    }
}
