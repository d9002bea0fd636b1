//! Device, link and check-in types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder shown for devices that report no name
pub const UNNAMED_DEVICE: &str = "Unnamed Device";

/// A paired wearable as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceIdentity {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(UNNAMED_DEVICE)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}

/// Link Manager state machine.
///
/// ```text
/// Disconnected -> Scanning -> Connecting -> Connected -> Reconnecting -> Disconnected
///                                  \            \
///                                   +-> Error <--+  (always resolves to Disconnected)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
    Error {
        reason: String,
    },
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, LinkState::Disconnected)
    }

    /// States from which `connect` may start
    pub fn can_connect(&self) -> bool {
        matches!(self, LinkState::Disconnected | LinkState::Scanning)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Scanning => "scanning",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Reconnecting { .. } => "reconnecting",
            LinkState::Error { .. } => "error",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of the single device session owned by the Link Manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSession {
    pub device: DeviceIdentity,
    pub state: LinkState,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub reconnect_attempt: u32,
}

impl DeviceSession {
    pub fn new(device: DeviceIdentity) -> Self {
        Self {
            device,
            state: LinkState::Disconnected,
            last_seen_at: None,
            reconnect_attempt: 0,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Check-in
// ─────────────────────────────────────────────────────────

/// An outstanding "are you okay" prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInSession {
    pub id: u64,
    pub issued_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// How a check-in was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInOutcome {
    /// The wearable sent `CHECK_IN_ACK`
    Acknowledged,
    /// The in-app prompt was dismissed
    Dismissed,
    /// Nothing arrived before the timeout
    Unacknowledged,
}

impl fmt::Display for CheckInOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckInOutcome::Acknowledged => write!(f, "acknowledged"),
            CheckInOutcome::Dismissed => write!(f, "dismissed"),
            CheckInOutcome::Unacknowledged => write!(f, "unacknowledged"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let named = DeviceIdentity::new("00:11:22:33:44:55", Some("Guardian Watch".into()));
        assert_eq!(named.display_name(), "Guardian Watch");

        let unnamed = DeviceIdentity::new("00:11:22:33:44:55", None);
        assert_eq!(unnamed.display_name(), UNNAMED_DEVICE);

        let empty = DeviceIdentity::new("00:11:22:33:44:55", Some(String::new()));
        assert_eq!(empty.to_string(), "Unnamed Device (00:11:22:33:44:55)");
    }

    #[test]
    fn test_link_state_can_connect() {
        assert!(LinkState::Disconnected.can_connect());
        assert!(LinkState::Scanning.can_connect());
        assert!(!LinkState::Connecting.can_connect());
        assert!(!LinkState::Connected.can_connect());
        assert!(!LinkState::Reconnecting { attempt: 1 }.can_connect());
    }

    #[test]
    fn test_link_state_serializes_tagged() {
        let json = serde_json::to_string(&LinkState::Reconnecting { attempt: 3 }).unwrap();
        assert_eq!(json, r#"{"state":"reconnecting","attempt":3}"#);
        assert_eq!(LinkState::default(), LinkState::Disconnected);
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = DeviceSession::new(DeviceIdentity::new("aa", None));
        assert!(session.state.is_disconnected());
        assert_eq!(session.reconnect_attempt, 0);
        assert!(session.last_seen_at.is_none());
    }
}
