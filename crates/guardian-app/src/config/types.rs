//! Configuration types for Fall Guardian
//!
//! Defines:
//! - `Settings` - Everything read from `.guardian/config.toml`
//! - Per-section settings with serde defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use guardian_core::{Coordinates, DeviceIdentity};
use guardian_link::{LinkConfig, SerialDevice};

use crate::engine::GuardianConfig;
use crate::escalation::EscalationConfig;
use crate::policy::EscalationPolicy;

/// Application settings from `.guardian/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub link: LinkSettings,

    #[serde(default)]
    pub escalation: EscalationSettings,

    #[serde(default)]
    pub check_in: CheckInSettings,

    #[serde(default)]
    pub user: UserSettings,

    #[serde(default)]
    pub location: LocationSettings,

    /// Paired serial devices for the RFCOMM adapter
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,

    /// Seed policy for the in-memory repository
    #[serde(default)]
    pub policy: Option<EscalationPolicy>,
}

impl Settings {
    /// Pipeline configuration derived from these settings
    pub fn guardian_config(&self) -> GuardianConfig {
        GuardianConfig {
            user_id: self.user.id.clone(),
            bucket: self.escalation.dedup_window(),
            check_in_timeout: self.check_in.timeout(),
            policy_timeout: self.escalation.policy_timeout(),
            escalation: EscalationConfig {
                retry_delays: self.escalation.retry_delays(),
                audit_retry_delays: self.escalation.audit_retry_delays(),
            },
        }
    }

    /// Serial devices for the RFCOMM adapter
    pub fn serial_devices(&self) -> Vec<SerialDevice> {
        self.devices.iter().map(SerialDevice::from).collect()
    }
}

// ─────────────────────────────────────────────────────────
// Link
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinkSettings {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Silence before the link is considered lost
    #[serde(default = "default_quiet_period_secs")]
    pub quiet_period_secs: u64,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            quiet_period_secs: default_quiet_period_secs(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
        }
    }
}

impl LinkSettings {
    pub fn to_link_config(&self) -> LinkConfig {
        LinkConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            quiet_period: Duration::from_secs(self.quiet_period_secs),
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_quiet_period_secs() -> u64 {
    30
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_backoff_cap_secs() -> u64 {
    30
}

// ─────────────────────────────────────────────────────────
// Escalation
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EscalationSettings {
    /// Identity bucket width for event ids
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Delays before each retry of a retryable channel
    #[serde(default = "default_retry_delays_secs")]
    pub retry_delays_secs: Vec<u64>,

    /// Delays before each retry of the audit write
    #[serde(default = "default_audit_retry_delays_secs")]
    pub audit_retry_delays_secs: Vec<u64>,

    /// Bound on loading the user's policy
    #[serde(default = "default_policy_timeout_secs")]
    pub policy_timeout_secs: u64,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            retry_delays_secs: default_retry_delays_secs(),
            audit_retry_delays_secs: default_audit_retry_delays_secs(),
            policy_timeout_secs: default_policy_timeout_secs(),
        }
    }
}

impl EscalationSettings {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn policy_timeout(&self) -> Duration {
        Duration::from_secs(self.policy_timeout_secs)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .copied()
            .map(Duration::from_secs)
            .collect()
    }

    pub fn audit_retry_delays(&self) -> Vec<Duration> {
        self.audit_retry_delays_secs
            .iter()
            .copied()
            .map(Duration::from_secs)
            .collect()
    }
}

fn default_dedup_window_secs() -> u64 {
    60
}

fn default_policy_timeout_secs() -> u64 {
    3
}

fn default_retry_delays_secs() -> Vec<u64> {
    vec![2, 5]
}

fn default_audit_retry_delays_secs() -> Vec<u64> {
    vec![1, 2, 5]
}

// ─────────────────────────────────────────────────────────
// Check-in, user, location, devices
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CheckInSettings {
    #[serde(default = "default_check_in_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CheckInSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_check_in_timeout_secs(),
        }
    }
}

impl CheckInSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_check_in_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserSettings {
    #[serde(default = "default_user_id")]
    pub id: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            id: default_user_id(),
        }
    }
}

fn default_user_id() -> String {
    "local".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LocationSettings {
    /// `"<lat>,<lng>"` reported as the current location
    #[serde(default)]
    pub fixed: Option<String>,
}

impl LocationSettings {
    pub fn fixed_coordinates(&self) -> Option<Coordinates> {
        self.fixed.as_deref().and_then(Coordinates::parse)
    }
}

/// A `[[devices]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    pub path: PathBuf,
}

impl From<&DeviceEntry> for SerialDevice {
    fn from(entry: &DeviceEntry) -> Self {
        SerialDevice {
            identity: DeviceIdentity::new(entry.address.clone(), entry.name.clone()),
            path: entry.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_guardian_config() {
        let config = Settings::default().guardian_config();
        assert_eq!(config, GuardianConfig::default());
    }

    #[test]
    fn test_guardian_config_from_sections() {
        let settings: Settings = toml::from_str(
            r#"
            [escalation]
            dedup_window_secs = 90
            retry_delays_secs = [3]
            policy_timeout_secs = 5

            [check_in]
            timeout_secs = 30

            [user]
            id = "grandma"

            [[devices]]
            address = "AA:BB:CC:DD:EE:FF"
            name = "Guardian Watch"
            path = "/dev/rfcomm0"
            "#,
        )
        .unwrap();

        let config = settings.guardian_config();
        assert_eq!(config.user_id, "grandma");
        assert_eq!(config.bucket, Duration::from_secs(90));
        assert_eq!(config.check_in_timeout, Duration::from_secs(30));
        assert_eq!(config.policy_timeout, Duration::from_secs(5));
        assert_eq!(config.escalation.retry_delays, vec![Duration::from_secs(3)]);
        assert_eq!(config.escalation.audit_retry_delays.len(), 3);

        let devices = settings.serial_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].identity.display_name(), "Guardian Watch");
        assert_eq!(devices[0].path, PathBuf::from("/dev/rfcomm0"));
    }
}
