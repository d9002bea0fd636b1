//! Per-user escalation policy
//!
//! A read-only snapshot handed to the escalation engine for each event.
//! Deserialization goes through [`PolicyDocument`], which accepts the
//! camelCase names used by stored settings documents, including the flat
//! `scheduledCheckInEnabled` / `scheduledCheckInTime` pair.

use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

use guardian_core::{Channel, Location, UNKNOWN_LOCATION};

/// Placeholder replaced with the event location in SMS templates
pub const LOCATION_PLACEHOLDER: &str = "{location}";

/// SMS body used when the user has not customized it
pub const DEFAULT_SMS_TEMPLATE: &str = "EMERGENCY: Fall detected! Location: {location}.";

const DEFAULT_DEDUP_WINDOW_SECS: u64 = 60;

/// An emergency contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Daily wellness check-in at a fixed local time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCheckIn {
    #[serde(default)]
    pub enabled: bool,
    /// `HH:MM`, 24-hour
    #[serde(default)]
    pub time: Option<String>,
}

impl ScheduledCheckIn {
    /// Parsed time of day, if enabled and well-formed
    pub fn time_of_day(&self) -> Option<NaiveTime> {
        if !self.enabled {
            return None;
        }
        NaiveTime::parse_from_str(self.time.as_deref()?.trim(), "%H:%M").ok()
    }

    /// The next firing strictly after `now`, in `now`'s time zone.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let time = self.time_of_day()?;
        let tz = now.timezone();
        let mut day = now.date_naive();
        // Two days covers a time that falls into a DST gap today.
        for _ in 0..3 {
            if let Some(candidate) = tz.from_local_datetime(&day.and_time(time)).earliest() {
                if candidate > *now {
                    return Some(candidate);
                }
            }
            day = day.succ_opt()?;
        }
        None
    }
}

/// Channel switches, SMS template and recipients for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PolicyDocument")]
pub struct EscalationPolicy {
    pub call_enabled: bool,
    pub sms_enabled: bool,
    pub in_app_enabled: bool,
    pub push_enabled: bool,
    pub sms_template: String,
    pub target_phone: Option<String>,
    pub dedup_window_secs: u64,
    pub contacts: Vec<Contact>,
    pub scheduled_check_in: ScheduledCheckIn,
}

/// Stored settings document, before the check-in fields are folded together
#[derive(Debug, Deserialize)]
#[serde(default)]
struct PolicyDocument {
    #[serde(alias = "callEnabled", alias = "autoCallEnabled")]
    call_enabled: bool,
    #[serde(alias = "smsEnabled")]
    sms_enabled: bool,
    #[serde(alias = "inAppEnabled", alias = "inAppAlertEnabled")]
    in_app_enabled: bool,
    #[serde(alias = "pushEnabled")]
    push_enabled: bool,
    #[serde(alias = "smsTemplate", alias = "fallAlertSmsText")]
    sms_template: String,
    #[serde(alias = "targetPhone", alias = "testPhoneNumber")]
    target_phone: Option<String>,
    #[serde(alias = "dedupWindowSecs")]
    dedup_window_secs: u64,
    contacts: Vec<Contact>,
    #[serde(alias = "scheduledCheckIn")]
    scheduled_check_in: Option<ScheduledCheckIn>,
    #[serde(alias = "scheduledCheckInEnabled")]
    scheduled_check_in_enabled: Option<bool>,
    #[serde(alias = "scheduledCheckInTime")]
    scheduled_check_in_time: Option<String>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        let policy = EscalationPolicy::default();
        Self {
            call_enabled: policy.call_enabled,
            sms_enabled: policy.sms_enabled,
            in_app_enabled: policy.in_app_enabled,
            push_enabled: policy.push_enabled,
            sms_template: policy.sms_template,
            target_phone: policy.target_phone,
            dedup_window_secs: policy.dedup_window_secs,
            contacts: policy.contacts,
            scheduled_check_in: None,
            scheduled_check_in_enabled: None,
            scheduled_check_in_time: None,
        }
    }
}

impl From<PolicyDocument> for EscalationPolicy {
    fn from(doc: PolicyDocument) -> Self {
        // Flat fields override the nested table. A flat time alone enables
        // the schedule unless something disabled it.
        let flat =
            doc.scheduled_check_in_enabled.is_some() || doc.scheduled_check_in_time.is_some();
        let scheduled_check_in = match doc.scheduled_check_in {
            Some(nested) if !flat => nested,
            nested => {
                let nested_enabled = nested.as_ref().map(|c| c.enabled);
                ScheduledCheckIn {
                    enabled: doc
                        .scheduled_check_in_enabled
                        .or(nested_enabled)
                        .unwrap_or(flat),
                    time: doc
                        .scheduled_check_in_time
                        .or_else(|| nested.and_then(|c| c.time)),
                }
            }
        };

        Self {
            call_enabled: doc.call_enabled,
            sms_enabled: doc.sms_enabled,
            in_app_enabled: doc.in_app_enabled,
            push_enabled: doc.push_enabled,
            sms_template: doc.sms_template,
            target_phone: doc.target_phone,
            dedup_window_secs: doc.dedup_window_secs,
            contacts: doc.contacts,
            scheduled_check_in,
        }
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            call_enabled: true,
            sms_enabled: true,
            in_app_enabled: true,
            push_enabled: false,
            sms_template: DEFAULT_SMS_TEMPLATE.to_string(),
            target_phone: None,
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
            contacts: Vec::new(),
            scheduled_check_in: ScheduledCheckIn::default(),
        }
    }
}

impl EscalationPolicy {
    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::InApp => self.in_app_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::Call => self.call_enabled,
            Channel::Push => self.push_enabled,
        }
    }

    /// Enabled channels in dispatch order (in-app first)
    pub fn enabled_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs.max(1))
    }

    /// SMS body for an event at `location`
    pub fn render_sms(&self, location: &Location) -> String {
        render_sms_template(&self.sms_template, &location.to_string())
    }

    /// Contacts' phones followed by the target phone, blanks dropped, first
    /// occurrence kept.
    pub fn sms_recipients(&self) -> Vec<String> {
        let mut recipients: Vec<String> = Vec::new();
        let phones = self
            .contacts
            .iter()
            .map(|c| c.phone.as_str())
            .chain(self.target_phone.as_deref());

        for phone in phones {
            let phone = phone.trim();
            if !phone.is_empty() && !recipients.iter().any(|p| p == phone) {
                recipients.push(phone.to_string());
            }
        }
        recipients
    }

    /// Number to dial: the target phone, else the first contact
    pub fn call_target(&self) -> Option<String> {
        self.target_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or_else(|| self.sms_recipients().into_iter().next())
    }
}

/// Substitute `{location}` into `template`, appending it (space-separated)
/// when missing. An empty location renders as "Unknown"; a blank template
/// renders as the location alone.
pub fn render_sms_template(template: &str, location: &str) -> String {
    let location = if location.trim().is_empty() {
        UNKNOWN_LOCATION
    } else {
        location
    };

    let template = template.trim();
    if template.contains(LOCATION_PLACEHOLDER) {
        template.replace(LOCATION_PLACEHOLDER, location)
    } else if template.is_empty() {
        location.to_string()
    } else {
        format!("{} {}", template, location)
    }
}
