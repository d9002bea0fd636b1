//! # guardian-app - Normalization, Escalation and Orchestration
//!
//! Turns link frames and out-of-band inputs into canonical fall events and
//! escalates them through the user's enabled channels exactly once per real
//! event.
//!
//! Depends on [`guardian_core`] for domain types and [`guardian_link`] for the
//! wearable link.
//!
//! ## Public API
//!
//! ### Pipeline
//! - [`Guardian`] - Assembled pipeline: link ingress, push relay, manual triggers, check-ins
//! - [`GuardianEvent`] - Broadcast pipeline events for external consumers
//! - [`GuardianConfig`] - User id, identity bucket, check-in timeout, retry schedules
//!
//! ### Escalation
//! - [`EscalationEngine`] - Dedup ledger, concurrent per-channel dispatch, retries, cancellation
//! - [`EscalationPolicy`] - Per-user channel switches, SMS template and contacts
//! - [`ChannelDriver`], [`ChannelDrivers`] - Injected delivery transports
//!
//! ### Ingress
//! - [`Normalizer`] - Frames, push payloads, simulate-fall and panic into [`guardian_core::FallEvent`]
//! - [`LocationProvider`] - Current device location for manual triggers
//! - [`CheckInTracker`] - The outstanding wellness check-in
//!
//! ### Storage & Configuration
//! - [`EventRepository`], [`MemoryRepository`] - Policy, audit history, push tokens
//! - [`config`] - `.guardian/config.toml`

pub mod channels;
pub mod checkin;
pub mod config;
pub mod engine;
pub mod escalation;
pub mod guardian_event;
pub mod normalizer;
pub mod policy;
pub mod repository;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use channels::{map_url, AlertNotice, ChannelDriver, ChannelDrivers};
pub use checkin::{CheckInReport, CheckInTracker};
pub use config::{load_settings, Settings};
pub use engine::{Guardian, GuardianConfig};
pub use escalation::{
    retries, Escalation, EscalationConfig, EscalationEngine, EscalationReport,
};
pub use guardian_event::GuardianEvent;
pub use normalizer::{
    parse_push_payload, LocalLocationProvider, LocationProvider, Normalizer, PushPayload,
};
pub use policy::{
    render_sms_template, Contact, EscalationPolicy, ScheduledCheckIn, DEFAULT_SMS_TEMPLATE,
    LOCATION_PLACEHOLDER,
};
pub use repository::{AuditRecord, EventRepository, LocalEventRepository, MemoryRepository};
