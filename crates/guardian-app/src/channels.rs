//! Channel driver contract
//!
//! Delivery transports (phone calls, SMS, push, the in-app alert) live outside
//! this crate. Each implements [`ChannelDriver`]: one `attempt` per call,
//! reporting success or a failure reason. Retries, ordering and cancellation
//! belong to the escalation engine, not the driver.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use url::Url;

use guardian_core::{Channel, DeliveryOutcome, EventId, EventKind, FallEvent, Location};

use crate::policy::EscalationPolicy;

const MAPS_SEARCH_URL: &str = "https://www.google.com/maps/search/";

/// One notification transport.
///
/// Drivers must be `Send + Sync`; the engine runs attempts for different
/// channels concurrently on separate tasks.
pub trait ChannelDriver: Send + Sync + fmt::Debug {
    /// Name for logging
    fn name(&self) -> &str;

    /// Try to deliver `event` once.
    fn attempt<'a>(
        &'a self,
        event: &'a FallEvent,
        policy: &'a EscalationPolicy,
    ) -> BoxFuture<'a, DeliveryOutcome>;
}

/// Drivers keyed by the channel they serve
#[derive(Debug, Clone, Default)]
pub struct ChannelDrivers {
    drivers: HashMap<Channel, Arc<dyn ChannelDriver>>,
}

impl ChannelDrivers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `driver` for `channel`, replacing any previous one
    pub fn with(mut self, channel: Channel, driver: Arc<dyn ChannelDriver>) -> Self {
        self.drivers.insert(channel, driver);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelDriver>> {
        self.drivers.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.drivers.keys().copied().collect();
        channels.sort();
        channels
    }
}

/// Link to the event location on a map; `None` for unknown locations
pub fn map_url(location: &Location) -> Option<Url> {
    let coords = location.coordinates()?;
    let mut url = Url::parse(MAPS_SEARCH_URL).ok()?;
    url.set_query(Some(&format!("api=1&query={}", coords)));
    Some(url)
}

/// What the in-app alert shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotice {
    pub event_id: EventId,
    pub kind: EventKind,
    pub title: String,
    pub message: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_url: Option<String>,
}

impl AlertNotice {
    pub fn for_event(event: &FallEvent) -> Self {
        let title = match event.kind {
            EventKind::Fall => "Fall detected",
            EventKind::Panic => "Panic alert",
        };
        let location = event.location_text();
        Self {
            event_id: event.id.clone(),
            kind: event.kind,
            title: title.to_string(),
            message: format!("{}! Location: {}", title, location),
            location,
            map_url: map_url(&event.location).map(String::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_event, RecordingDriver};
    use guardian_core::Coordinates;

    #[test]
    fn test_map_url_for_coordinates() {
        let location = Location::from(Coordinates::new(40.0, -73.0).unwrap());
        let url = map_url(&location).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.google.com/maps/search/?api=1&query=40.0,-73.0"
        );
    }

    #[test]
    fn test_map_url_absent_for_unknown() {
        assert!(map_url(&Location::Unknown).is_none());
    }

    #[test]
    fn test_alert_notice() {
        let event = test_event();
        let notice = AlertNotice::for_event(&event);
        assert_eq!(notice.title, "Fall detected");
        assert_eq!(notice.location, "40.0,-73.0");
        assert_eq!(notice.message, "Fall detected! Location: 40.0,-73.0");
        assert!(notice.map_url.unwrap().ends_with("query=40.0,-73.0"));
    }

    #[test]
    fn test_drivers_registry() {
        let drivers = ChannelDrivers::new()
            .with(Channel::Sms, Arc::new(RecordingDriver::new(Channel::Sms)))
            .with(Channel::InApp, Arc::new(RecordingDriver::new(Channel::InApp)));

        assert_eq!(drivers.channels(), vec![Channel::InApp, Channel::Sms]);
        assert!(drivers.get(Channel::Call).is_none());
        assert_eq!(drivers.get(Channel::Sms).unwrap().name(), "recording:sms");
    }
}
