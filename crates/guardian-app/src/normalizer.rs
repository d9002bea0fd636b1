//! Event Normalizer
//!
//! Turns decoded frames, push relay payloads, manual test triggers and the
//! panic button into canonical [`FallEvent`]s with provenance and an identity
//! key bucketed to the configured window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use guardian_core::prelude::*;
use guardian_core::{Coordinates, EventKind, EventSource, FallEvent, Frame, Location};

/// Device location capability used by manual triggers
#[trait_variant::make(LocationProvider: Send)]
pub trait LocalLocationProvider {
    async fn current_location(&self) -> Result<Coordinates>;
}

/// Data-only push relay payload: `{ "location": "<lat>,<lng>" }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub location: Option<String>,
}

/// Parse a push relay payload
pub fn parse_push_payload(json: &str) -> Result<PushPayload> {
    Ok(serde_json::from_str(json)?)
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    bucket: Duration,
}

impl Normalizer {
    /// `bucket` is the identity key time window
    pub fn new(bucket: Duration) -> Self {
        Self { bucket }
    }

    pub fn bucket(&self) -> Duration {
        self.bucket
    }

    fn event(
        &self,
        kind: EventKind,
        source: EventSource,
        location: Location,
        at: DateTime<Utc>,
    ) -> FallEvent {
        let event = FallEvent::new(kind, source, location, at, self.bucket);
        debug!("Normalized {} from {} as {}", kind, source, event.id);
        event
    }

    /// A `FALL` frame read off the active link. Other frames produce nothing.
    pub fn from_frame(&self, frame: &Frame, at: DateTime<Utc>) -> Option<FallEvent> {
        match frame {
            Frame::Fall { lat, lng } => {
                let location = Location::from(Coordinates::new(*lat, *lng));
                Some(self.event(EventKind::Fall, EventSource::DirectLink, location, at))
            }
            Frame::CheckInAck | Frame::Heartbeat | Frame::Unknown(_) => None,
        }
    }

    /// A relayed fall. Payloads without a `location` field are not fall
    /// relays; an unparseable location still escalates as "Unknown".
    pub fn from_push(&self, payload: &PushPayload, at: DateTime<Utc>) -> Option<FallEvent> {
        let text = payload.location.as_deref()?;
        let location = Location::from(Coordinates::parse(text));
        if !location.is_known() {
            warn!("Push relay carried unusable location {:?}", text);
        }
        Some(self.event(EventKind::Fall, EventSource::PushRelay, location, at))
    }

    /// Manual "simulate fall" trigger
    pub async fn simulate_fall<P: LocationProvider>(
        &self,
        provider: &P,
        at: DateTime<Utc>,
    ) -> FallEvent {
        let location = resolve_location(provider).await;
        self.event(EventKind::Fall, EventSource::Manual, location, at)
    }

    /// Panic button
    pub async fn panic<P: LocationProvider>(&self, provider: &P, at: DateTime<Utc>) -> FallEvent {
        let location = resolve_location(provider).await;
        self.event(EventKind::Panic, EventSource::Manual, location, at)
    }
}

async fn resolve_location<P: LocationProvider>(provider: &P) -> Location {
    match provider.current_location().await {
        Ok(coords) => Location::Coordinates(coords),
        Err(e) => {
            warn!("Location unavailable, escalating with unknown location: {}", e);
            Location::Unknown
        }
    }
}
