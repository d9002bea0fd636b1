//! Canonical fall/panic events and their identity keys
//!
//! Every alert, whatever its origin, becomes a [`FallEvent`]. The event's
//! [`EventId`] is derived from its provenance, kind, rounded location and a
//! coarse time bucket so the same physical event reported twice collapses to
//! one identity.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text used wherever a location could not be determined
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Coordinates are rounded to this many thousandths of a degree (~110 m)
/// when computing identity keys.
const KEY_PRECISION: f64 = 1000.0;

// ─────────────────────────────────────────────────────────
// Kind & Source
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Fall,
    Panic,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Fall => write!(f, "fall"),
            EventKind::Panic => write!(f, "panic"),
        }
    }
}

/// Where an event entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Decoded from the wearable link
    DirectLink,
    /// Relayed by a push notification
    PushRelay,
    /// Simulated fall or panic button in the app
    Manual,
}

impl EventSource {
    /// Sources that can echo the same wearable-detected fall.
    pub fn is_device_originated(&self) -> bool {
        matches!(self, EventSource::DirectLink | EventSource::PushRelay)
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::DirectLink => write!(f, "direct_link"),
            EventSource::PushRelay => write!(f, "push_relay"),
            EventSource::Manual => write!(f, "manual"),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Location
// ─────────────────────────────────────────────────────────

/// A validated latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Build coordinates, rejecting non-finite or out-of-range values.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }

    /// Parse `"<lat>,<lng>"`, tolerating whitespace around either number.
    pub fn parse(text: &str) -> Option<Self> {
        let (lat, lng) = text.split_once(',')?;
        let lat = lat.trim().parse::<f64>().ok()?;
        let lng = lng.trim().parse::<f64>().ok()?;
        Self::new(lat, lng)
    }

    /// Coordinates in thousandths of a degree, used for identity keys.
    fn rounded(&self) -> (i64, i64) {
        (
            (self.lat * KEY_PRECISION).round() as i64,
            (self.lng * KEY_PRECISION).round() as i64,
        )
    }
}

impl fmt::Display for Coordinates {
    // `{:?}` keeps a decimal point on whole numbers: 40.0 renders as "40.0".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?},{:?}", self.lat, self.lng)
    }
}

/// Where an event happened, if known
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Location {
    Coordinates(Coordinates),
    Unknown,
}

impl Location {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            Location::Coordinates(c) => Some(*c),
            Location::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Location::Coordinates(_))
    }

    fn key_fragment(&self) -> String {
        match self {
            Location::Coordinates(c) => {
                let (lat, lng) = c.rounded();
                format!("{},{}", lat, lng)
            }
            Location::Unknown => "unknown".to_string(),
        }
    }
}

impl From<Coordinates> for Location {
    fn from(value: Coordinates) -> Self {
        Location::Coordinates(value)
    }
}

impl From<Option<Coordinates>> for Location {
    fn from(value: Option<Coordinates>) -> Self {
        value.map_or(Location::Unknown, Location::Coordinates)
    }
}

impl From<String> for Location {
    fn from(value: String) -> Self {
        Coordinates::parse(&value).into()
    }
}

impl From<Location> for String {
    fn from(value: Location) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Coordinates(c) => c.fmt(f),
            Location::Unknown => f.write_str(UNKNOWN_LOCATION),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────

/// Stable deduplication key of a [`FallEvent`].
///
/// Format: `<source>:<kind>:<lat_milli>,<lng_milli>:<bucket>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key without its time bucket: `<source>:<kind>:<location>`.
    pub fn stem(&self) -> &str {
        self.0.rsplit_once(':').map_or(self.0.as_str(), |(stem, _)| stem)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Canonical alert record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub location: Location,
    pub source: EventSource,
    pub occurred_at: DateTime<Utc>,
}

impl FallEvent {
    /// Create an event, deriving its identity from a `bucket`-wide time window.
    pub fn new(
        kind: EventKind,
        source: EventSource,
        location: Location,
        occurred_at: DateTime<Utc>,
        bucket: Duration,
    ) -> Self {
        let id = Self::identity_key(kind, source, &location, occurred_at, bucket);
        Self {
            id,
            kind,
            location,
            source,
            occurred_at,
        }
    }

    /// Compute the identity key for an event with these attributes.
    pub fn identity_key(
        kind: EventKind,
        source: EventSource,
        location: &Location,
        occurred_at: DateTime<Utc>,
        bucket: Duration,
    ) -> EventId {
        let bucket_secs = bucket.as_secs().max(1) as i64;
        let bucket_index = occurred_at.timestamp().div_euclid(bucket_secs);
        EventId(format!(
            "{}:{}:{}:{}",
            source,
            kind,
            location.key_fragment(),
            bucket_index
        ))
    }

    /// Source-independent key for device-originated events.
    ///
    /// A fall relayed by push and the same fall read off the link share this
    /// key. Manual triggers have none.
    pub fn correlation_key(&self) -> Option<&str> {
        if !self.source.is_device_originated() {
            return None;
        }
        self.id.stem().split_once(':').map(|(_, rest)| rest)
    }

    /// Location rendered for humans ("lat,lng" or "Unknown")
    pub fn location_text(&self) -> String {
        self.location.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const WINDOW: Duration = Duration::from_secs(60);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn coords(lat: f64, lng: f64) -> Location {
        Coordinates::new(lat, lng).unwrap().into()
    }

    #[test]
    fn test_coordinates_display_keeps_decimal_point() {
        assert_eq!(coords(40.0, -73.0).to_string(), "40.0,-73.0");
        assert_eq!(coords(12.34, 56.78).to_string(), "12.34,56.78");
    }

    #[test]
    fn test_coordinates_parse_with_whitespace() {
        let c = Coordinates::parse("  12.34 ,  56.78 ").unwrap();
        assert_eq!(c.lat, 12.34);
        assert_eq!(c.lng, 56.78);
    }

    #[test]
    fn test_coordinates_reject_out_of_range() {
        assert!(Coordinates::new(91.0, 0.0).is_none());
        assert!(Coordinates::new(0.0, -180.5).is_none());
        assert!(Coordinates::new(f64::NAN, 0.0).is_none());
        assert!(Coordinates::parse("abc,def").is_none());
        assert!(Coordinates::parse("12.0").is_none());
    }

    #[test]
    fn test_location_serde_as_string() {
        let json = serde_json::to_string(&coords(40.0, -73.0)).unwrap();
        assert_eq!(json, "\"40.0,-73.0\"");

        let unknown: Location = serde_json::from_str("\"Unknown\"").unwrap();
        assert_eq!(unknown, Location::Unknown);
        assert_eq!(Location::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_same_bucket_same_identity() {
        let a = FallEvent::new(
            EventKind::Fall,
            EventSource::DirectLink,
            coords(40.0001, -73.0002),
            at(120),
            WINDOW,
        );
        let b = FallEvent::new(
            EventKind::Fall,
            EventSource::DirectLink,
            coords(40.0, -73.0),
            at(179),
            WINDOW,
        );
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_different_source_different_identity() {
        let a = FallEvent::new(
            EventKind::Fall,
            EventSource::DirectLink,
            coords(40.0, -73.0),
            at(120),
            WINDOW,
        );
        let b = FallEvent::new(
            EventKind::Fall,
            EventSource::PushRelay,
            coords(40.0, -73.0),
            at(120),
            WINDOW,
        );
        assert_ne!(a.id, b.id);
        assert_eq!(a.correlation_key(), b.correlation_key());
    }

    #[test]
    fn test_outside_window_different_identity() {
        let a = FallEvent::new(
            EventKind::Fall,
            EventSource::DirectLink,
            coords(40.0, -73.0),
            at(120),
            WINDOW,
        );
        let b = FallEvent::new(
            EventKind::Fall,
            EventSource::DirectLink,
            coords(40.0, -73.0),
            at(240),
            WINDOW,
        );
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.stem(), b.id.stem());
    }

    #[test]
    fn test_kind_is_part_of_identity() {
        let fall = FallEvent::new(
            EventKind::Fall,
            EventSource::Manual,
            Location::Unknown,
            at(0),
            WINDOW,
        );
        let panic = FallEvent::new(
            EventKind::Panic,
            EventSource::Manual,
            Location::Unknown,
            at(0),
            WINDOW,
        );
        assert_ne!(fall.id, panic.id);
        assert_eq!(fall.id.as_str(), "manual:fall:unknown:0");
        assert!(fall.correlation_key().is_none());
    }

    #[test]
    fn test_identity_key_format() {
        let event = FallEvent::new(
            EventKind::Fall,
            EventSource::PushRelay,
            coords(12.34, 56.78),
            at(3600),
            WINDOW,
        );
        assert_eq!(event.id.as_str(), "push_relay:fall:12340,56780:60");
        assert_eq!(event.id.stem(), "push_relay:fall:12340,56780");
        assert_eq!(event.correlation_key(), Some("fall:12340,56780"));
    }
}
