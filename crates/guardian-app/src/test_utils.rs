//! Test helpers: scripted channel drivers and a fixed location provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::Notify;
use tokio::time::Instant;

use guardian_core::prelude::*;
use guardian_core::{
    Channel, Coordinates, DeliveryOutcome, EventId, EventKind, EventSource, FallEvent, Location,
};

use crate::channels::ChannelDriver;
use crate::normalizer::LocationProvider;
use crate::policy::EscalationPolicy;

/// A direct-link fall at 40.0,-73.0, 2024-03-01T10:00:00Z
pub fn test_event() -> FallEvent {
    test_event_at(EventSource::DirectLink, 1_709_287_200)
}

/// A fall at 40.0,-73.0 from `source` at unix time `secs`
pub fn test_event_at(source: EventSource, secs: i64) -> FallEvent {
    let occurred_at = Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now);
    FallEvent::new(
        EventKind::Fall,
        source,
        Location::from(Coordinates::new(40.0, -73.0)),
        occurred_at,
        Duration::from_secs(60),
    )
}

/// One call a test driver received
#[derive(Debug, Clone)]
pub struct DriverCall {
    pub event_id: EventId,
    pub channel: Channel,
    pub message: String,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct RecordingState {
    script: VecDeque<DeliveryOutcome>,
    calls: Vec<DriverCall>,
}

/// Driver that records every call and replays scripted outcomes.
///
/// Succeeds once the script runs out.
#[derive(Debug, Clone)]
pub struct RecordingDriver {
    channel: Channel,
    name: String,
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingDriver {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            name: format!("recording:{}", channel),
            state: Arc::new(Mutex::new(RecordingState::default())),
        }
    }

    /// Queue outcomes for the next calls
    pub fn script(&self, outcomes: impl IntoIterator<Item = DeliveryOutcome>) {
        self.lock().script.extend(outcomes);
    }

    /// Fail the next `count` calls
    pub fn fail_times(&self, count: usize) {
        self.script((0..count).map(|i| DeliveryOutcome::failed(format!("failure {}", i + 1))));
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn message_for(channel: Channel, event: &FallEvent, policy: &EscalationPolicy) -> String {
    match channel {
        Channel::Sms => policy.render_sms(&event.location),
        _ => event.location_text(),
    }
}

impl ChannelDriver for RecordingDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn attempt<'a>(
        &'a self,
        event: &'a FallEvent,
        policy: &'a EscalationPolicy,
    ) -> BoxFuture<'a, DeliveryOutcome> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(DriverCall {
                event_id: event.id.clone(),
                channel: self.channel,
                message: message_for(self.channel, event, policy),
                at: Instant::now(),
            });
            state.script.pop_front().unwrap_or(DeliveryOutcome::Succeeded)
        })
    }
}

/// Driver whose attempts block until released.
///
/// Lets tests observe attempts while they are still `Pending`.
#[derive(Debug, Clone)]
pub struct GatedDriver {
    inner: RecordingDriver,
    gate: Arc<Notify>,
}

impl GatedDriver {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: RecordingDriver::new(channel),
            gate: Arc::new(Notify::new()),
        }
    }

    /// Let every waiting attempt through
    pub fn release(&self) {
        self.gate.notify_waiters();
    }

    pub fn recorder(&self) -> &RecordingDriver {
        &self.inner
    }
}

impl ChannelDriver for GatedDriver {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn attempt<'a>(
        &'a self,
        event: &'a FallEvent,
        policy: &'a EscalationPolicy,
    ) -> BoxFuture<'a, DeliveryOutcome> {
        Box::pin(async move {
            let released = self.gate.notified();
            let outcome = self.inner.attempt(event, policy).await;
            released.await;
            outcome
        })
    }
}

/// Location provider returning a fixed answer; `None` fails
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Option<Coordinates>);

impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Result<Coordinates> {
        self.0
            .ok_or_else(|| Error::link("location services unavailable"))
    }
}
