//! Escalation Policy Engine
//!
//! Fans a canonical [`FallEvent`] out to the enabled channels:
//!
//! 1. [`EscalationEngine::begin`] claims the event against the dedup ledger and
//!    registers one `Pending` [`DeliveryAttempt`] per enabled channel.
//! 2. [`EscalationEngine::run`] dispatches every channel on its own task,
//!    in-app first, retrying the channels that retry, then writes the audit
//!    record with its own retry schedule.
//!
//! The ledger holds at most one entry per event id, so at most one
//! non-terminal attempt exists per (event, channel).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use guardian_core::prelude::*;
use guardian_core::{
    Channel, DeliveryAttempt, DeliveryOutcome, DeliveryStatus, EventId, FallEvent,
};

use crate::channels::{ChannelDriver, ChannelDrivers};
use crate::policy::EscalationPolicy;
use crate::repository::EventRepository;

/// Retry schedules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationConfig {
    /// Waits before each retry of a retrying channel
    pub retry_delays: Vec<Duration>,
    /// Waits before each retry of the audit write
    pub audit_retry_delays: Vec<Duration>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            retry_delays: vec![Duration::from_secs(2), Duration::from_secs(5)],
            audit_retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
        }
    }
}

/// Whether failed attempts on `channel` are retried.
///
/// Calls are dialed once; the in-app alert either shows or it does not.
pub fn retries(channel: Channel) -> bool {
    matches!(channel, Channel::Sms | Channel::Push)
}

// ─────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────

struct LedgerEntry {
    event: FallEvent,
    attempts: BTreeMap<Channel, DeliveryAttempt>,
    cancel: watch::Sender<bool>,
    window: Duration,
    last_success: Option<Instant>,
    finished_at: Option<Instant>,
}

impl LedgerEntry {
    fn has_pending(&self) -> bool {
        self.attempts.values().any(|a| !a.is_terminal())
    }

    /// Pending work, or a success recent enough to still suppress repeats
    fn is_active(&self) -> bool {
        self.has_pending()
            || self
                .last_success
                .is_some_and(|at| at.elapsed() < self.window)
    }

    fn is_stale(&self) -> bool {
        !self.has_pending()
            && self
                .finished_at
                .is_some_and(|at| at.elapsed() >= self.window)
    }

    /// Whether `event` is another occurrence of this entry's event
    fn matches(&self, event: &FallEvent) -> bool {
        if self.event.id == event.id {
            return true;
        }
        let gap = (self.event.occurred_at - event.occurred_at)
            .num_seconds()
            .unsigned_abs();
        if gap >= self.window.as_secs() {
            return false;
        }
        // Same source on either side of a bucket boundary.
        if self.event.id.stem() == event.id.stem() {
            return true;
        }
        // A push relay echoing a fall already read off the link.
        matches!(
            (self.event.correlation_key(), event.correlation_key()),
            (Some(a), Some(b)) if a == b
        )
    }
}

type Ledger = Arc<Mutex<HashMap<EventId, LedgerEntry>>>;

fn lock(ledger: &Ledger) -> MutexGuard<'_, HashMap<EventId, LedgerEntry>> {
    ledger.lock().unwrap_or_else(|e| e.into_inner())
}

fn update_attempt(
    ledger: &Ledger,
    event_id: &EventId,
    channel: Channel,
    f: impl FnOnce(&mut LedgerEntry, &mut DeliveryAttempt),
) {
    let mut ledger = lock(ledger);
    if let Some(entry) = ledger.get_mut(event_id) {
        if let Some(mut attempt) = entry.attempts.remove(&channel) {
            f(entry, &mut attempt);
            entry.attempts.insert(channel, attempt);
        }
    }
}

// ─────────────────────────────────────────────────────────
// Escalation
// ─────────────────────────────────────────────────────────

/// A claimed escalation, ready to [`run`](EscalationEngine::run)
#[derive(Debug)]
pub struct Escalation {
    event: FallEvent,
    policy: EscalationPolicy,
    channels: Vec<Channel>,
    cancel: watch::Receiver<bool>,
}

impl Escalation {
    pub fn event(&self) -> &FallEvent {
        &self.event
    }

    /// Channels that will be dispatched, in order
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }
}

/// Final state of one escalation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationReport {
    pub event_id: EventId,
    pub attempts: Vec<DeliveryAttempt>,
    pub audit_written: bool,
}

impl EscalationReport {
    pub fn attempt(&self, channel: Channel) -> Option<&DeliveryAttempt> {
        self.attempts.iter().find(|a| a.channel == channel)
    }

    pub fn status(&self, channel: Channel) -> Option<DeliveryStatus> {
        self.attempt(channel).map(|a| a.status)
    }
}

pub struct EscalationEngine<R> {
    repository: Arc<R>,
    drivers: ChannelDrivers,
    config: EscalationConfig,
    ledger: Ledger,
}

impl<R> std::fmt::Debug for EscalationEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationEngine")
            .field("drivers", &self.drivers.channels())
            .field("config", &self.config)
            .field("events", &lock(&self.ledger).len())
            .finish()
    }
}

impl<R> EscalationEngine<R>
where
    R: EventRepository + Send + Sync + 'static,
{
    pub fn new(repository: Arc<R>, drivers: ChannelDrivers, config: EscalationConfig) -> Self {
        Self {
            repository,
            drivers,
            config,
            ledger: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Claim `event` for escalation.
    ///
    /// Returns `None` when it repeats an event that still has pending
    /// attempts or succeeded within the dedup window. Otherwise one `Pending`
    /// attempt is registered per enabled channel; a channel without a driver
    /// fails immediately.
    pub fn begin(&self, event: FallEvent, policy: &EscalationPolicy) -> Option<Escalation> {
        let mut ledger = lock(&self.ledger);
        ledger.retain(|_, entry| !entry.is_stale());

        if let Some(existing) = ledger
            .values()
            .find(|entry| entry.is_active() && entry.matches(&event))
        {
            info!(
                "Suppressed duplicate event {} (matches {})",
                event.id, existing.event.id
            );
            return None;
        }

        let mut attempts = BTreeMap::new();
        let mut channels = Vec::new();
        for channel in policy.enabled_channels() {
            let mut attempt = DeliveryAttempt::pending(event.id.clone(), channel);
            if self.drivers.get(channel).is_some() {
                channels.push(channel);
            } else {
                warn!("No {} driver registered for event {}", channel, event.id);
                attempt.record(&DeliveryOutcome::failed("no driver registered"));
                attempt.finish(DeliveryStatus::Failed);
            }
            attempts.insert(channel, attempt);
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        ledger.insert(
            event.id.clone(),
            LedgerEntry {
                event: event.clone(),
                attempts,
                cancel: cancel_tx,
                window: policy.dedup_window(),
                last_success: None,
                finished_at: None,
            },
        );

        info!("Escalating {} via {:?}", event.id, channels);
        Some(Escalation {
            event,
            policy: policy.clone(),
            channels,
            cancel: cancel_rx,
        })
    }

    /// Dispatch every channel, wait for all of them, then write the audit
    /// record.
    pub async fn run(&self, escalation: Escalation) -> EscalationReport {
        let Escalation {
            event,
            policy,
            channels,
            cancel,
        } = escalation;
        let event = Arc::new(event);
        let policy = Arc::new(policy);

        let mut tasks = JoinSet::new();
        for channel in channels {
            let Some(driver) = self.drivers.get(channel) else {
                continue;
            };
            let delays = if retries(channel) {
                self.config.retry_delays.clone()
            } else {
                Vec::new()
            };
            tasks.spawn(dispatch(
                Arc::clone(&self.ledger),
                driver,
                channel,
                Arc::clone(&event),
                Arc::clone(&policy),
                delays,
                cancel.clone(),
            ));
            if channel == Channel::InApp {
                // Give the in-app alert a head start without blocking the rest.
                tokio::task::yield_now().await;
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Dispatch task for {} failed: {}", event.id, e);
            }
        }

        let attempts = {
            let mut ledger = lock(&self.ledger);
            match ledger.get_mut(&event.id) {
                Some(entry) => {
                    entry.finished_at = Some(Instant::now());
                    entry.attempts.values().cloned().collect()
                }
                None => Vec::new(),
            }
        };

        let audit_written = self.write_audit(&event, &attempts).await;
        EscalationReport {
            event_id: event.id.clone(),
            attempts,
            audit_written,
        }
    }

    /// [`begin`](Self::begin) then [`run`](Self::run)
    pub async fn escalate(
        &self,
        event: FallEvent,
        policy: &EscalationPolicy,
    ) -> Option<EscalationReport> {
        let escalation = self.begin(event, policy)?;
        Some(self.run(escalation).await)
    }

    async fn write_audit(&self, event: &FallEvent, attempts: &[DeliveryAttempt]) -> bool {
        let mut delays = self.config.audit_retry_delays.iter();
        loop {
            match self.repository.append_audit_record(event, attempts).await {
                Ok(()) => {
                    debug!("Audit record written for {}", event.id);
                    return true;
                }
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!(
                            "Audit write for {} failed, retrying in {:?}: {}",
                            event.id, delay, e
                        );
                        tokio::time::sleep(*delay).await;
                    }
                    None => {
                        error!("Audit write for {} failed: {}", event.id, e);
                        return false;
                    }
                },
            }
        }
    }

    /// Cancel pending retries of one escalation.
    ///
    /// Attempts already in flight finish; anything still waiting becomes
    /// `Cancelled`. Returns false if the event has no pending attempts.
    pub fn cancel(&self, event_id: &EventId) -> bool {
        let ledger = lock(&self.ledger);
        match ledger.get(event_id) {
            Some(entry) if entry.has_pending() => {
                entry.cancel.send_replace(true);
                info!("Cancelling escalation {}", event_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel every escalation with pending attempts
    pub fn cancel_active(&self) -> Vec<EventId> {
        let ledger = lock(&self.ledger);
        let mut cancelled: Vec<EventId> = ledger
            .iter()
            .filter(|(_, entry)| entry.has_pending())
            .map(|(id, entry)| {
                entry.cancel.send_replace(true);
                id.clone()
            })
            .collect();
        cancelled.sort();
        if !cancelled.is_empty() {
            info!("Cancelling {} active escalation(s)", cancelled.len());
        }
        cancelled
    }

    /// Snapshot of an event's attempts, in channel order
    pub fn attempts(&self, event_id: &EventId) -> Option<Vec<DeliveryAttempt>> {
        lock(&self.ledger)
            .get(event_id)
            .map(|entry| entry.attempts.values().cloned().collect())
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        // Sender gone: nothing can cancel any more.
        std::future::pending::<()>().await;
    }
}

async fn dispatch(
    ledger: Ledger,
    driver: Arc<dyn ChannelDriver>,
    channel: Channel,
    event: Arc<FallEvent>,
    policy: Arc<EscalationPolicy>,
    delays: Vec<Duration>,
    mut cancel: watch::Receiver<bool>,
) {
    let finish = |status: DeliveryStatus| {
        update_attempt(&ledger, &event.id, channel, |entry, attempt| {
            attempt.finish(status);
            if status == DeliveryStatus::Succeeded {
                entry.last_success = Some(Instant::now());
            }
        });
    };

    let mut delays = delays.into_iter();
    let mut count = 0;
    loop {
        if *cancel.borrow() {
            info!("{} delivery for {} cancelled", channel, event.id);
            finish(DeliveryStatus::Cancelled);
            return;
        }

        count += 1;
        let outcome = driver.attempt(&event, &policy).await;
        update_attempt(&ledger, &event.id, channel, |_, attempt| {
            attempt.record(&outcome)
        });

        let reason = match outcome {
            DeliveryOutcome::Succeeded => {
                info!("{} delivered {} via {}", channel, event.id, driver.name());
                finish(DeliveryStatus::Succeeded);
                return;
            }
            DeliveryOutcome::Failed(reason) => reason,
        };

        let Some(delay) = delays.next() else {
            error!(
                "{} delivery for {} failed after {} attempt(s): {}",
                channel, event.id, count, reason
            );
            finish(DeliveryStatus::Failed);
            return;
        };

        warn!(
            "{} delivery for {} failed (attempt {}), retrying in {:?}: {}",
            channel, event.id, count, delay, reason
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancelled(&mut cancel) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use crate::test_utils::{test_event, test_event_at, GatedDriver, RecordingDriver};
    use guardian_core::EventSource;

    struct Fixture {
        engine: Arc<EscalationEngine<MemoryRepository>>,
        repo: MemoryRepository,
        in_app: RecordingDriver,
        sms: RecordingDriver,
        call: RecordingDriver,
    }

    fn fixture() -> Fixture {
        let repo = MemoryRepository::new();
        let in_app = RecordingDriver::new(Channel::InApp);
        let sms = RecordingDriver::new(Channel::Sms);
        let call = RecordingDriver::new(Channel::Call);
        let drivers = ChannelDrivers::new()
            .with(Channel::InApp, Arc::new(in_app.clone()))
            .with(Channel::Sms, Arc::new(sms.clone()))
            .with(Channel::Call, Arc::new(call.clone()));
        let engine = Arc::new(EscalationEngine::new(
            Arc::new(repo.clone()),
            drivers,
            EscalationConfig::default(),
        ));
        Fixture {
            engine,
            repo,
            in_app,
            sms,
            call,
        }
    }

    fn statuses(attempts: &[DeliveryAttempt]) -> Vec<(Channel, DeliveryStatus)> {
        attempts.iter().map(|a| (a.channel, a.status)).collect()
    }

    #[tokio::test]
    async fn test_one_attempt_per_enabled_channel() {
        let f = fixture();
        let policy = EscalationPolicy::default();
        let event = test_event();

        let escalation = f.engine.begin(event.clone(), &policy).unwrap();
        assert_eq!(
            escalation.channels(),
            &[Channel::InApp, Channel::Sms, Channel::Call]
        );
        assert_eq!(
            statuses(&f.engine.attempts(&event.id).unwrap()),
            vec![
                (Channel::InApp, DeliveryStatus::Pending),
                (Channel::Sms, DeliveryStatus::Pending),
                (Channel::Call, DeliveryStatus::Pending),
            ]
        );

        let report = f.engine.run(escalation).await;
        assert!(report.attempts.iter().all(|a| a.status == DeliveryStatus::Succeeded));
        assert!(report.attempts.iter().all(|a| a.attempt_count == 1));
        assert!(report.audit_written);

        assert_eq!(f.in_app.call_count(), 1);
        assert_eq!(f.sms.call_count(), 1);
        assert_eq!(f.call.call_count(), 1);
        assert_eq!(
            f.sms.calls()[0].message,
            "EMERGENCY: Fall detected! Location: 40.0,-73.0."
        );

        let audit = f.repo.audit_records();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_disabled_channels_are_skipped() {
        let f = fixture();
        let policy = EscalationPolicy {
            call_enabled: false,
            in_app_enabled: false,
            ..Default::default()
        };

        let report = f.engine.escalate(test_event(), &policy).await.unwrap();
        assert_eq!(
            statuses(&report.attempts),
            vec![(Channel::Sms, DeliveryStatus::Succeeded)]
        );
        assert_eq!(f.call.call_count(), 0);
        assert_eq!(f.in_app.call_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_while_pending_is_suppressed() {
        let repo = MemoryRepository::new();
        let gated = GatedDriver::new(Channel::InApp);
        let engine = EscalationEngine::new(
            Arc::new(repo),
            ChannelDrivers::new().with(Channel::InApp, Arc::new(gated.clone())),
            EscalationConfig::default(),
        );
        let policy = EscalationPolicy::default();

        assert!(engine.begin(test_event(), &policy).is_some());
        assert!(engine.begin(test_event(), &policy).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_after_success_within_window() {
        let f = fixture();
        let policy = EscalationPolicy::default();

        assert!(f.engine.escalate(test_event(), &policy).await.is_some());
        assert!(f.engine.escalate(test_event(), &policy).await.is_none());
        assert_eq!(f.sms.call_count(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(f.engine.escalate(test_event(), &policy).await.is_some());
        assert_eq!(f.sms.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_escalation_does_not_suppress_repeat() {
        let f = fixture();
        let policy = EscalationPolicy {
            sms_enabled: false,
            in_app_enabled: false,
            ..Default::default()
        };
        f.call.fail_times(1);

        let report = f.engine.escalate(test_event(), &policy).await.unwrap();
        assert_eq!(report.status(Channel::Call), Some(DeliveryStatus::Failed));
        assert!(f.engine.escalate(test_event(), &policy).await.is_some());
    }

    #[tokio::test]
    async fn test_push_relay_echo_is_suppressed() {
        let f = fixture();
        let policy = EscalationPolicy::default();
        let direct = test_event_at(EventSource::DirectLink, 1_000);
        let relayed = test_event_at(EventSource::PushRelay, 1_010);
        let manual = test_event_at(EventSource::Manual, 1_010);

        assert!(f.engine.escalate(direct, &policy).await.is_some());
        assert!(f.engine.escalate(relayed, &policy).await.is_none());
        assert!(f.engine.escalate(manual, &policy).await.is_some());
    }

    #[tokio::test]
    async fn test_bucket_boundary_is_suppressed() {
        let f = fixture();
        let policy = EscalationPolicy::default();
        // 1_019 and 1_021 straddle the 60s bucket edge at 1_020.
        let before = test_event_at(EventSource::DirectLink, 1_019);
        let after = test_event_at(EventSource::DirectLink, 1_021);
        assert_ne!(before.id, after.id);

        assert!(f.engine.escalate(before, &policy).await.is_some());
        assert!(f.engine.escalate(after, &policy).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_retries_with_linear_backoff() {
        let f = fixture();
        f.sms.fail_times(2);

        let report = f
            .engine
            .escalate(test_event(), &EscalationPolicy::default())
            .await
            .unwrap();

        let sms = report.attempt(Channel::Sms).unwrap();
        assert_eq!(sms.status, DeliveryStatus::Succeeded);
        assert_eq!(sms.attempt_count, 3);
        assert_eq!(sms.last_error.as_deref(), Some("failure 2"));

        let at: Vec<Instant> = f.sms.calls().iter().map(|c| c.at).collect();
        assert_eq!(at[1] - at[0], Duration::from_secs(2));
        assert_eq!(at[2] - at[1], Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_sms_fails_without_blocking_others() {
        let f = fixture();
        f.sms.fail_times(3);
        f.call.fail_times(1);

        let report = f
            .engine
            .escalate(test_event(), &EscalationPolicy::default())
            .await
            .unwrap();

        let sms = report.attempt(Channel::Sms).unwrap();
        assert_eq!(sms.status, DeliveryStatus::Failed);
        assert_eq!(sms.attempt_count, 3);
        assert_eq!(sms.last_error.as_deref(), Some("failure 3"));

        let call = report.attempt(Channel::Call).unwrap();
        assert_eq!(call.status, DeliveryStatus::Failed);
        assert_eq!(call.attempt_count, 1);

        assert_eq!(report.status(Channel::InApp), Some(DeliveryStatus::Succeeded));
        assert!(report.audit_written);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_pending_retries() {
        let f = fixture();
        f.sms.fail_times(3);
        let event = test_event();

        let escalation = f
            .engine
            .begin(event.clone(), &EscalationPolicy::default())
            .unwrap();
        let engine = Arc::clone(&f.engine);
        let handle = tokio::spawn(async move { engine.run(escalation).await });

        // First SMS attempt has failed; the retry is waiting.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(f.sms.call_count(), 1);
        assert!(f.engine.cancel(&event.id));

        let report = handle.await.unwrap();
        let sms = report.attempt(Channel::Sms).unwrap();
        assert_eq!(sms.status, DeliveryStatus::Cancelled);
        assert_eq!(sms.attempt_count, 1);
        assert_eq!(report.status(Channel::Call), Some(DeliveryStatus::Succeeded));
        assert_eq!(f.sms.call_count(), 1);

        assert!(!f.engine.cancel(&event.id));
        assert!(f.engine.cancel_active().is_empty());
    }

    #[tokio::test]
    async fn test_missing_driver_fails_immediately() {
        let f = fixture();
        let policy = EscalationPolicy {
            push_enabled: true,
            ..Default::default()
        };

        let report = f.engine.escalate(test_event(), &policy).await.unwrap();
        let push = report.attempt(Channel::Push).unwrap();
        assert_eq!(push.status, DeliveryStatus::Failed);
        assert_eq!(push.last_error.as_deref(), Some("no driver registered"));
        assert_eq!(report.status(Channel::Sms), Some(DeliveryStatus::Succeeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_audit_write_is_retried() {
        let f = fixture();
        f.repo.fail_next_audit_writes(2);

        let report = f
            .engine
            .escalate(test_event(), &EscalationPolicy::default())
            .await
            .unwrap();
        assert!(report.audit_written);
        assert_eq!(f.repo.audit_records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audit_failure_keeps_deliveries() {
        let f = fixture();
        f.repo.fail_next_audit_writes(10);

        let report = f
            .engine
            .escalate(test_event(), &EscalationPolicy::default())
            .await
            .unwrap();
        assert!(!report.audit_written);
        assert!(report.attempts.iter().all(|a| a.status == DeliveryStatus::Succeeded));
        assert!(f.repo.audit_records().is_empty());
    }
}
