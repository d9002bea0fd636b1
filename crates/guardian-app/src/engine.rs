//! Guardian - the assembled pipeline
//!
//! Wires the Link Manager, Event Normalizer, Escalation Engine, check-in
//! tracker and repository together. Collaborators are injected at
//! construction; nothing here is process-wide.
//!
//! [`Guardian::run`] is the ingress loop: link events are handled strictly in
//! arrival order, so fall events reach the dedup check in Normalizer order.
//! Escalations themselves run on their own tasks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use guardian_core::prelude::*;
use guardian_core::{CheckInSession, EventId, FallEvent, Frame};
use guardian_link::{LinkCommand, LinkEvent, LinkManager, RadioAdapter};

use crate::channels::ChannelDrivers;
use crate::checkin::{CheckInReport, CheckInTracker};
use crate::escalation::{EscalationConfig, EscalationEngine, EscalationReport};
use crate::guardian_event::GuardianEvent;
use crate::normalizer::{parse_push_payload, LocationProvider, Normalizer};
use crate::policy::EscalationPolicy;
use crate::repository::EventRepository;

/// Broadcast buffer for [`GuardianEvent`]s
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Pipeline knobs that are not part of the per-user policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianConfig {
    pub user_id: String,
    /// Identity key time bucket
    pub bucket: Duration,
    pub check_in_timeout: Duration,
    /// Bound on a policy load before falling back
    pub policy_timeout: Duration,
    pub escalation: EscalationConfig,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            bucket: Duration::from_secs(60),
            check_in_timeout: Duration::from_secs(120),
            policy_timeout: Duration::from_secs(3),
            escalation: EscalationConfig::default(),
        }
    }
}

pub struct Guardian<A: RadioAdapter, R, P> {
    link: Arc<LinkManager<A>>,
    escalation: Arc<EscalationEngine<R>>,
    repository: Arc<R>,
    location: P,
    normalizer: Normalizer,
    check_ins: CheckInTracker,
    check_in_reports: Mutex<Option<mpsc::UnboundedReceiver<CheckInReport>>>,
    user_id: String,
    policy_timeout: Duration,
    last_policy: Mutex<Option<EscalationPolicy>>,
    event_tx: broadcast::Sender<GuardianEvent>,
    shutdown: Notify,
}

impl<A, R, P> std::fmt::Debug for Guardian<A, R, P>
where
    A: RadioAdapter,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardian")
            .field("user_id", &self.user_id)
            .field("link", &self.link)
            .field("escalation", &self.escalation)
            .field("check_ins", &self.check_ins)
            .finish()
    }
}

impl<A, R, P> Guardian<A, R, P>
where
    A: RadioAdapter + Sync + 'static,
    R: EventRepository + Send + Sync + 'static,
    P: LocationProvider + Send + Sync + 'static,
{
    pub fn new(
        link: Arc<LinkManager<A>>,
        repository: Arc<R>,
        drivers: ChannelDrivers,
        location: P,
        config: GuardianConfig,
    ) -> Self {
        let escalation = Arc::new(EscalationEngine::new(
            Arc::clone(&repository),
            drivers,
            config.escalation,
        ));
        let (check_ins, check_in_reports) = CheckInTracker::new(config.check_in_timeout);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            link,
            escalation,
            repository,
            location,
            normalizer: Normalizer::new(config.bucket),
            check_ins,
            check_in_reports: Mutex::new(Some(check_in_reports)),
            user_id: config.user_id,
            policy_timeout: config.policy_timeout,
            last_policy: Mutex::new(None),
            event_tx,
            shutdown: Notify::new(),
        }
    }

    /// Subscribe to pipeline events.
    ///
    /// Slow subscribers lose the oldest events (`RecvError::Lagged`).
    pub fn subscribe(&self) -> broadcast::Receiver<GuardianEvent> {
        self.event_tx.subscribe()
    }

    pub fn link(&self) -> &LinkManager<A> {
        &self.link
    }

    pub fn escalation(&self) -> &EscalationEngine<R> {
        &self.escalation
    }

    pub fn check_ins(&self) -> &CheckInTracker {
        &self.check_ins
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn emit(&self, event: GuardianEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    // ─────────────────────────────────────────────────────────
    // Policy
    // ─────────────────────────────────────────────────────────

    /// Load the user's policy, falling back to the last good one (or the
    /// default) so an escalation is never dropped for want of settings.
    ///
    /// A load slower than `policy_timeout` counts as a failure.
    pub async fn current_policy(&self) -> EscalationPolicy {
        let loaded = tokio::time::timeout(
            self.policy_timeout,
            self.repository.load_policy(&self.user_id),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::storage(format!(
                "loading policy timed out after {}s",
                self.policy_timeout.as_secs()
            )))
        });
        match loaded {
            Ok(policy) => {
                *self.lock_policy() = Some(policy.clone());
                policy
            }
            Err(e) => {
                let cached = self.lock_policy().clone();
                let source = if cached.is_some() { "last loaded" } else { "default" };
                warn!("Failed to load policy, using {} policy: {}", source, e);
                self.emit(GuardianEvent::PolicyFallback {
                    reason: e.to_string(),
                });
                cached.unwrap_or_default()
            }
        }
    }

    fn lock_policy(&self) -> std::sync::MutexGuard<'_, Option<EscalationPolicy>> {
        self.last_policy.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─────────────────────────────────────────────────────────
    // Ingress
    // ─────────────────────────────────────────────────────────

    /// Escalate a normalized event.
    ///
    /// Returns the running escalation, or `None` if it was a duplicate.
    pub async fn escalate(&self, event: FallEvent) -> Option<JoinHandle<EscalationReport>> {
        self.emit(GuardianEvent::EventNormalized(event.clone()));
        let policy = self.current_policy().await;

        let Some(escalation) = self.escalation.begin(event.clone(), &policy) else {
            self.emit(GuardianEvent::EscalationSuppressed { event_id: event.id });
            return None;
        };

        self.emit(GuardianEvent::EscalationStarted {
            event_id: event.id.clone(),
            channels: escalation.channels().to_vec(),
        });

        let engine = Arc::clone(&self.escalation);
        let event_tx = self.event_tx.clone();
        Some(tokio::spawn(async move {
            let report = engine.run(escalation).await;
            let _ = event_tx.send(GuardianEvent::EscalationFinished(report.clone()));
            report
        }))
    }

    /// Handle one frame read off the link
    pub async fn handle_frame(&self, frame: Frame) -> Option<JoinHandle<EscalationReport>> {
        match &frame {
            Frame::Fall { .. } => {
                let event = self.normalizer.from_frame(&frame, Utc::now())?;
                self.escalate(event).await
            }
            Frame::CheckInAck => {
                self.check_ins.acknowledge();
                None
            }
            Frame::Heartbeat => {
                trace!("Heartbeat");
                None
            }
            Frame::Unknown(raw) => {
                debug!("Ignoring unknown frame {:?}", raw);
                None
            }
        }
    }

    /// Handle a data-only push relay payload
    pub async fn handle_push(&self, json: &str) -> Result<Option<JoinHandle<EscalationReport>>> {
        let payload = parse_push_payload(json)?;
        match self.normalizer.from_push(&payload, Utc::now()) {
            Some(event) => Ok(self.escalate(event).await),
            None => {
                debug!("Push payload carried no location; not a fall relay");
                Ok(None)
            }
        }
    }

    /// Manual "simulate fall" trigger
    pub async fn simulate_fall(&self) -> Option<JoinHandle<EscalationReport>> {
        let event = self
            .normalizer
            .simulate_fall(&self.location, Utc::now())
            .await;
        self.escalate(event).await
    }

    /// Panic button
    pub async fn panic(&self) -> Option<JoinHandle<EscalationReport>> {
        let event = self.normalizer.panic(&self.location, Utc::now()).await;
        self.escalate(event).await
    }

    // ─────────────────────────────────────────────────────────
    // Check-in & dismissal
    // ─────────────────────────────────────────────────────────

    /// Open a check-in session and prompt the wearable.
    ///
    /// The session is dropped again if the prompt cannot be written.
    pub async fn issue_check_in(&self) -> Result<CheckInSession> {
        let session = self.check_ins.issue()?;
        if let Err(e) = self.link.send_command(LinkCommand::CheckIn).await {
            self.check_ins.abandon(session.id);
            return Err(e);
        }
        self.emit(GuardianEvent::CheckInIssued(session.clone()));
        Ok(session)
    }

    /// In-app dismissal.
    ///
    /// Cancels pending retries of `event_id` (or of every active escalation)
    /// and closes an outstanding check-in prompt as dismissed.
    pub fn dismiss(&self, event_id: Option<&EventId>) -> Vec<EventId> {
        let event_ids = match event_id {
            Some(id) if self.escalation.cancel(id) => vec![id.clone()],
            Some(_) => Vec::new(),
            None => self.escalation.cancel_active(),
        };
        self.check_ins.dismiss();
        self.emit(GuardianEvent::AlertDismissed {
            event_ids: event_ids.clone(),
        });
        event_ids
    }

    pub async fn register_push_token(&self, token: &str) -> Result<()> {
        self.repository
            .register_notification_token(&self.user_id, token)
            .await?;
        info!("Registered push token for {}", self.user_id);
        self.emit(GuardianEvent::TokenRegistered {
            token: token.to_string(),
        });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Run loop
    // ─────────────────────────────────────────────────────────

    /// Ask [`run`](Self::run) to stop
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn next_scheduled_check_in(&self) -> Option<Instant> {
        let policy = self.current_policy().await;
        let now = Local::now();
        let next = policy.scheduled_check_in.next_after(&now)?;
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!("Next scheduled check-in at {}", next.format("%Y-%m-%d %H:%M"));
        Some(Instant::now() + delay)
    }

    /// Drive the pipeline until [`shutdown`](Self::shutdown) or the link
    /// manager goes away. Disconnects the link on the way out.
    pub async fn run(self: Arc<Self>, mut link_events: mpsc::UnboundedReceiver<LinkEvent>) {
        let Some(mut reports) = self
            .check_in_reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            error!("Guardian::run called twice");
            return;
        };

        let mut scheduled = self.next_scheduled_check_in().await;

        loop {
            let deadline = scheduled.unwrap_or_else(Instant::now);
            tokio::select! {
                event = link_events.recv() => match event {
                    Some(LinkEvent::StateChanged(state)) => {
                        self.emit(GuardianEvent::LinkStateChanged(state));
                    }
                    Some(LinkEvent::Frame(frame)) => {
                        self.handle_frame(frame).await;
                    }
                    Some(LinkEvent::Failure(message)) => {
                        self.emit(GuardianEvent::LinkFailure { message });
                    }
                    None => {
                        info!("Link event channel closed");
                        break;
                    }
                },
                Some(report) = reports.recv() => {
                    self.emit(GuardianEvent::CheckInClosed(report));
                }
                _ = tokio::time::sleep_until(deadline), if scheduled.is_some() => {
                    info!("Issuing scheduled check-in");
                    if let Err(e) = self.issue_check_in().await {
                        warn!("Scheduled check-in failed: {}", e);
                    }
                    scheduled = self.next_scheduled_check_in().await;
                }
                _ = self.shutdown.notified() => {
                    info!("Guardian shutting down");
                    break;
                }
            }
        }

        self.emit(GuardianEvent::Shutdown);
        if let Err(e) = self.link.disconnect().await {
            warn!("Disconnect during shutdown failed: {}", e);
        }
    }
}
