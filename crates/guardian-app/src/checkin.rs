//! Wellness check-in tracking
//!
//! One outstanding [`CheckInSession`] at a time. A session closes exactly once:
//! acknowledged by a `CHECK_IN_ACK` frame, dismissed in the app, or
//! unacknowledged when the timeout fires. Each close is reported on the
//! channel returned by [`CheckInTracker::new`]. Check-ins never escalate.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use guardian_core::prelude::*;
use guardian_core::{CheckInOutcome, CheckInSession};

/// A closed check-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInReport {
    pub session: CheckInSession,
    pub outcome: CheckInOutcome,
    pub closed_at: DateTime<Utc>,
}

struct Outstanding {
    session: CheckInSession,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct TrackerState {
    next_id: u64,
    current: Option<Outstanding>,
}

struct Shared {
    state: Mutex<TrackerState>,
    timeout: Duration,
    report_tx: mpsc::UnboundedSender<CheckInReport>,
    prompt_tx: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self, matches: impl FnOnce(&CheckInSession) -> bool) -> Option<Outstanding> {
        let mut state = self.lock();
        if state.current.as_ref().is_some_and(|o| matches(&o.session)) {
            state.current.take()
        } else {
            None
        }
    }

    /// Close the outstanding session if it is `id` (or any, for `None`).
    fn close(&self, id: Option<u64>, outcome: CheckInOutcome) -> Option<CheckInReport> {
        let outstanding = self.take(|session| id.map_or(true, |id| session.id == id))?;

        if outcome != CheckInOutcome::Unacknowledged {
            outstanding.timer.abort();
        }
        self.prompt_tx.send_replace(false);

        let mut session = outstanding.session;
        session.acknowledged = outcome == CheckInOutcome::Acknowledged;
        let report = CheckInReport {
            session,
            outcome,
            closed_at: Utc::now(),
        };

        match outcome {
            CheckInOutcome::Unacknowledged => {
                warn!("Check-in {} was not acknowledged", report.session.id)
            }
            _ => info!("Check-in {} closed: {}", report.session.id, outcome),
        }

        if self.report_tx.send(report.clone()).is_err() {
            debug!("Check-in report receiver dropped");
        }
        Some(report)
    }
}

/// Tracks the outstanding check-in. Clones share state.
#[derive(Clone)]
pub struct CheckInTracker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CheckInTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckInTracker")
            .field("timeout", &self.shared.timeout)
            .field("current", &self.current())
            .finish()
    }
}

impl CheckInTracker {
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<CheckInReport>) {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (prompt_tx, _) = watch::channel(false);
        let tracker = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TrackerState::default()),
                timeout,
                report_tx,
                prompt_tx,
            }),
        };
        (tracker, report_rx)
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    /// Open a new session and start its timeout.
    ///
    /// Fails with [`Error::CheckInInProgress`] while another is outstanding.
    pub fn issue(&self) -> Result<CheckInSession> {
        let mut state = self.shared.lock();
        if state.current.is_some() {
            return Err(Error::CheckInInProgress);
        }

        state.next_id += 1;
        let session = CheckInSession {
            id: state.next_id,
            issued_at: Utc::now(),
            acknowledged: false,
        };

        let shared = Arc::clone(&self.shared);
        let id = session.id;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(shared.timeout).await;
            shared.close(Some(id), CheckInOutcome::Unacknowledged);
        });

        state.current = Some(Outstanding {
            session: session.clone(),
            timer,
        });
        drop(state);

        self.shared.prompt_tx.send_replace(true);
        info!("Check-in {} issued", id);
        Ok(session)
    }

    /// The wearable acknowledged. `None` if nothing was outstanding.
    pub fn acknowledge(&self) -> Option<CheckInReport> {
        let report = self.shared.close(None, CheckInOutcome::Acknowledged);
        if report.is_none() {
            debug!("CHECK_IN_ACK with no outstanding check-in");
        }
        report
    }

    /// The in-app prompt was dismissed
    pub fn dismiss(&self) -> Option<CheckInReport> {
        self.shared.close(None, CheckInOutcome::Dismissed)
    }

    /// Drop session `id` without reporting it, e.g. when the prompt never
    /// reached the device.
    pub fn abandon(&self, id: u64) -> bool {
        match self.shared.take(|session| session.id == id) {
            Some(o) => {
                o.timer.abort();
                self.shared.prompt_tx.send_replace(false);
                debug!("Check-in {} abandoned", id);
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<CheckInSession> {
        self.shared.lock().current.as_ref().map(|o| o.session.clone())
    }

    /// Whether the "are you okay" prompt should be showing
    pub fn prompt_active(&self) -> watch::Receiver<bool> {
        self.shared.prompt_tx.subscribe()
    }
}
