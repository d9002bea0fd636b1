//! Link Manager: one device session at a time
//!
//! Owns the [`LinkState`] machine and a background session task per
//! connection. The session task reads bytes off the radio stream, frames them
//! into lines, decodes them, and forwards every [`Frame`] as a [`LinkEvent`].
//! It also serializes outbound command lines and watches for silence: no frame
//! for the quiet period moves the link to `Reconnecting`, which retries with
//! exponential backoff until it succeeds or `disconnect()` is called.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use guardian_core::prelude::*;
use guardian_core::{DeviceIdentity, DeviceSession, Frame, LinkState};

use crate::commands::{CommandSender, LinkCommand, OutboundLine};
use crate::devices::{discover_paired_devices, find_device};
use crate::protocol::{encode_line, LineDecoder};
use crate::radio::{ensure_ready, RadioAdapter};

/// Capacity of the outbound command queue
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Read buffer size for the radio stream
const READ_BUFFER_SIZE: usize = 512;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Timing knobs for the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Silence that counts as link loss while connected
    pub quiet_period: Duration,
    /// First reconnect delay
    pub backoff_base: Duration,
    /// Longest reconnect delay
    pub backoff_cap: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            quiet_period: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Everything the link reports upward, in order
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged(LinkState),
    Frame(Frame),
    /// A failure surfaced as a non-blocking status
    Failure(String),
}

/// Compute the reconnect delay for attempt `n` (1-indexed).
///
/// `base * 2^(n-1)`, capped at `cap`.
pub fn compute_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier: u32 = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.checked_mul(multiplier).unwrap_or(cap).min(cap)
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    state: LinkState,
    device: Option<DeviceIdentity>,
    last_seen_at: Option<chrono::DateTime<Utc>>,
    reconnect_attempt: u32,
    commands: Option<CommandSender>,
}

/// State shared between the manager and its session task
struct Shared {
    inner: std::sync::RwLock<Inner>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
}

impl Shared {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> LinkState {
        self.read().state.clone()
    }

    fn set_state(&self, state: LinkState) {
        {
            let mut inner = self.write();
            if inner.state == state {
                return;
            }
            if let LinkState::Reconnecting { attempt } = state {
                inner.reconnect_attempt = attempt;
            }
            inner.state = state.clone();
        }
        info!("Link state: {}", state);
        let _ = self.event_tx.send(LinkEvent::StateChanged(state));
    }

    fn mark_connected(&self, commands: CommandSender) {
        {
            let mut inner = self.write();
            inner.reconnect_attempt = 0;
            inner.last_seen_at = Some(Utc::now());
            inner.commands = Some(commands);
        }
        self.set_state(LinkState::Connected);
    }

    /// Surface a failure, passing through `Error` on the way to `Disconnected`.
    fn fail(&self, error: &Error) {
        let reason = error.to_string();
        error!("Link failure: {}", reason);
        self.write().commands = None;
        self.set_state(LinkState::Error {
            reason: reason.clone(),
        });
        let _ = self.event_tx.send(LinkEvent::Failure(reason));
        self.set_state(LinkState::Disconnected);
    }

    fn seen(&self) {
        self.write().last_seen_at = Some(Utc::now());
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Handle on the running session task
struct SessionControl {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionControl {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// LinkManager
// ---------------------------------------------------------------------------

/// Manages the single link to a paired wearable.
///
/// Create with [`LinkManager::new`], which also returns the receiver for
/// [`LinkEvent`]s. All operations take `&self`; connect, scan and disconnect
/// are serialized internally.
pub struct LinkManager<A: RadioAdapter> {
    adapter: Arc<A>,
    config: LinkConfig,
    shared: Arc<Shared>,
    control: Mutex<Option<SessionControl>>,
}

impl<A> std::fmt::Debug for LinkManager<A>
where
    A: RadioAdapter,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("state", &self.shared.state())
            .field("config", &self.config)
            .finish()
    }
}

impl<A> LinkManager<A>
where
    A: RadioAdapter + Sync + 'static,
{
    pub fn new(adapter: A, config: LinkConfig) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manager = Self {
            adapter: Arc::new(adapter),
            config,
            shared: Arc::new(Shared {
                inner: std::sync::RwLock::new(Inner::default()),
                event_tx,
            }),
            control: Mutex::new(None),
        };
        (manager, event_rx)
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Snapshot of the current device session, if a device is selected
    pub fn session(&self) -> Option<DeviceSession> {
        let inner = self.shared.read();
        inner.device.as_ref().map(|device| DeviceSession {
            device: device.clone(),
            state: inner.state.clone(),
            last_seen_at: inner.last_seen_at,
            reconnect_attempt: inner.reconnect_attempt,
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// List OS-paired devices. Does not touch session state.
    pub async fn list_paired_devices(&self) -> Result<Vec<DeviceIdentity>> {
        discover_paired_devices(self.adapter.as_ref()).await
    }

    /// Enter `Scanning` and list paired devices.
    ///
    /// Stays in `Scanning` until [`connect`](Self::connect) or
    /// [`stop_scan`](Self::stop_scan).
    pub async fn scan(&self) -> Result<Vec<DeviceIdentity>> {
        let _control = self.control.lock().await;
        let state = self.state();
        if !state.can_connect() {
            return Err(Error::invalid_transition("scan", state));
        }

        self.shared.set_state(LinkState::Scanning);
        match self.list_paired_devices().await {
            Ok(devices) => Ok(devices),
            Err(e) => {
                warn!("Scan failed: {}", e);
                self.shared.set_state(LinkState::Disconnected);
                Err(e)
            }
        }
    }

    /// Leave `Scanning` without connecting
    pub async fn stop_scan(&self) {
        let _control = self.control.lock().await;
        if self.state() == LinkState::Scanning {
            self.shared.set_state(LinkState::Disconnected);
        }
    }

    /// Connect to a paired device.
    ///
    /// Valid only from `Disconnected`/`Scanning`. Goes through `Connecting`,
    /// ending in `Connected`, or in `Error` then `Disconnected` on failure.
    pub async fn connect(&self, address: &str) -> Result<()> {
        let mut control = self.control.lock().await;
        let state = self.state();
        if !state.can_connect() {
            return Err(Error::invalid_transition("connect", state));
        }

        // A session that gave up on its own has already left Connected.
        if let Some(previous) = control.take() {
            previous.stop().await;
        }

        self.shared.set_state(LinkState::Connecting);

        let device = match self.resolve_device(address).await {
            Ok(device) => device,
            Err(e) => {
                self.shared.fail(&e);
                return Err(e);
            }
        };
        info!("Connecting to {}", device);
        self.shared.write().device = Some(device.clone());

        let stream = match open_with_timeout(
            self.adapter.as_ref(),
            &device.address,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.fail(&e);
                return Err(e);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.shared.mark_connected(CommandSender::new(cmd_tx));
        info!("Connected to {}", device);

        let task = tokio::spawn(run_session(
            Arc::clone(&self.adapter),
            Arc::clone(&self.shared),
            self.config.clone(),
            device.address.clone(),
            stream,
            cmd_rx,
            shutdown_rx,
        ));

        *control = Some(SessionControl {
            shutdown: shutdown_tx,
            task,
        });

        Ok(())
    }

    /// Tear down the session and return to `Disconnected`.
    ///
    /// Always succeeds. Any in-flight `send_command` fails with `Cancelled`.
    pub async fn disconnect(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        if let Some(session) = control.take() {
            session.stop().await;
        }

        {
            let mut inner = self.shared.write();
            inner.commands = None;
            inner.device = None;
            inner.reconnect_attempt = 0;
        }

        if !self.state().is_disconnected() {
            info!("Disconnected by request");
            self.shared.set_state(LinkState::Disconnected);
        }
        Ok(())
    }

    /// Write one command line to the device. Only valid while `Connected`.
    pub async fn send_command(&self, command: LinkCommand) -> Result<()> {
        let sender = {
            let inner = self.shared.read();
            if !inner.state.is_connected() {
                return Err(Error::NotConnected);
            }
            inner.commands.clone().ok_or(Error::NotConnected)?
        };
        sender.send(&command).await
    }

    async fn resolve_device(&self, address: &str) -> Result<DeviceIdentity> {
        let devices = self.list_paired_devices().await?;
        find_device(&devices, address)
            .cloned()
            .ok_or_else(|| Error::device_not_found(address))
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

/// Why one connection's I/O loop ended
enum IoExit {
    /// `disconnect()` was called or the manager was dropped
    Shutdown,
    /// The connection went away; reconnect
    Lost(String),
}

async fn open_with_timeout<A: RadioAdapter>(
    adapter: &A,
    address: &str,
    connect_timeout: Duration,
) -> Result<A::Stream> {
    ensure_ready(adapter).await?;
    match timeout(connect_timeout, adapter.open(address)).await {
        Ok(result) => result,
        Err(_) => Err(Error::ConnectTimeout {
            address: address.to_string(),
            timeout_secs: connect_timeout.as_secs(),
        }),
    }
}

/// Entry point for the background session task.
///
/// Runs the I/O loop on the initial stream, then reconnects on loss.
async fn run_session<A>(
    adapter: Arc<A>,
    shared: Arc<Shared>,
    config: LinkConfig,
    address: String,
    stream: A::Stream,
    mut cmd_rx: mpsc::Receiver<OutboundLine>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    A: RadioAdapter + Sync + 'static,
{
    let mut stream = stream;

    loop {
        let reason = match run_io_loop(stream, &config, &shared, &mut cmd_rx, &mut shutdown_rx)
            .await
        {
            IoExit::Shutdown => break,
            IoExit::Lost(reason) => reason,
        };
        warn!("Link to {} lost: {}", address, reason);

        match reconnect(adapter.as_ref(), &config, &shared, &address, &mut shutdown_rx).await {
            Some(next) => stream = next,
            None => break,
        }
    }

    debug!("Link session task exiting");
}

/// Retry `open` with backoff until it succeeds. Returns `None` only on
/// shutdown.
///
/// Radio-off and permission errors are surfaced once per streak as a
/// `LinkEvent::Failure`; retrying continues on the same backoff schedule.
async fn reconnect<A: RadioAdapter>(
    adapter: &A,
    config: &LinkConfig,
    shared: &Shared,
    address: &str,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<A::Stream> {
    let mut attempt: u32 = 1;
    let mut surfaced: Option<String> = None;
    loop {
        shared.set_state(LinkState::Reconnecting { attempt });

        let backoff = compute_backoff(attempt, config.backoff_base, config.backoff_cap);
        warn!(
            "Reconnecting to {} in {:?} (attempt {})",
            address, backoff, attempt
        );

        tokio::select! {
            _ = sleep(backoff) => {}
            _ = shutdown_rx.changed() => return None,
        }

        let result = tokio::select! {
            result = open_with_timeout(adapter, address, config.connect_timeout) => result,
            _ = shutdown_rx.changed() => return None,
        };

        match result {
            Ok(stream) => {
                info!("Reconnected to {} (attempt {})", address, attempt);
                return Some(stream);
            }
            Err(e) if e.is_permanent_link_failure() => {
                let reason = e.to_string();
                if surfaced.as_deref() != Some(reason.as_str()) {
                    error!("Reconnect to {} blocked: {}", address, reason);
                    shared.emit(LinkEvent::Failure(reason.clone()));
                    surfaced = Some(reason);
                }
                attempt = attempt.saturating_add(1);
            }
            Err(e) => {
                surfaced = None;
                warn!("Reconnect attempt {} failed: {}", attempt, e);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Run one connection's read/write select loop.
async fn run_io_loop<S>(
    stream: S,
    config: &LinkConfig,
    shared: &Shared,
    cmd_rx: &mut mpsc::Receiver<OutboundLine>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> IoExit
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let (mut reader, mut writer): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
    let mut decoder = LineDecoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    if !shared.state().is_connected() {
        shared.write().reconnect_attempt = 0;
        shared.seen();
        shared.set_state(LinkState::Connected);
    }

    let quiet = sleep(config.quiet_period);
    tokio::pin!(quiet);

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => return IoExit::Lost("device closed the link".to_string()),
                    Ok(n) => {
                        let frames = decoder.feed(&buf[..n]);
                        if !frames.is_empty() {
                            shared.seen();
                            quiet.as_mut().reset(Instant::now() + config.quiet_period);
                        }
                        for frame in frames {
                            trace!("Frame: {}", frame.name());
                            shared.emit(LinkEvent::Frame(frame));
                        }
                    }
                    Err(e) => return IoExit::Lost(format!("read error: {}", e)),
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(outbound) = cmd else {
                    return IoExit::Shutdown;
                };
                let bytes = encode_line(&outbound.line);
                let written = tokio::select! {
                    written = writer.write_all(&bytes) => written,
                    _ = shutdown_rx.changed() => {
                        let _ = outbound.ack.send(Err(Error::Cancelled));
                        return IoExit::Shutdown;
                    }
                };
                let written = match written {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                match written {
                    Ok(()) => {
                        debug!("Wrote {} command", outbound.description);
                        let _ = outbound.ack.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = outbound.ack.send(Err(Error::LinkLost));
                        return IoExit::Lost(format!("write error: {}", e));
                    }
                }
            }

            _ = &mut quiet => {
                return IoExit::Lost(format!(
                    "no frames for {}s",
                    config.quiet_period.as_secs()
                ));
            }

            _ = shutdown_rx.changed() => return IoExit::Shutdown,
        }
    }
}
