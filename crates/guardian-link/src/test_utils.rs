//! Test utilities for the link layer
//!
//! Provides a scripted [`MockRadio`] whose connections are in-memory duplex
//! pipes, plus helpers for creating test device identities.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

use guardian_core::prelude::*;
use guardian_core::DeviceIdentity;

use crate::radio::RadioAdapter;

const PIPE_CAPACITY: usize = 4096;

/// Creates a test device identity.
pub fn test_device(address: &str, name: &str) -> DeviceIdentity {
    DeviceIdentity::new(address, Some(name.to_string()))
}

/// What the next `open` call should do
#[derive(Debug, Clone)]
pub enum OpenScript {
    /// Hand out a fresh in-memory connection
    Connect,
    /// Fail with a transient link error
    Fail(String),
    /// Fail as if permissions had been revoked
    PermissionDenied,
    /// Never complete (exercises the connect timeout)
    Hang,
}

/// Far end of a mock connection, playing the wearable
pub struct MockPeer {
    reader: BufReader<tokio::io::ReadHalf<DuplexStream>>,
    writer: tokio::io::WriteHalf<DuplexStream>,
}

impl MockPeer {
    /// Write one line (terminator added)
    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("mock peer write");
    }

    /// Write raw bytes as-is
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("mock peer write");
    }

    /// Read one line written by the link, without terminator.
    /// Returns `None` once the link side is closed.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches('\n').to_string()),
        }
    }
}

struct MockState {
    permissions: bool,
    enabled: bool,
    devices: Vec<DeviceIdentity>,
    script: VecDeque<OpenScript>,
    opens: Vec<Instant>,
}

/// Scripted radio adapter
///
/// Clones share state, so a test can keep one handle while the Link Manager
/// owns another.
#[derive(Clone)]
pub struct MockRadio {
    state: Arc<Mutex<MockState>>,
    peer_tx: mpsc::UnboundedSender<MockPeer>,
    peer_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// A radio with one paired device `AA:BB:CC:DD:EE:FF` ("Guardian Watch")
    pub fn new() -> Self {
        Self::with_devices(vec![test_device("AA:BB:CC:DD:EE:FF", "Guardian Watch")])
    }

    pub fn with_devices(devices: Vec<DeviceIdentity>) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MockState {
                permissions: true,
                enabled: true,
                devices,
                script: VecDeque::new(),
                opens: Vec::new(),
            })),
            peer_tx,
            peer_rx: Arc::new(tokio::sync::Mutex::new(peer_rx)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_permissions(&self, granted: bool) {
        self.lock().permissions = granted;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    /// Queue outcomes for upcoming `open` calls. Unscripted opens connect.
    pub fn script(&self, steps: impl IntoIterator<Item = OpenScript>) {
        self.lock().script.extend(steps);
    }

    /// Number of `open` calls so far
    pub fn open_count(&self) -> usize {
        self.lock().opens.len()
    }

    /// When each `open` call happened
    pub fn open_times(&self) -> Vec<Instant> {
        self.lock().opens.clone()
    }

    /// Wait for the next successful connection and take its far end
    pub async fn next_peer(&self) -> MockPeer {
        self.peer_rx
            .lock()
            .await
            .recv()
            .await
            .expect("mock radio dropped")
    }
}

impl RadioAdapter for MockRadio {
    type Stream = DuplexStream;

    async fn permissions_granted(&self) -> bool {
        self.lock().permissions
    }

    async fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    async fn paired_devices(&self) -> Result<Vec<DeviceIdentity>> {
        Ok(self.lock().devices.clone())
    }

    async fn open(&self, address: &str) -> Result<DuplexStream> {
        let step = {
            let mut state = self.lock();
            state.opens.push(Instant::now());
            state.script.pop_front().unwrap_or(OpenScript::Connect)
        };

        match step {
            OpenScript::Connect => {
                let (link_end, peer_end) = tokio::io::duplex(PIPE_CAPACITY);
                let (read, write) = tokio::io::split(peer_end);
                let _ = self.peer_tx.send(MockPeer {
                    reader: BufReader::new(read),
                    writer: write,
                });
                debug!("Mock radio connected to {}", address);
                Ok(link_end)
            }
            OpenScript::Fail(message) => Err(Error::link(message)),
            OpenScript::PermissionDenied => Err(Error::PermissionDenied),
            OpenScript::Hang => std::future::pending().await,
        }
    }
}
