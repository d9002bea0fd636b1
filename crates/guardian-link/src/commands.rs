//! Commands sent to the wearable and the serialized writer handle
//!
//! Every outbound line goes through one [`CommandSender`] owned by the active
//! session, so writes never interleave. Each send waits for the session task
//! to report the write result.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use guardian_core::prelude::*;

/// Default time to wait for a line to be written
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Commands the app can send to the wearable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Ask the wearer to confirm they are okay
    CheckIn,
    /// Arbitrary single-line command
    Raw(String),
}

impl LinkCommand {
    /// Build the wire line (without terminator)
    pub fn build(&self) -> Result<String> {
        match self {
            LinkCommand::CheckIn => Ok("CHECK_IN".to_string()),
            LinkCommand::Raw(text) => {
                if text.contains(['\n', '\r']) {
                    return Err(Error::protocol("command must be a single line"));
                }
                if !text.is_ascii() {
                    return Err(Error::protocol("command must be ASCII"));
                }
                Ok(text.clone())
            }
        }
    }

    /// Get a description for logging
    pub fn description(&self) -> &str {
        match self {
            LinkCommand::CheckIn => "check-in",
            LinkCommand::Raw(_) => "raw",
        }
    }
}

/// A line queued for the session writer
#[derive(Debug)]
pub(crate) struct OutboundLine {
    pub line: String,
    pub description: String,
    pub ack: oneshot::Sender<Result<()>>,
}

/// Handle for sending commands to the active session's writer
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<OutboundLine>,
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl CommandSender {
    pub(crate) fn new(tx: mpsc::Sender<OutboundLine>) -> Self {
        Self { tx }
    }

    /// Create a CommandSender for testing, with the receiving end
    #[cfg(test)]
    fn new_for_test() -> (Self, mpsc::Receiver<OutboundLine>) {
        let (tx, rx) = mpsc::channel(8);
        (Self { tx }, rx)
    }

    /// Send a command and wait until it is written
    pub async fn send(&self, command: &LinkCommand) -> Result<()> {
        self.send_with_timeout(command, DEFAULT_WRITE_TIMEOUT).await
    }

    /// Send a command with custom timeout
    ///
    /// Fails with [`Error::Cancelled`] if the session ends before the write
    /// completes.
    pub async fn send_with_timeout(&self, command: &LinkCommand, timeout: Duration) -> Result<()> {
        let line = command.build()?;
        let (ack_tx, ack_rx) = oneshot::channel();

        debug!("Sending {} command", command.description());

        self.tx
            .send(OutboundLine {
                line,
                description: command.description().to_string(),
                ack: ack_tx,
            })
            .await
            .map_err(|_| Error::channel_send("link writer"))?;

        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => Err(Error::link(format!(
                "Command '{}' timed out after {:?}",
                command.description(),
                timeout
            ))),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_in_builds() {
        assert_eq!(LinkCommand::CheckIn.build().unwrap(), "CHECK_IN");
        assert_eq!(LinkCommand::CheckIn.description(), "check-in");
    }

    #[test]
    fn test_raw_rejects_multiline() {
        let err = LinkCommand::Raw("A\nB".into()).build().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(LinkCommand::Raw("PING".into()).build().is_ok());
    }

    #[tokio::test]
    async fn test_send_waits_for_ack() {
        let (sender, mut rx) = CommandSender::new_for_test();

        let writer = tokio::spawn(async move {
            let outbound = rx.recv().await.unwrap();
            assert_eq!(outbound.line, "CHECK_IN");
            assert_eq!(outbound.description, "check-in");
            outbound.ack.send(Ok(())).unwrap();
        });

        sender.send(&LinkCommand::CheckIn).await.unwrap();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_cancelled_when_ack_dropped() {
        let (sender, mut rx) = CommandSender::new_for_test();

        tokio::spawn(async move {
            let outbound = rx.recv().await.unwrap();
            drop(outbound);
        });

        let err = sender.send(&LinkCommand::CheckIn).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_send_fails_when_writer_gone() {
        let (sender, rx) = CommandSender::new_for_test();
        drop(rx);
        assert!(sender.is_closed());

        let err = sender.send(&LinkCommand::CheckIn).await.unwrap_err();
        assert!(matches!(err, Error::ChannelSend { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out() {
        let (sender, _rx) = CommandSender::new_for_test();
        let err = sender
            .send_with_timeout(&LinkCommand::CheckIn, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
