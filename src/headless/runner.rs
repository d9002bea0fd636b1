//! Headless mode runner - stdin commands in, JSON events out
//!
//! Builds the pipeline from `.guardian/config.toml`, forwards every
//! [`GuardianEvent`] to stdout and executes one command per stdin line until
//! `quit` or end of input.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use guardian_app::config::validate_settings;
use guardian_app::{
    load_settings, EventRepository, Guardian, GuardianEvent, LocationProvider, MemoryRepository,
};
use guardian_core::prelude::*;
use guardian_core::{Coordinates, EventId};
use guardian_link::{LinkManager, RadioAdapter, RfcommRadio};

use super::drivers::headless_drivers;
use super::{EventSink, HeadlessEvent};

/// Capacity of the stdin command queue
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// How the binary was invoked
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    /// Directory holding `.guardian/config.toml`
    pub config_dir: PathBuf,
    /// Connect to this address on start
    pub device: Option<String>,
    /// Overrides `[user] id`
    pub user: Option<String>,
}

/// One stdin command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List paired devices
    Devices,
    Scan,
    StopScan,
    /// Connect to an address, or the only/first paired device
    Connect(Option<String>),
    Disconnect,
    /// A push relay payload (JSON)
    Push(String),
    SimulateFall,
    Panic,
    CheckIn,
    /// Dismiss one alert, or all of them
    Dismiss(Option<String>),
    Token(String),
    Quit,
}

/// Parse one stdin line. `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> std::result::Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    let command = match (word, arg) {
        ("devices", None) => Command::Devices,
        ("scan", None) => Command::Scan,
        ("stop-scan", None) => Command::StopScan,
        ("connect", address) => Command::Connect(address),
        ("disconnect", None) => Command::Disconnect,
        ("push", Some(payload)) => Command::Push(payload),
        ("fall" | "simulate", None) => Command::SimulateFall,
        ("panic", None) => Command::Panic,
        ("checkin" | "check-in", None) => Command::CheckIn,
        ("dismiss", event_id) => Command::Dismiss(event_id),
        ("token", Some(token)) => Command::Token(token),
        ("q" | "quit", None) => Command::Quit,
        ("push" | "token", None) => return Err(format!("{} needs an argument", word)),
        _ => return Err(format!("Unknown command: {}", line)),
    };
    Ok(Some(command))
}

/// Location provider backed by `[location] fixed`
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredLocation(pub Option<Coordinates>);

impl LocationProvider for ConfiguredLocation {
    async fn current_location(&self) -> Result<Coordinates> {
        self.0
            .ok_or_else(|| Error::config("no [location] fixed coordinates configured"))
    }
}

/// Run the pipeline with the RFCOMM radio, reading commands from stdin
pub async fn run_headless(options: HeadlessOptions) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("Fall Guardian starting in HEADLESS mode");
    info!("Config: {}", options.config_dir.display());
    info!("═══════════════════════════════════════════════════════");

    let mut settings = load_settings(&options.config_dir);
    if let Some(user) = &options.user {
        settings.user.id = user.clone();
    }
    if let Err(e) = validate_settings(&settings) {
        HeadlessEvent::error(e.to_string(), true).emit();
        return Err(e);
    }

    let radio = RfcommRadio::new(settings.serial_devices());
    let (link, link_events) = LinkManager::new(radio, settings.link.to_link_config());
    let repository =
        MemoryRepository::with_default_policy(settings.policy.clone().unwrap_or_default());
    let guardian = Arc::new(Guardian::new(
        Arc::new(link),
        Arc::new(repository),
        headless_drivers(EventSink::Stdout),
        ConfiguredLocation(settings.location.fixed_coordinates()),
        settings.guardian_config(),
    ));

    let forwarder = tokio::spawn(forward_events(guardian.subscribe(), EventSink::Stdout));
    let pipeline = tokio::spawn(Arc::clone(&guardian).run(link_events));

    let (command_tx, mut command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        spawn_stdin_reader_blocking(command_tx);
    });

    if let Some(address) = options.device {
        execute(&*guardian, &EventSink::Stdout, Command::Connect(Some(address))).await;
    }

    while let Some(command) = command_rx.recv().await {
        if !execute(&*guardian, &EventSink::Stdout, command).await {
            break;
        }
    }

    guardian.shutdown();
    if let Err(e) = pipeline.await {
        error!("Pipeline task failed: {}", e);
    }
    if let Err(e) = forwarder.await {
        error!("Event forwarder failed: {}", e);
    }

    info!("Fall Guardian headless mode exiting");
    Ok(())
}

/// Forward pipeline events to `sink` until shutdown
pub async fn forward_events(mut events: broadcast::Receiver<GuardianEvent>, sink: EventSink) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let done = matches!(event, GuardianEvent::Shutdown);
                sink.emit(HeadlessEvent::from(&event));
                if done {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Headless output fell behind, {} event(s) dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Execute one command. Returns false when the runner should stop.
pub async fn execute<A, R, P>(
    guardian: &Guardian<A, R, P>,
    sink: &EventSink,
    command: Command,
) -> bool
where
    A: RadioAdapter + Sync + 'static,
    R: EventRepository + Send + Sync + 'static,
    P: LocationProvider + Send + Sync + 'static,
{
    let result = match command {
        Command::Quit => {
            info!("Quit requested");
            return false;
        }
        Command::Devices => guardian.link().list_paired_devices().await.map(|devices| {
            report_devices(sink, &devices);
        }),
        Command::Scan => guardian.link().scan().await.map(|devices| {
            report_devices(sink, &devices);
        }),
        Command::StopScan => {
            guardian.link().stop_scan().await;
            Ok(())
        }
        Command::Connect(address) => connect(guardian, address).await,
        Command::Disconnect => guardian.link().disconnect().await,
        Command::Push(payload) => guardian.handle_push(&payload).await.map(|_| ()),
        Command::SimulateFall => {
            guardian.simulate_fall().await;
            Ok(())
        }
        Command::Panic => {
            guardian.panic().await;
            Ok(())
        }
        Command::CheckIn => guardian.issue_check_in().await.map(|_| ()),
        Command::Dismiss(event_id) => {
            let event_id = event_id.as_deref().map(EventId::from);
            guardian.dismiss(event_id.as_ref());
            Ok(())
        }
        Command::Token(token) => guardian.register_push_token(&token).await,
    };

    if let Err(e) = result {
        warn!("Command failed: {}", e);
        sink.emit(HeadlessEvent::error(e.to_string(), false));
    }
    true
}

fn report_devices(sink: &EventSink, devices: &[guardian_core::DeviceIdentity]) {
    if devices.is_empty() {
        sink.emit(HeadlessEvent::error(
            "No paired devices. Pair the wearable in your Bluetooth settings first.",
            false,
        ));
    }
    for device in devices {
        sink.emit(HeadlessEvent::device_detected(device));
    }
}

async fn connect<A, R, P>(guardian: &Guardian<A, R, P>, address: Option<String>) -> Result<()>
where
    A: RadioAdapter + Sync + 'static,
    R: EventRepository + Send + Sync + 'static,
    P: LocationProvider + Send + Sync + 'static,
{
    let address = match address {
        Some(address) => address,
        None => {
            let devices = guardian.link().list_paired_devices().await?;
            let device = devices
                .first()
                .ok_or_else(|| Error::link("no paired devices to connect to"))?;
            info!("Connecting to first paired device {}", device.display_name());
            device.address.clone()
        }
    };
    guardian.link().connect(&address).await
}

/// Read stdin commands on a blocking thread
fn spawn_stdin_reader_blocking(command_tx: mpsc::Sender<Command>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        match parse_command(&line) {
            Ok(Some(command)) => {
                let quit = command == Command::Quit;
                if command_tx.blocking_send(command).is_err() || quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => {
                warn!("{}", message);
                HeadlessEvent::error(message, false).emit();
            }
        }
    }

    // End of input behaves like quit.
    let _ = command_tx.blocking_send(Command::Quit);
    info!("Stdin reader exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("scan"), Ok(Some(Command::Scan)));
        assert_eq!(parse_command("  fall  "), Ok(Some(Command::SimulateFall)));
        assert_eq!(parse_command("check-in"), Ok(Some(Command::CheckIn)));
        assert_eq!(parse_command("q"), Ok(Some(Command::Quit)));
        assert_eq!(parse_command(""), Ok(None));
    }

    #[test]
    fn test_parse_commands_with_arguments() {
        assert_eq!(
            parse_command("connect AA:BB:CC:DD:EE:FF"),
            Ok(Some(Command::Connect(Some("AA:BB:CC:DD:EE:FF".into()))))
        );
        assert_eq!(parse_command("connect"), Ok(Some(Command::Connect(None))));
        assert_eq!(
            parse_command(r#"push {"location": "1.0,2.0"}"#),
            Ok(Some(Command::Push(r#"{"location": "1.0,2.0"}"#.into())))
        );
        assert_eq!(parse_command("dismiss"), Ok(Some(Command::Dismiss(None))));
        assert_eq!(
            parse_command("token abc123"),
            Ok(Some(Command::Token("abc123".into())))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("push").is_err());
        assert!(parse_command("reboot").is_err());
        assert!(parse_command("scan now").is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = guardian_app::config::init_config_dir(dir.path()).unwrap();
        std::fs::write(&config_path, "[location]\nfixed = \"north pole\"\n").unwrap();

        let result = run_headless(HeadlessOptions {
            config_dir: dir.path().to_path_buf(),
            device: None,
            user: None,
        })
        .await;
        let err = tokio_test::assert_err!(result);
        assert!(err.to_string().contains("location.fixed"));
    }

    #[tokio::test]
    async fn test_configured_location() {
        let location = ConfiguredLocation(Coordinates::new(1.0, 2.0));
        assert_eq!(location.current_location().await.unwrap().lat, 1.0);
        assert!(ConfiguredLocation(None).current_location().await.is_err());
    }
}
