//! Fall Guardian - wearable fall detection link and alert escalation
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;

use fall_guardian::headless::HeadlessEvent;
use fall_guardian::HeadlessOptions;
use guardian_app::config::{init_config_dir, load_settings};
use guardian_link::{discover_paired_devices, RfcommRadio};

/// Fall Guardian - wearable fall detection link and alert escalation
#[derive(Parser, Debug)]
#[command(name = "fall-guardian")]
#[command(about = "Wearable fall detection link and alert escalation", long_about = None)]
struct Args {
    /// Directory holding .guardian/config.toml
    #[arg(long, value_name = "DIR")]
    config: Option<PathBuf>,

    /// Connect to this device address on start
    #[arg(long, value_name = "ADDRESS")]
    device: Option<String>,

    /// Override the configured user id
    #[arg(long)]
    user: Option<String>,

    /// Print paired devices as JSON lines and exit
    #[arg(long)]
    list_devices: bool,

    /// Write a default .guardian/config.toml and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let config_dir = args
        .config
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if args.init_config {
        let path = init_config_dir(&config_dir)?;
        eprintln!("Wrote {}", path.display());
        return Ok(());
    }

    guardian_core::logging::init()?;

    if args.list_devices {
        let settings = load_settings(&config_dir);
        let radio = RfcommRadio::new(settings.serial_devices());
        let devices = discover_paired_devices(&radio).await?;
        if devices.is_empty() {
            eprintln!("No paired devices found.");
            eprintln!();
            eprintln!("Pair the wearable in your Bluetooth settings, bind it to an");
            eprintln!("RFCOMM port and list it under [[devices]] in .guardian/config.toml:");
            eprintln!();
            eprintln!("  [[devices]]");
            eprintln!("  address = \"AA:BB:CC:DD:EE:FF\"");
            eprintln!("  path = \"/dev/rfcomm0\"");
            std::process::exit(1);
        }
        for device in &devices {
            HeadlessEvent::device_detected(device).emit();
        }
        return Ok(());
    }

    fall_guardian::run_headless(HeadlessOptions {
        config_dir,
        device: args.device,
        user: args.user,
    })
    .await?;
    Ok(())
}
