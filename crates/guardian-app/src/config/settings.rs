//! Settings parser for .guardian/config.toml

use std::path::{Path, PathBuf};

use guardian_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const GUARDIAN_DIR: &str = ".guardian";

const DEFAULT_CONFIG: &str = r#"# Fall Guardian Configuration

[link]
connect_timeout_secs = 10   # Bound on one connect attempt
quiet_period_secs = 30      # Silence before the link counts as lost
backoff_base_secs = 1
backoff_cap_secs = 30

[escalation]
dedup_window_secs = 60
retry_delays_secs = [2, 5]  # SMS and push retries
audit_retry_delays_secs = [1, 2, 5]
policy_timeout_secs = 3

[check_in]
timeout_secs = 120

[user]
id = "local"

# [location]
# fixed = "40.0,-73.0"

# [[devices]]
# address = "AA:BB:CC:DD:EE:FF"
# name = "Guardian Watch"
# path = "/dev/rfcomm0"

# [policy]
# call_enabled = true
# sms_enabled = true
# in_app_enabled = true
# sms_template = "EMERGENCY: Fall detected! Location: {location}."
# target_phone = "+15551234567"
"#;

/// Path of the config file under `project_path`
pub fn config_path(project_path: &Path) -> PathBuf {
    project_path.join(GUARDIAN_DIR).join(CONFIG_FILENAME)
}

/// Load settings from `.guardian/config.toml`, falling back to defaults
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = config_path(project_path);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Reject settings the pipeline cannot run with
pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.user.id.trim().is_empty() {
        return Err(Error::config("user.id must not be empty"));
    }
    if settings.escalation.dedup_window_secs == 0 {
        return Err(Error::config("escalation.dedup_window_secs must be at least 1"));
    }
    let link = &settings.link;
    if link.backoff_base_secs == 0 || link.backoff_cap_secs < link.backoff_base_secs {
        return Err(Error::config(
            "link.backoff_base_secs must be positive and not exceed backoff_cap_secs",
        ));
    }
    if link.quiet_period_secs == 0 || link.connect_timeout_secs == 0 {
        return Err(Error::config(
            "link.quiet_period_secs and link.connect_timeout_secs must be positive",
        ));
    }
    if let Some(fixed) = &settings.location.fixed {
        if settings.location.fixed_coordinates().is_none() {
            return Err(Error::config(format!(
                "location.fixed is not a valid \"lat,lng\" pair: {}",
                fixed
            )));
        }
    }
    Ok(())
}

/// Create a commented default config file if none exists
pub fn init_config_dir(project_path: &Path) -> Result<PathBuf> {
    let guardian_dir = project_path.join(GUARDIAN_DIR);

    if !guardian_dir.exists() {
        std::fs::create_dir_all(&guardian_dir)
            .map_err(|e| Error::config(format!("Failed to create .guardian dir: {}", e)))?;
    }

    let config_path = guardian_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG)?;
        info!("Created default config at {:?}", config_path);
    }

    Ok(config_path)
}
