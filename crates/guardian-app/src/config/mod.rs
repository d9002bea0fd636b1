//! Configuration file parsing for Fall Guardian
//!
//! Supports:
//! - `.guardian/config.toml` - Link timing, escalation retries, check-in
//!   timeout, user id, paired serial devices and a seed policy

pub mod settings;
pub mod types;

pub use settings::{config_path, init_config_dir, load_settings, validate_settings};
pub use types::*;
