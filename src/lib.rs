//! Fall Guardian Library
//!
//! Headless control surface for the wearable link and escalation pipeline.

pub mod headless;

pub use headless::runner::{run_headless, HeadlessOptions};
