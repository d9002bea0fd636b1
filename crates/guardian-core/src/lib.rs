//! # guardian-core - Core Domain Types
//!
//! Foundation crate for Fall Guardian. Provides domain types, error handling,
//! and logging setup shared by the link and the escalation pipeline.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing, toml).
//!
//! ## Public API
//!
//! ### Frames (`frame`)
//! - [`Frame`] - A decoded wearable wire message (Fall, CheckInAck, Heartbeat, Unknown)
//!
//! ### Events (`event`)
//! - [`FallEvent`] - Canonical alert record with a stable [`EventId`]
//! - [`EventKind`], [`EventSource`] - What happened and where it came from
//! - [`Location`], [`Coordinates`] - Validated lat/lng or "Unknown"
//!
//! ### Delivery (`delivery`)
//! - [`Channel`] - In-app, SMS, call, push
//! - [`DeliveryAttempt`], [`DeliveryStatus`], [`DeliveryOutcome`] - Per-channel bookkeeping
//!
//! ### Link & Check-in (`types`)
//! - [`LinkState`], [`DeviceSession`], [`DeviceIdentity`]
//! - [`CheckInSession`], [`CheckInOutcome`]
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with [`ErrorCategory`] and `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use guardian_core::prelude::*;
//! ```

pub mod delivery;
pub mod error;
pub mod event;
pub mod frame;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all Fall Guardian crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use delivery::{Channel, DeliveryAttempt, DeliveryOutcome, DeliveryStatus};
pub use error::{Error, ErrorCategory, Result, ResultExt};
pub use event::{
    Coordinates, EventId, EventKind, EventSource, FallEvent, Location, UNKNOWN_LOCATION,
};
pub use frame::Frame;
pub use types::{
    CheckInOutcome, CheckInSession, DeviceIdentity, DeviceSession, LinkState, UNNAMED_DEVICE,
};
