//! # guardian-link - Wearable Link Management
//!
//! Manages the single serial-style link to a paired wearable: the line
//! protocol codec, paired-device discovery, the connect/reconnect state
//! machine, and serialized command writes.
//!
//! Depends on [`guardian_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Link Management
//! - [`LinkManager`] - Owns one device session; connect, disconnect, scan, send commands
//! - [`LinkEvent`] - State changes, decoded frames and surfaced failures
//! - [`LinkConfig`] - Connect timeout, quiet period, backoff base and cap
//! - [`compute_backoff()`] - Reconnect delay for an attempt number
//!
//! ### Protocol
//! - [`decode_line()`] - Decode one line into a [`guardian_core::Frame`]
//! - [`LineDecoder`] - Split a byte stream into decoded frames
//! - [`LinkCommand`], [`CommandSender`] - Outbound commands and the serialized writer handle
//!
//! ### Radio
//! - [`RadioAdapter`] - Seam to the OS radio (permissions, paired set, open stream)
//! - [`RfcommRadio`] - Adapter over RFCOMM serial device nodes
//! - [`discover_paired_devices()`] - List paired devices with a timeout

pub mod commands;
pub mod devices;
pub mod manager;
pub mod protocol;
pub mod radio;
pub mod rfcomm;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use commands::{CommandSender, LinkCommand, DEFAULT_WRITE_TIMEOUT};
pub use devices::{
    discover_paired_devices, discover_paired_devices_with_timeout, find_device, has_devices,
};
pub use manager::{compute_backoff, LinkConfig, LinkEvent, LinkManager};
pub use protocol::{decode_line, encode_line, LineDecoder, MAX_LINE_LEN};
pub use radio::{ensure_ready, LocalRadioAdapter, RadioAdapter};
pub use rfcomm::{RfcommRadio, SerialDevice};
