//! Platform radio seam
//!
//! The Link Manager never talks to Bluetooth directly. It goes through a
//! [`RadioAdapter`], which answers permission/radio-state questions, lists the
//! OS paired-device set, and opens a byte stream to one device.

use tokio::io::{AsyncRead, AsyncWrite};

use guardian_core::prelude::*;
use guardian_core::DeviceIdentity;

/// Access to the OS short-range radio.
#[trait_variant::make(RadioAdapter: Send)]
pub trait LocalRadioAdapter {
    /// Duplex byte stream to a connected device
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Whether the app holds the permissions needed to use the radio
    async fn permissions_granted(&self) -> bool;

    /// Whether the radio is switched on
    async fn is_enabled(&self) -> bool;

    /// Devices already paired at the OS level
    async fn paired_devices(&self) -> Result<Vec<DeviceIdentity>>;

    /// Open a serial-style stream to the device at `address`
    async fn open(&self, address: &str) -> Result<Self::Stream>;
}

/// Fail with the matching link error unless the radio is usable.
pub async fn ensure_ready<A: RadioAdapter>(adapter: &A) -> Result<()> {
    if !adapter.permissions_granted().await {
        return Err(Error::PermissionDenied);
    }
    if !adapter.is_enabled().await {
        return Err(Error::RadioDisabled);
    }
    Ok(())
}
