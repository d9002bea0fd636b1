//! Paired device discovery

use std::time::Duration;

use tokio::time::timeout;

use guardian_core::prelude::*;
use guardian_core::DeviceIdentity;

use crate::radio::{ensure_ready, RadioAdapter};

/// Default timeout for listing paired devices
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// List paired devices with the default timeout
pub async fn discover_paired_devices<A: RadioAdapter>(adapter: &A) -> Result<Vec<DeviceIdentity>> {
    discover_paired_devices_with_timeout(adapter, DISCOVERY_TIMEOUT).await
}

/// List paired devices with a custom timeout
///
/// Fails with `PermissionDenied` or `RadioDisabled` before touching the
/// paired set.
pub async fn discover_paired_devices_with_timeout<A: RadioAdapter>(
    adapter: &A,
    discovery_timeout: Duration,
) -> Result<Vec<DeviceIdentity>> {
    ensure_ready(adapter).await?;

    let devices = timeout(discovery_timeout, adapter.paired_devices())
        .await
        .map_err(|_| {
            Error::link(format!(
                "Listing paired devices timed out after {:?}",
                discovery_timeout
            ))
        })??;

    info!("Found {} paired device(s)", devices.len());
    for device in &devices {
        debug!("  {}", device);
    }

    Ok(devices)
}

/// Find a device by address (case-insensitive, as MAC addresses vary in case)
pub fn find_device<'a>(devices: &'a [DeviceIdentity], address: &str) -> Option<&'a DeviceIdentity> {
    devices
        .iter()
        .find(|d| d.address.eq_ignore_ascii_case(address))
}

/// Check if any devices are paired
pub fn has_devices(devices: &[DeviceIdentity]) -> bool {
    !devices.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_device, MockRadio};

    #[test]
    fn test_find_device_ignores_case() {
        let devices = vec![
            test_device("AA:BB:CC:DD:EE:01", "Watch"),
            test_device("AA:BB:CC:DD:EE:02", "Band"),
        ];

        let found = find_device(&devices, "aa:bb:cc:dd:ee:02").unwrap();
        assert_eq!(found.display_name(), "Band");
        assert!(find_device(&devices, "00:00:00:00:00:00").is_none());
        assert!(has_devices(&devices));
        assert!(!has_devices(&[]));
    }

    #[tokio::test]
    async fn test_discover_lists_paired_set() {
        let radio = MockRadio::with_devices(vec![test_device("AA:BB:CC:DD:EE:01", "Watch")]);
        let devices = discover_paired_devices(&radio).await.unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[tokio::test]
    async fn test_discover_requires_permissions() {
        let radio = MockRadio::new();
        radio.set_permissions(false);
        let err = discover_paired_devices(&radio).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied));
    }

    #[tokio::test]
    async fn test_discover_requires_enabled_radio() {
        let radio = MockRadio::new();
        radio.set_enabled(false);
        let err = discover_paired_devices(&radio).await.unwrap_err();
        assert!(matches!(err, Error::RadioDisabled));
    }

    #[tokio::test]
    async fn test_discover_empty_set_is_ok() {
        let radio = MockRadio::with_devices(vec![]);
        let devices = discover_paired_devices(&radio).await.unwrap();
        assert!(devices.is_empty());
    }
}
