//! Serial-port radio adapter
//!
//! On Linux a paired wearable is bound to an RFCOMM tty (`rfcomm bind`), which
//! shows up as `/dev/rfcommN`. This adapter treats a configured list of such
//! device nodes as the paired set and opens them as plain read/write files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};

use guardian_core::prelude::*;
use guardian_core::DeviceIdentity;

use crate::radio::RadioAdapter;

/// Where the kernel lists Bluetooth controllers
const SYSFS_BLUETOOTH: &str = "/sys/class/bluetooth";

/// A paired device bound to a serial device node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialDevice {
    pub identity: DeviceIdentity,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RfcommRadio {
    devices: Vec<SerialDevice>,
    controllers_dir: PathBuf,
}

impl RfcommRadio {
    pub fn new(devices: Vec<SerialDevice>) -> Self {
        Self {
            devices,
            controllers_dir: PathBuf::from(SYSFS_BLUETOOTH),
        }
    }

    /// Look for radio controllers somewhere other than sysfs
    pub fn with_controllers_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.controllers_dir = dir.into();
        self
    }

    fn path_for(&self, address: &str) -> Option<&Path> {
        self.devices
            .iter()
            .find(|d| d.identity.address.eq_ignore_ascii_case(address))
            .map(|d| d.path.as_path())
    }
}

impl RadioAdapter for RfcommRadio {
    type Stream = File;

    async fn permissions_granted(&self) -> bool {
        // Device node access is checked per open; an unreadable node surfaces
        // as PermissionDenied there.
        true
    }

    async fn is_enabled(&self) -> bool {
        match tokio::fs::read_dir(&self.controllers_dir).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
            // No controller listing at all (containers, non-Linux): serial
            // paths may still be usable.
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Cannot read {}: {}", self.controllers_dir.display(), e);
                true
            }
        }
    }

    async fn paired_devices(&self) -> Result<Vec<DeviceIdentity>> {
        Ok(self.devices.iter().map(|d| d.identity.clone()).collect())
    }

    async fn open(&self, address: &str) -> Result<File> {
        let path = self
            .path_for(address)
            .ok_or_else(|| Error::device_not_found(address))?;

        debug!("Opening {} for {}", path.display(), address);

        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => Error::PermissionDenied,
                _ => Error::link(format!("Failed to open {}: {}", path.display(), e)),
            })
    }
}
