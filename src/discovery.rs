//! Device discovery
//!
//! Lists candidate adapters and probes each one with a transient session to
//! learn its channel count and whether someone else already holds it.

use log::{debug, warn};

use crate::device::GsUsb;
use crate::error::{GsUsbError, Result};
use crate::transport::UsbBackend;

/// Whether a discovered device could be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAvailability {
    /// The probe opened the device and it answered the protocol
    Available,
    /// The probe failed, most likely because another session holds the device
    InUse,
}

/// One discovered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Transport path, usable with [`GsUsb::open`]
    pub path: String,
    /// Channel count reported by the probe; 0 when the device is in use
    pub channel_count: u8,
    /// Probe outcome
    pub state: DeviceAvailability,
}

impl DeviceDescriptor {
    /// Check if the device can be opened
    pub fn is_available(&self) -> bool {
        self.state == DeviceAvailability::Available
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state {
            DeviceAvailability::Available => {
                write!(f, "{} ({} channel(s))", self.path, self.channel_count)
            }
            DeviceAvailability::InUse => write!(f, "{} (in use)", self.path),
        }
    }
}

/// Result of [`find_devices`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    /// Probed devices, at most `max_results`, in enumeration order
    pub devices: Vec<DeviceDescriptor>,
    /// Number of interfaces enumerated, including those not probed
    pub total: usize,
}

impl DeviceList {
    /// Number of probed devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no device was probed
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices that can be opened
    pub fn available(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter().filter(|d| d.is_available())
    }
}

/// Enumerate adapters and probe up to `max_results` of them
///
/// Each probe opens the device and closes it again straight away. Interfaces
/// past `max_results` are counted in [`DeviceList::total`] but not probed.
/// Finding no adapter at all is not an error.
pub fn find_devices<B: UsbBackend>(backend: &B, max_results: usize) -> Result<DeviceList> {
    let interfaces = backend.interfaces().map_err(GsUsbError::Enumeration)?;
    let total = interfaces.len();

    let mut devices = Vec::with_capacity(total.min(max_results));
    for interface in interfaces.iter().take(max_results) {
        let path = backend
            .device_path(interface)
            .map_err(GsUsbError::DevicePath)?;
        devices.push(probe(backend, path));
    }

    debug!("Discovery: {} device(s), {} probed", total, devices.len());
    Ok(DeviceList { devices, total })
}

fn probe<B: UsbBackend>(backend: &B, path: String) -> DeviceDescriptor {
    match GsUsb::<B::Transport>::open(backend, &path) {
        Ok(session) => {
            let channel_count = session.channel_count();
            session.close();
            debug!("Probed {}: {} channel(s)", path, channel_count);
            DeviceDescriptor {
                path,
                channel_count,
                state: DeviceAvailability::Available,
            }
        }
        Err(e) => {
            warn!("Probe of {} failed, reporting it in use: {}", path, e);
            DeviceDescriptor {
                path,
                channel_count: 0,
                state: DeviceAvailability::InUse,
            }
        }
    }
}
