//! GS-USB protocol structures
//!
//! Fixed-layout payloads carried by the vendor control requests. All fields
//! are little-endian, which is the byte order the host announces with
//! [`HostConfig`].

use crate::constants::GS_USB_HOST_FORMAT_MARKER;

fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// HOST_FORMAT payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Byte-order marker, always 0x0000BEEF in host order
    pub byte_order: u32,
}

impl HostConfig {
    /// Packed size in bytes
    pub const SIZE: usize = 4;

    /// Pack into bytes for USB transfer
    pub fn pack(&self) -> [u8; Self::SIZE] {
        self.byte_order.to_le_bytes()
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            byte_order: GS_USB_HOST_FORMAT_MARKER,
        }
    }
}

/// Channel mode requested with GS_USB_BREQ_MODE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CanMode {
    /// Reset a channel, turning it off
    Reset = 0,
    /// Start a channel
    Start = 1,
}

/// Device mode configuration
///
/// Used to start or stop the CAN channel with specific mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMode {
    /// Mode value (0 = reset/stop, 1 = start)
    pub mode: u32,
    /// Mode flags (combination of GS_CAN_MODE_* constants)
    pub flags: u32,
}

impl DeviceMode {
    /// Packed size in bytes
    pub const SIZE: usize = 8;

    /// Create a new device mode configuration
    pub fn new(mode: CanMode, flags: u32) -> Self {
        Self {
            mode: mode as u32,
            flags,
        }
    }

    /// Pack into bytes for USB transfer
    pub fn pack(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.mode.to_le_bytes());
        buf[4..8].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mode: {}\nFlags: 0x{:08x}", self.mode, self.flags)
    }
}

/// CAN bit timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBitTiming {
    /// Propagation segment (typically 1)
    pub prop_seg: u32,
    /// Phase segment 1
    pub phase_seg1: u32,
    /// Phase segment 2
    pub phase_seg2: u32,
    /// Synchronization jump width
    pub sjw: u32,
    /// Baud rate prescaler
    pub brp: u32,
}

impl DeviceBitTiming {
    /// Packed size in bytes
    pub const SIZE: usize = 20;

    /// Create a new bit timing configuration
    pub fn new(prop_seg: u32, phase_seg1: u32, phase_seg2: u32, sjw: u32, brp: u32) -> Self {
        Self {
            prop_seg,
            phase_seg1,
            phase_seg2,
            sjw,
            brp,
        }
    }

    /// Number of time quanta per bit, including the sync segment
    pub fn time_quanta(&self) -> u32 {
        1u32.saturating_add(self.prop_seg)
            .saturating_add(self.phase_seg1)
            .saturating_add(self.phase_seg2)
    }

    /// Resulting bitrate for a given CAN clock
    ///
    /// `None` when the prescaler is zero or the divisor overflows.
    pub fn bitrate(&self, clock_hz: u32) -> Option<u32> {
        let quanta = [self.prop_seg, self.phase_seg1, self.phase_seg2]
            .iter()
            .try_fold(1u32, |acc, &seg| acc.checked_add(seg))?;
        clock_hz.checked_div(self.brp.checked_mul(quanta)?)
    }

    /// Pack into bytes for USB transfer
    pub fn pack(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.prop_seg.to_le_bytes());
        buf[4..8].copy_from_slice(&self.phase_seg1.to_le_bytes());
        buf[8..12].copy_from_slice(&self.phase_seg2.to_le_bytes());
        buf[12..16].copy_from_slice(&self.sjw.to_le_bytes());
        buf[16..20].copy_from_slice(&self.brp.to_le_bytes());
        buf
    }
}

impl std::fmt::Display for DeviceBitTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Prop Seg: {}\nPhase Seg 1: {}\nPhase Seg 2: {}\nSJW: {}\nBRP: {}",
            self.prop_seg, self.phase_seg1, self.phase_seg2, self.sjw, self.brp
        )
    }
}

/// Device configuration
///
/// Contains the channel count and version information reported by
/// GS_USB_BREQ_DEVICE_CONFIG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Reserved byte 1
    pub reserved1: u8,
    /// Reserved byte 2
    pub reserved2: u8,
    /// Reserved byte 3
    pub reserved3: u8,
    /// Interface count (number of CAN channels - 1)
    pub icount: u8,
    /// Firmware version (multiply by 0.1 for actual version)
    pub sw_version: u32,
    /// Hardware version (multiply by 0.1 for actual version)
    pub hw_version: u32,
}

impl DeviceConfig {
    /// Packed size in bytes
    pub const SIZE: usize = 12;

    /// Unpack from bytes received via USB
    pub fn unpack(data: &[u8; Self::SIZE]) -> Self {
        Self {
            reserved1: data[0],
            reserved2: data[1],
            reserved3: data[2],
            icount: data[3],
            sw_version: le_u32(data, 4),
            hw_version: le_u32(data, 8),
        }
    }

    /// Get the number of CAN channels
    pub fn channel_count(&self) -> u8 {
        self.icount.saturating_add(1)
    }

    /// Get firmware version as a float
    pub fn firmware_version(&self) -> f32 {
        self.sw_version as f32 / 10.0
    }

    /// Get hardware version as a float
    pub fn hardware_version(&self) -> f32 {
        self.hw_version as f32 / 10.0
    }
}

impl std::fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "iCount: {}\nFW Version: {:.1}\nHW Version: {:.1}",
            self.icount,
            self.firmware_version(),
            self.hardware_version()
        )
    }
}

/// Bit timing constants reported by GS_USB_BREQ_BT_CONST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapability {
    /// Feature bitfield (combination of GS_CAN_FEATURE_* constants)
    pub feature: u32,
    /// CAN clock frequency in Hz
    pub fclk_can: u32,
    /// Minimum TSEG1 value
    pub tseg1_min: u32,
    /// Maximum TSEG1 value
    pub tseg1_max: u32,
    /// Minimum TSEG2 value
    pub tseg2_min: u32,
    /// Maximum TSEG2 value
    pub tseg2_max: u32,
    /// Maximum SJW value
    pub sjw_max: u32,
    /// Minimum BRP value
    pub brp_min: u32,
    /// Maximum BRP value
    pub brp_max: u32,
    /// BRP increment value
    pub brp_inc: u32,
}

impl DeviceCapability {
    /// Packed size in bytes
    pub const SIZE: usize = 40;

    /// Unpack from BT_CONST response (10 x uint32)
    pub fn unpack(data: &[u8; Self::SIZE]) -> Self {
        Self {
            feature: le_u32(data, 0),
            fclk_can: le_u32(data, 4),
            tseg1_min: le_u32(data, 8),
            tseg1_max: le_u32(data, 12),
            tseg2_min: le_u32(data, 16),
            tseg2_max: le_u32(data, 20),
            sjw_max: le_u32(data, 24),
            brp_min: le_u32(data, 28),
            brp_max: le_u32(data, 32),
            brp_inc: le_u32(data, 36),
        }
    }

    /// Check whether the device reports a feature bit
    pub fn supports(&self, feature: u32) -> bool {
        self.feature & feature == feature
    }

    /// Get clock frequency in MHz
    pub fn clock_mhz(&self) -> f32 {
        self.fclk_can as f32 / 1_000_000.0
    }
}

impl std::fmt::Display for DeviceCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Feature bitfield: 0x{:08x}\n\
             Clock: {} Hz ({:.1} MHz)\n\
             TSEG1: {} - {}\n\
             TSEG2: {} - {}\n\
             SJW (max): {}\n\
             BRP: {} - {} (inc: {})",
            self.feature,
            self.fclk_can,
            self.clock_mhz(),
            self.tseg1_min,
            self.tseg1_max,
            self.tseg2_min,
            self.tseg2_max,
            self.sjw_max,
            self.brp_min,
            self.brp_max,
            self.brp_inc
        )
    }
}
