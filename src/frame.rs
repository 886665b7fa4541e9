//! GS-USB CAN frame implementation
//!
//! This module provides the `GsUsbFrame` struct, the fixed 24-byte record
//! exchanged with the device over the bulk endpoints.

use crate::constants::{
    CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_MAX_DLEN, CAN_RTR_FLAG, CAN_SFF_MASK,
    GS_CAN_FLAG_OVERFLOW, GS_USB_ECHO_ID, GS_USB_FRAME_SIZE, GS_USB_RX_ECHO_ID,
};

/// Provenance of a frame read from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Frame received off the bus
    Receive,
    /// Transmit confirmation of a frame sent by the host
    Echo,
}

/// GS-USB CAN frame
///
/// Payload bytes beyond `can_dlc` are don't-care.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GsUsbFrame {
    /// Echo ID (0 for TX, 0xFFFFFFFF for RX)
    pub echo_id: u32,
    /// CAN identifier (with flags like CAN_EFF_FLAG if needed)
    pub can_id: u32,
    /// Data length code
    pub can_dlc: u8,
    /// CAN channel
    pub channel: u8,
    /// Frame flags
    pub flags: u8,
    /// Reserved byte
    pub reserved: u8,
    /// Frame data
    pub data: [u8; CAN_MAX_DLEN],
    /// Hardware timestamp in microseconds
    pub timestamp_us: u32,
}

impl Default for GsUsbFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl GsUsbFrame {
    /// Create a new empty CAN frame
    pub fn new() -> Self {
        Self {
            echo_id: GS_USB_ECHO_ID,
            can_id: 0,
            can_dlc: 0,
            channel: 0,
            flags: 0,
            reserved: 0,
            data: [0u8; CAN_MAX_DLEN],
            timestamp_us: 0,
        }
    }

    /// Create a new CAN frame with the specified ID and data
    ///
    /// Data beyond 8 bytes is truncated.
    pub fn with_data(can_id: u32, data: &[u8]) -> Self {
        let mut frame = Self::new();
        frame.can_id = can_id;
        let len = data.len().min(CAN_MAX_DLEN);
        frame.data[..len].copy_from_slice(&data[..len]);
        frame.can_dlc = len as u8;
        frame
    }

    /// Get the arbitration ID (without flags)
    pub fn arbitration_id(&self) -> u32 {
        if self.is_extended_id() {
            self.can_id & CAN_EFF_MASK
        } else {
            self.can_id & CAN_SFF_MASK
        }
    }

    /// Check if this is an extended ID frame (29-bit)
    pub fn is_extended_id(&self) -> bool {
        (self.can_id & CAN_EFF_FLAG) != 0
    }

    /// Check if this is a remote transmission request
    pub fn is_remote_frame(&self) -> bool {
        (self.can_id & CAN_RTR_FLAG) != 0
    }

    /// Check if this is an error frame
    pub fn is_error_frame(&self) -> bool {
        (self.can_id & CAN_ERR_FLAG) != 0
    }

    /// Check if the device dropped frames before this one
    pub fn has_overflow(&self) -> bool {
        (self.flags & GS_CAN_FLAG_OVERFLOW) != 0
    }

    /// Classify the frame by its echo ID
    pub fn frame_type(&self) -> FrameType {
        if self.echo_id == GS_USB_RX_ECHO_ID {
            FrameType::Receive
        } else {
            FrameType::Echo
        }
    }

    /// Check if this is an echo frame (TX confirmation from device)
    pub fn is_echo_frame(&self) -> bool {
        self.frame_type() == FrameType::Echo
    }

    /// Check if this is a received frame (from CAN bus)
    pub fn is_rx_frame(&self) -> bool {
        self.frame_type() == FrameType::Receive
    }

    /// Get timestamp in seconds
    pub fn timestamp(&self) -> f64 {
        self.timestamp_us as f64 / 1_000_000.0
    }

    /// Get actual data length based on DLC
    pub fn data_length(&self) -> usize {
        (self.can_dlc as usize).min(CAN_MAX_DLEN)
    }

    /// Get frame data as a slice
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_length()]
    }

    /// Pack frame into its wire representation
    pub fn pack(&self) -> [u8; GS_USB_FRAME_SIZE] {
        let mut buf = [0u8; GS_USB_FRAME_SIZE];

        // Header: echo_id (4) + can_id (4) + can_dlc (1) + channel (1) + flags (1) + reserved (1)
        buf[0..4].copy_from_slice(&self.echo_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.can_id.to_le_bytes());
        buf[8] = self.can_dlc;
        buf[9] = self.channel;
        buf[10] = self.flags;
        buf[11] = self.reserved;
        buf[12..20].copy_from_slice(&self.data);
        buf[20..24].copy_from_slice(&self.timestamp_us.to_le_bytes());

        buf
    }

    /// Create a frame from its wire representation
    pub fn unpack(buf: &[u8; GS_USB_FRAME_SIZE]) -> Self {
        let mut data = [0u8; CAN_MAX_DLEN];
        data.copy_from_slice(&buf[12..20]);

        Self {
            echo_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            can_id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            can_dlc: buf[8],
            channel: buf[9],
            flags: buf[10],
            reserved: buf[11],
            data,
            timestamp_us: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
        }
    }
}

impl std::fmt::Display for GsUsbFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data_str = if self.is_remote_frame() {
            "remote request".to_string()
        } else {
            self.data()
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" ")
        };

        write!(
            f,
            "{:>8X}   [{}]  {}",
            self.arbitration_id(),
            self.data_length(),
            data_str
        )
    }
}

impl std::fmt::Debug for GsUsbFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GsUsbFrame")
            .field("echo_id", &format_args!("0x{:08X}", self.echo_id))
            .field("can_id", &format_args!("0x{:08X}", self.can_id))
            .field("can_dlc", &self.can_dlc)
            .field("channel", &self.channel)
            .field("flags", &format_args!("0x{:02X}", self.flags))
            .field("data", &self.data())
            .field("frame_type", &self.frame_type())
            .field("timestamp_us", &self.timestamp_us)
            .finish()
    }
}
