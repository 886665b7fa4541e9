//! Vendor control requests
//!
//! Marshals the fixed-layout payloads into control transfers on the
//! device's vendor interface. There is no retry logic: a failed transfer
//! fails the calling operation once.

use std::time::Duration;

use log::trace;

use crate::constants::*;
use crate::error::ControlError;
use crate::structures::{DeviceBitTiming, DeviceCapability, DeviceConfig, DeviceMode, HostConfig};
use crate::transport::Transport;

type ControlResult<T> = std::result::Result<T, ControlError>;

/// Control channel bound to one claimed interface
pub struct ControlChannel<'a, T: Transport> {
    transport: &'a T,
    interface_number: u8,
    timeout: Duration,
}

impl<'a, T: Transport> ControlChannel<'a, T> {
    /// Create a control channel over a transport
    pub fn new(transport: &'a T, interface_number: u8, timeout: Duration) -> Self {
        Self {
            transport,
            interface_number,
            timeout,
        }
    }

    /// Announce the host byte order
    pub fn set_host_format(&self) -> ControlResult<()> {
        let host_config = HostConfig::default();
        self.control_out(
            GS_USB_BREQ_HOST_FORMAT,
            1,
            self.interface_number.into(),
            &host_config.pack(),
        )
    }

    /// Enable or disable hardware timestamps in received frames
    pub fn set_timestamp_mode(&self, enable: bool) -> ControlResult<()> {
        self.control_out(
            CANDLELIGHT_TIMESTAMP_ENABLE,
            u16::from(enable),
            self.interface_number.into(),
            &[],
        )
    }

    /// Read the device configuration
    pub fn device_config(&self) -> ControlResult<DeviceConfig> {
        let mut buf = [0u8; DeviceConfig::SIZE];
        self.control_in(
            GS_USB_BREQ_DEVICE_CONFIG,
            1,
            self.interface_number.into(),
            &mut buf,
        )?;
        Ok(DeviceConfig::unpack(&buf))
    }

    /// Read the bit timing constants of a channel
    pub fn bit_timing_const(&self, channel: u16) -> ControlResult<DeviceCapability> {
        let mut buf = [0u8; DeviceCapability::SIZE];
        self.control_in(GS_USB_BREQ_BT_CONST, channel, 0, &mut buf)?;
        Ok(DeviceCapability::unpack(&buf))
    }

    /// Set a channel's mode
    pub fn set_mode(&self, channel: u16, mode: &DeviceMode) -> ControlResult<()> {
        self.control_out(
            GS_USB_BREQ_MODE,
            channel,
            self.interface_number.into(),
            &mode.pack(),
        )
    }

    /// Set a channel's bit timing
    pub fn set_bit_timing(&self, channel: u16, timing: &DeviceBitTiming) -> ControlResult<()> {
        self.control_out(GS_USB_BREQ_BITTIMING, channel, 0, &timing.pack())
    }

    /// Read the device's microsecond timestamp counter
    pub fn timestamp(&self) -> ControlResult<u32> {
        let mut buf = [0u8; 4];
        self.control_in(
            CANDLELIGHT_TIMESTAMP_GET,
            0,
            self.interface_number.into(),
            &mut buf,
        )?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Perform a control OUT transfer
    fn control_out(&self, request: u8, value: u16, index: u16, data: &[u8]) -> ControlResult<()> {
        trace!(
            "Control OUT: request={:#04x}, value={}, index={}, len={}",
            request,
            value,
            index,
            data.len()
        );
        self.transport
            .write_control(GS_USB_REQ_OUT, request, value, index, data, self.timeout)?;
        Ok(())
    }

    /// Perform a control IN transfer that must fill `buf` completely
    fn control_in(&self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> ControlResult<()> {
        trace!(
            "Control IN: request={:#04x}, value={}, index={}, len={}",
            request,
            value,
            index,
            buf.len()
        );
        let len = self
            .transport
            .read_control(GS_USB_REQ_IN, request, value, index, buf, self.timeout)?;

        if len < buf.len() {
            return Err(ControlError::ShortResponse {
                expected: buf.len(),
                actual: len,
            });
        }

        Ok(())
    }
}
