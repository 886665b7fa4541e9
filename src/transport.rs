//! USB transport contracts
//!
//! The device session and the receive pipeline talk to hardware only
//! through these traits. [`crate::usb`] implements them with `rusb`.

use std::time::Duration;

use rusb::{Direction, TransferType};

use crate::constants::GS_USB_FRAME_SIZE;

/// Buffer owned by one receive slot, sized to exactly one wire frame
///
/// While a read is pending the buffer lives inside the transport; it comes
/// back with the matching [`ReadCompletion`].
pub type SlotBuffer = Box<[u8; GS_USB_FRAME_SIZE]>;

/// Allocate a zeroed slot buffer
pub fn slot_buffer() -> SlotBuffer {
    Box::new([0u8; GS_USB_FRAME_SIZE])
}

/// One endpoint of the claimed interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Endpoint address including the direction bit
    pub address: u8,
    /// Transfer direction
    pub direction: Direction,
    /// Transfer type
    pub transfer_type: TransferType,
}

/// A finished asynchronous read
#[derive(Debug)]
pub struct ReadCompletion {
    /// Slot the read was submitted for
    pub slot: usize,
    /// The slot's buffer, returned to its owner
    pub buf: SlotBuffer,
    /// Bytes transferred, or the transfer error
    pub result: rusb::Result<usize>,
}

/// A read that could not be submitted
#[derive(Debug)]
pub struct SubmitError {
    /// Why the transport refused the read
    pub error: rusb::Error,
    /// The buffer, handed back untouched
    pub buf: SlotBuffer,
}

/// Source of candidate devices
pub trait UsbBackend {
    /// Handle to an enumerated device interface
    type Interface;
    /// Transport produced by [`UsbBackend::open`]
    type Transport: Transport;

    /// List every interface that looks like a gs_usb adapter, in enumeration order
    fn interfaces(&self) -> rusb::Result<Vec<Self::Interface>>;

    /// Get the opaque path identifying an interface's device
    fn device_path(&self, interface: &Self::Interface) -> rusb::Result<String>;

    /// Open the device at `path`
    fn open(&self, path: &str) -> rusb::Result<Self::Transport>;
}

/// An open device handle
///
/// Implementations are driven from a single thread; asynchronous reads run
/// concurrently inside the transport and surface through
/// [`Transport::wait_read`].
pub trait Transport {
    /// Claim the vendor interface and return its interface number
    fn claim_interface(&mut self) -> rusb::Result<u8>;

    /// Release the vendor interface; a no-op if it is not claimed
    fn release_interface(&mut self);

    /// List the endpoints of the claimed interface
    fn endpoints(&self) -> rusb::Result<Vec<Endpoint>>;

    /// Host-to-device control transfer
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// Device-to-host control transfer
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// Synchronous bulk OUT transfer
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;

    /// Queue an asynchronous bulk IN read into `buf` on behalf of `slot`
    fn submit_read(
        &mut self,
        slot: usize,
        endpoint: u8,
        buf: SlotBuffer,
    ) -> std::result::Result<(), SubmitError>;

    /// Block until any submitted read completes or `timeout` elapses
    ///
    /// Returns `Ok(None)` on timeout.
    fn wait_read(&mut self, timeout: Duration) -> rusb::Result<Option<ReadCompletion>>;

    /// Abandon every outstanding read, dropping their buffers
    fn cancel_reads(&mut self);
}
