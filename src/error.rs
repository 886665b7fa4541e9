//! Error types for the candleLight driver
//!
//! Every fallible operation returns a [`GsUsbError`]. Each variant maps to
//! exactly one [`ErrorCode`], which the device session also records as its
//! last error.

use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, GsUsbError>;

/// Failure of a single vendor control transfer
#[derive(Error, Debug)]
pub enum ControlError {
    /// The transfer itself failed
    #[error("control transfer failed: {0}")]
    Transfer(#[from] rusb::Error),

    /// The device answered with fewer bytes than the payload needs
    #[error("short control response: expected {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },
}

/// Error types for driver operations
#[derive(Error, Debug)]
pub enum GsUsbError {
    /// The transport could not open the device at this path
    #[error("Failed to open device {path}: {source}")]
    TransportOpen {
        path: String,
        #[source]
        source: rusb::Error,
    },

    /// Claiming the vendor interface failed
    #[error("Failed to initialize USB interface: {0}")]
    InterfaceInit(#[source] rusb::Error),

    /// Querying the interface descriptor or its endpoints failed
    #[error("Failed to query pipes: {0}")]
    PipeQuery(#[source] rusb::Error),

    /// The interface does not expose exactly one bulk IN and one bulk OUT endpoint
    #[error(
        "Unexpected endpoint layout: {bulk_in} bulk IN, {bulk_out} bulk OUT, {other} other"
    )]
    EndpointShape {
        bulk_in: usize,
        bulk_out: usize,
        other: usize,
    },

    /// HOST_FORMAT request failed
    #[error("Failed to set host format: {0}")]
    HostFormat(#[source] ControlError),

    /// TIMESTAMP_ENABLE request failed
    #[error("Failed to enable timestamps: {0}")]
    TimestampMode(#[source] ControlError),

    /// DEVICE_CONFIG request failed
    #[error("Failed to read device configuration: {0}")]
    DeviceInfo(#[source] ControlError),

    /// BT_CONST request failed
    #[error("Failed to read bit timing constants: {0}")]
    BitTimingConst(#[source] ControlError),

    /// MODE request failed
    #[error("Failed to set device mode: {0}")]
    SetMode(#[source] ControlError),

    /// BITTIMING request failed
    #[error("Failed to set bit timing: {0}")]
    SetBitTiming(#[source] ControlError),

    /// Bitrate is not in the translation table
    #[error("Unsupported bitrate {bitrate}")]
    UnsupportedBitrate { bitrate: u32 },

    /// Device clock differs from the clock the translation table was built for
    #[error("Device clock {clock_hz} Hz does not match the {expected_hz} Hz bitrate table")]
    ClockMismatch { clock_hz: u32, expected_hz: u32 },

    /// Invalid channel number
    #[error("Invalid channel number: {channel} (device has {channel_count} channels)")]
    InvalidChannel { channel: u8, channel_count: u8 },

    /// Bulk OUT transfer failed
    #[error("Failed to send frame: {0}")]
    SendFrame(#[source] rusb::Error),

    /// Bulk OUT transfer moved fewer bytes than one frame
    #[error("Short write: expected {expected} bytes, sent {actual}")]
    ShortWrite { expected: usize, actual: usize },

    /// Submitting an asynchronous read into a receive slot failed
    #[error("Failed to submit read for slot {slot}: {source}")]
    PrepareRead {
        slot: usize,
        #[source]
        source: rusb::Error,
    },

    /// A receive pipeline with no slots was requested
    #[error("Receive pipeline needs at least one slot")]
    EmptyPipeline,

    /// No frame arrived within the timeout
    #[error("Read timeout")]
    ReadTimeout,

    /// Waiting for read completion failed
    #[error("Failed to wait for read completion: {0}")]
    ReadWait(#[source] rusb::Error),

    /// A completed read reported a transfer error
    #[error("Read on slot {slot} failed: {source}")]
    ReadResult {
        slot: usize,
        #[source]
        source: rusb::Error,
    },

    /// A completed read did not carry exactly one frame
    #[error("Invalid read size: expected {expected} bytes, got {actual}")]
    ReadSize { expected: usize, actual: usize },

    /// TIMESTAMP_GET request failed
    #[error("Failed to read device timestamp: {0}")]
    TimestampRead(#[source] ControlError),

    /// Device enumeration failed
    #[error("Device enumeration failed: {0}")]
    Enumeration(#[source] rusb::Error),

    /// The path of an enumerated device could not be determined
    #[error("Failed to get device path: {0}")]
    DevicePath(#[source] rusb::Error),
}

/// Flat error taxonomy recorded as a session's last error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    TransportOpen,
    InterfaceInit,
    PipeQuery,
    EndpointShape,
    HostFormat,
    TimestampMode,
    DeviceInfo,
    BitTimingConst,
    SetMode,
    SetBitTiming,
    UnsupportedBitrate,
    ClockMismatch,
    InvalidChannel,
    SendFrame,
    PrepareRead,
    ReadTimeout,
    ReadWait,
    ReadResult,
    ReadSize,
    TimestampRead,
    Enumeration,
    DevicePath,
}

impl GsUsbError {
    /// Get the taxonomy code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            GsUsbError::TransportOpen { .. } => ErrorCode::TransportOpen,
            GsUsbError::InterfaceInit(_) => ErrorCode::InterfaceInit,
            GsUsbError::PipeQuery(_) => ErrorCode::PipeQuery,
            GsUsbError::EndpointShape { .. } => ErrorCode::EndpointShape,
            GsUsbError::HostFormat(_) => ErrorCode::HostFormat,
            GsUsbError::TimestampMode(_) => ErrorCode::TimestampMode,
            GsUsbError::DeviceInfo(_) => ErrorCode::DeviceInfo,
            GsUsbError::BitTimingConst(_) => ErrorCode::BitTimingConst,
            GsUsbError::SetMode(_) => ErrorCode::SetMode,
            GsUsbError::SetBitTiming(_) => ErrorCode::SetBitTiming,
            GsUsbError::UnsupportedBitrate { .. } => ErrorCode::UnsupportedBitrate,
            GsUsbError::ClockMismatch { .. } => ErrorCode::ClockMismatch,
            GsUsbError::InvalidChannel { .. } => ErrorCode::InvalidChannel,
            GsUsbError::SendFrame(_) | GsUsbError::ShortWrite { .. } => ErrorCode::SendFrame,
            GsUsbError::PrepareRead { .. } | GsUsbError::EmptyPipeline => ErrorCode::PrepareRead,
            GsUsbError::ReadTimeout => ErrorCode::ReadTimeout,
            GsUsbError::ReadWait(_) => ErrorCode::ReadWait,
            GsUsbError::ReadResult { .. } => ErrorCode::ReadResult,
            GsUsbError::ReadSize { .. } => ErrorCode::ReadSize,
            GsUsbError::TimestampRead(_) => ErrorCode::TimestampRead,
            GsUsbError::Enumeration(_) => ErrorCode::Enumeration,
            GsUsbError::DevicePath(_) => ErrorCode::DevicePath,
        }
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, GsUsbError::ReadTimeout)
    }

    /// Check if the session is still healthy after this error
    ///
    /// Only a read timeout is routine; anything else suggests closing and
    /// reopening the device.
    pub fn is_recoverable(&self) -> bool {
        self.is_timeout()
    }

    /// Check if this error wraps a USB error
    pub fn is_usb_error(&self) -> bool {
        matches!(
            self,
            GsUsbError::TransportOpen { .. }
                | GsUsbError::InterfaceInit(_)
                | GsUsbError::PipeQuery(_)
                | GsUsbError::SendFrame(_)
                | GsUsbError::PrepareRead { .. }
                | GsUsbError::ReadWait(_)
                | GsUsbError::ReadResult { .. }
                | GsUsbError::Enumeration(_)
                | GsUsbError::DevicePath(_)
        )
    }
}
