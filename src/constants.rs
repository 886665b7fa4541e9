//! GS-USB protocol constants
//!
//! Request codes, mode and feature flags, CAN identifier flags and the
//! fixed sizes shared by the host driver and the candleLight firmware.

use std::time::Duration;

// ============================================================================
// GS-USB Control Request Codes
// ============================================================================

/// Set host byte order
pub const GS_USB_BREQ_HOST_FORMAT: u8 = 0;
/// Set bit timing
pub const GS_USB_BREQ_BITTIMING: u8 = 1;
/// Set/start mode
pub const GS_USB_BREQ_MODE: u8 = 2;
/// Get bus errors
pub const GS_USB_BREQ_BERR: u8 = 3;
/// Get bit timing constants
pub const GS_USB_BREQ_BT_CONST: u8 = 4;
/// Get device configuration
pub const GS_USB_BREQ_DEVICE_CONFIG: u8 = 5;
/// Read the device's microsecond timestamp counter
pub const CANDLELIGHT_TIMESTAMP_GET: u8 = 0x40;
/// Enable hardware timestamps in received frames
pub const CANDLELIGHT_TIMESTAMP_ENABLE: u8 = 0x41;

// ============================================================================
// Control Request Types (bmRequestType)
// ============================================================================

/// Vendor request, host-to-device, recipient interface
pub const GS_USB_REQ_OUT: u8 = 0x41;
/// Vendor request, device-to-host, recipient interface
pub const GS_USB_REQ_IN: u8 = 0xC1;

/// Byte-order marker sent with HOST_FORMAT
pub const GS_USB_HOST_FORMAT_MARKER: u32 = 0x0000_BEEF;

// ============================================================================
// GS-USB Mode Flags (used in DeviceMode.flags)
// ============================================================================

/// Normal operation mode
pub const GS_CAN_MODE_NORMAL: u32 = 0;
/// Listen-only mode (no ACKs sent)
pub const GS_CAN_MODE_LISTEN_ONLY: u32 = 1 << 0;
/// Loopback mode (for testing)
pub const GS_CAN_MODE_LOOP_BACK: u32 = 1 << 1;
/// Triple sample mode
pub const GS_CAN_MODE_TRIPLE_SAMPLE: u32 = 1 << 2;
/// One-shot mode (no retransmission)
pub const GS_CAN_MODE_ONE_SHOT: u32 = 1 << 3;

// ============================================================================
// GS-USB Device Feature Flags (from BT_CONST response)
// ============================================================================

/// Device supports listen-only mode
pub const GS_CAN_FEATURE_LISTEN_ONLY: u32 = 1 << 0;
/// Device supports loopback mode
pub const GS_CAN_FEATURE_LOOP_BACK: u32 = 1 << 1;
/// Device supports triple sample mode
pub const GS_CAN_FEATURE_TRIPLE_SAMPLE: u32 = 1 << 2;
/// Device supports one-shot mode
pub const GS_CAN_FEATURE_ONE_SHOT: u32 = 1 << 3;

// ============================================================================
// CAN ID Flags and Masks
// ============================================================================

/// Extended frame format flag (29-bit ID)
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error message frame flag
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;

/// Standard frame format mask (11-bit ID)
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Extended frame format mask (29-bit ID)
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// Maximum DLC for classic CAN
pub const CAN_MAX_DLC: u8 = 8;
/// Maximum data length for classic CAN
pub const CAN_MAX_DLEN: usize = 8;

// ============================================================================
// GS-USB Frame Constants
// ============================================================================

/// RX overflow occurred
pub const GS_CAN_FLAG_OVERFLOW: u8 = 1 << 0;

/// Echo ID the host puts on every transmitted frame
pub const GS_USB_ECHO_ID: u32 = 0;
/// Echo ID value for received frames (from CAN bus)
pub const GS_USB_RX_ECHO_ID: u32 = 0xFFFF_FFFF;

/// Wire frame size: 12-byte header, 8 data bytes, 4-byte timestamp
pub const GS_USB_FRAME_SIZE: usize = 24;

/// Number of bulk IN reads kept outstanding
pub const GS_MAX_RX_URBS: usize = 30;

// ============================================================================
// USB Identification
// ============================================================================

/// GS-USB default vendor ID
pub const GS_USB_ID_VENDOR: u16 = 0x1D50;
/// GS-USB default product ID
pub const GS_USB_ID_PRODUCT: u16 = 0x606F;

/// Candlelight vendor ID
pub const GS_USB_CANDLELIGHT_VENDOR_ID: u16 = 0x1209;
/// Candlelight product ID
pub const GS_USB_CANDLELIGHT_PRODUCT_ID: u16 = 0x2323;

/// CES CANext FD vendor ID
pub const GS_USB_CES_CANEXT_FD_VENDOR_ID: u16 = 0x1CD2;
/// CES CANext FD product ID
pub const GS_USB_CES_CANEXT_FD_PRODUCT_ID: u16 = 0x606F;

/// ABE CANdebugger FD vendor ID
pub const GS_USB_ABE_CANDEBUGGER_FD_VENDOR_ID: u16 = 0x16D0;
/// ABE CANdebugger FD product ID
pub const GS_USB_ABE_CANDEBUGGER_FD_PRODUCT_ID: u16 = 0x10B8;

/// Interface class of the gs_usb vendor interface
pub const GS_USB_INTERFACE_CLASS: u8 = 0xFF;

// ============================================================================
// Timeouts
// ============================================================================

/// Default timeout for control transfers
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default timeout for bulk OUT transfers
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);
