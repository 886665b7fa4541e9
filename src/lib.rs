//! Host-side driver for gs_usb / candleLight USB-to-CAN adapters
//!
//! This crate talks the gs_usb vendor protocol to classic CAN adapters such
//! as candleLight, CANable and other gs_usb compatible devices.
//!
//! # Features
//!
//! - Device discovery with availability probing
//! - Classic CAN up to 1 Mbps from a fixed 48 MHz bit timing table
//! - Hardware timestamps on received frames
//! - A receive pipeline that keeps a pool of bulk reads outstanding, so no
//!   frame waits for the host to issue a read
//! - Operating modes (normal, listen-only, loopback, triple sample, one-shot)
//!
//! # Example
//!
//! ```no_run
//! use candle_usb::{GsUsb, GsUsbFrame, GS_CAN_MODE_NORMAL};
//! use std::time::Duration;
//!
//! fn main() -> candle_usb::Result<()> {
//!     // Scan for devices
//!     let list = GsUsb::find_devices(8)?;
//!     let path = match list.available().next() {
//!         Some(device) => device.path.clone(),
//!         None => {
//!             println!("No GS-USB device found");
//!             return Ok(());
//!         }
//!     };
//!
//!     let mut dev = GsUsb::open_path(&path)?;
//!
//!     // Configure bitrate (250 kbps) and go on the bus
//!     dev.set_bitrate(0, 250_000)?;
//!     dev.start(0, GS_CAN_MODE_NORMAL)?;
//!
//!     // Send a frame
//!     let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
//!     let frame = GsUsbFrame::with_data(0x7FF, &data);
//!     dev.send_frame(0, &frame)?;
//!
//!     // Read frames
//!     loop {
//!         match dev.recv_frame(Duration::from_millis(100)) {
//!             Ok(frame) => println!("{:?}  {}", frame.frame_type(), frame),
//!             Err(e) if e.is_timeout() => continue,
//!             Err(e) => return Err(e),
//!         }
//!     }
//! }
//! ```
//!
//! # Supported Devices
//!
//! - GS-USB devices (VID: 0x1D50, PID: 0x606F)
//! - candleLight (VID: 0x1209, PID: 0x2323)
//! - CES CANext FD (VID: 0x1CD2, PID: 0x606F)
//! - ABE CANdebugger FD (VID: 0x16D0, PID: 0x10B8)

pub mod bittiming;
pub mod config;
pub mod constants;
pub mod control;
pub mod device;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod structures;
pub mod transport;
pub mod usb;

#[cfg(test)]
mod mock;

// Re-export main types at crate root
pub use constants::{
    // CAN ID flags
    CAN_EFF_FLAG,
    // CAN ID masks
    CAN_EFF_MASK,
    CAN_ERR_FLAG,
    CAN_RTR_FLAG,
    CAN_SFF_MASK,
    // Feature flags
    GS_CAN_FEATURE_LISTEN_ONLY,
    GS_CAN_FEATURE_LOOP_BACK,
    GS_CAN_FEATURE_ONE_SHOT,
    GS_CAN_FEATURE_TRIPLE_SAMPLE,
    // Frame flags
    GS_CAN_FLAG_OVERFLOW,
    // Mode flags
    GS_CAN_MODE_LISTEN_ONLY,
    GS_CAN_MODE_LOOP_BACK,
    GS_CAN_MODE_NORMAL,
    GS_CAN_MODE_ONE_SHOT,
    GS_CAN_MODE_TRIPLE_SAMPLE,
    // Receive pool size
    GS_MAX_RX_URBS,
};

pub use config::SessionConfig;
pub use device::GsUsb;
pub use discovery::{find_devices, DeviceAvailability, DeviceDescriptor, DeviceList};
pub use error::{ErrorCode, GsUsbError, Result};
pub use frame::{FrameType, GsUsbFrame};
pub use structures::{CanMode, DeviceBitTiming, DeviceCapability, DeviceConfig, DeviceMode};
pub use transport::{Transport, UsbBackend};
pub use usb::{RusbBackend, RusbTransport};
