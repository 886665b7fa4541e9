//! Session configuration

use std::time::Duration;

use crate::constants::{DEFAULT_CONTROL_TIMEOUT, DEFAULT_WRITE_TIMEOUT, GS_MAX_RX_URBS};

/// Tuning knobs applied when a session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Number of bulk IN reads kept outstanding
    pub rx_slots: usize,
    /// Timeout for each vendor control transfer
    pub control_timeout: Duration,
    /// Timeout for each bulk OUT transfer
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rx_slots: GS_MAX_RX_URBS,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Set the number of outstanding bulk IN reads
    pub fn with_rx_slots(mut self, rx_slots: usize) -> Self {
        self.rx_slots = rx_slots;
        self
    }

    /// Set the control transfer timeout
    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Set the bulk OUT timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}
