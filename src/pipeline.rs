//! Receive pipeline
//!
//! Keeps a fixed pool of bulk IN reads outstanding so a frame arriving from
//! the bus is captured by an already-pending read. Each completed slot is
//! resubmitted before the frame is handed to the caller.

use std::time::Duration;

use log::{trace, warn};

use crate::constants::GS_USB_FRAME_SIZE;
use crate::error::{GsUsbError, Result};
use crate::frame::GsUsbFrame;
use crate::transport::{slot_buffer, ReadCompletion, SlotBuffer, SubmitError, Transport};

/// State of one receive slot
enum Slot {
    /// Read outstanding; the buffer lives in the transport
    Pending,
    /// Buffer at hand, no read outstanding
    Idle(SlotBuffer),
}

/// Fixed pool of always-outstanding bulk IN reads
pub struct ReceivePipeline {
    endpoint: u8,
    slots: Vec<Slot>,
}

impl ReceivePipeline {
    /// Create a pipeline of `size` idle slots reading from `endpoint`
    pub fn new(endpoint: u8, size: usize) -> Self {
        Self {
            endpoint,
            slots: (0..size).map(|_| Slot::Idle(slot_buffer())).collect(),
        }
    }

    /// Number of slots in the pool
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the pool has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots with a read outstanding
    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Pending))
            .count()
    }

    /// Submit a read for every idle slot
    pub fn prime_all<T: Transport>(&mut self, transport: &mut T) -> Result<()> {
        if self.slots.is_empty() {
            return Err(GsUsbError::EmptyPipeline);
        }
        for index in 0..self.slots.len() {
            self.prime(transport, index)?;
        }
        trace!("Primed {} receive slots", self.slots.len());
        Ok(())
    }

    /// Submit a read into one slot's buffer
    ///
    /// A slot that is already pending is left alone. If the transport refuses
    /// the read, the slot stays idle and the pipeline runs one read short.
    pub fn prime<T: Transport>(&mut self, transport: &mut T, index: usize) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(GsUsbError::PrepareRead {
                slot: index,
                source: rusb::Error::InvalidParam,
            })?;
        let buf = match std::mem::replace(slot, Slot::Pending) {
            Slot::Idle(buf) => buf,
            Slot::Pending => return Ok(()),
        };

        match transport.submit_read(index, self.endpoint, buf) {
            Ok(()) => Ok(()),
            Err(SubmitError { error, buf }) => {
                self.slots[index] = Slot::Idle(buf);
                warn!("Receive slot {} could not be resubmitted: {}", index, error);
                Err(GsUsbError::PrepareRead {
                    slot: index,
                    source: error,
                })
            }
        }
    }

    /// Wait up to `timeout` for the next completed read
    ///
    /// The completed slot is resubmitted whether or not its data was usable;
    /// a failed resubmission takes precedence over the read's own outcome.
    pub fn recv_frame<T: Transport>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<GsUsbFrame> {
        let completion = match transport.wait_read(timeout) {
            Ok(Some(completion)) => completion,
            Ok(None) => return Err(GsUsbError::ReadTimeout),
            Err(e) => return Err(GsUsbError::ReadWait(e)),
        };

        let ReadCompletion { slot, buf, result } = completion;
        if slot >= self.slots.len() {
            return Err(GsUsbError::ReadWait(rusb::Error::Other));
        }

        let outcome = match result {
            Ok(len) if len == GS_USB_FRAME_SIZE => Ok(GsUsbFrame::unpack(&buf)),
            Ok(len) => Err(GsUsbError::ReadSize {
                expected: GS_USB_FRAME_SIZE,
                actual: len,
            }),
            Err(e) => Err(GsUsbError::ReadResult { slot, source: e }),
        };

        self.slots[slot] = Slot::Idle(buf);
        self.prime(transport, slot)?;

        if let Ok(frame) = &outcome {
            trace!("RX slot {}: {:?}", slot, frame);
        }
        outcome
    }

    /// Abandon all outstanding reads and drop every slot
    ///
    /// Degraded (idle) slots are released as well.
    pub fn release<T: Transport>(&mut self, transport: &mut T) {
        transport.cancel_reads();
        self.slots.clear();
    }
}
