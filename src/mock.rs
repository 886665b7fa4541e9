//! In-memory transport for unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusb::{Direction, TransferType};

use crate::constants::*;
use crate::transport::{Endpoint, ReadCompletion, SlotBuffer, SubmitError, Transport, UsbBackend};

pub type SharedDevice = Arc<Mutex<MockDevice>>;

/// One control transfer as seen by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

/// Simulated adapter state
pub struct MockDevice {
    pub fclk_can: u32,
    pub icount: u8,
    pub timestamp_us: u32,
    pub endpoints: Vec<Endpoint>,
    pub claimed: bool,
    pub fail_open: Option<rusb::Error>,
    pub fail_claim: Option<rusb::Error>,
    pub fail_endpoints: Option<rusb::Error>,
    pub fail_requests: Vec<u8>,
    pub short_responses: bool,
    /// Successful submissions left before every submit fails; `None` is unlimited
    pub submit_budget: Option<usize>,
    pub wait_error: Option<rusb::Error>,
    pub write_error: Option<rusb::Error>,
    pub short_write: bool,
    pub loopback: bool,
    pub incoming: VecDeque<rusb::Result<Vec<u8>>>,
    pub pending: VecDeque<(usize, SlotBuffer)>,
    pub written: Vec<Vec<u8>>,
    pub control_log: Vec<ControlRecord>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            fclk_can: 48_000_000,
            icount: 0,
            timestamp_us: 0,
            endpoints: vec![
                Endpoint {
                    address: 0x81,
                    direction: Direction::In,
                    transfer_type: TransferType::Bulk,
                },
                Endpoint {
                    address: 0x02,
                    direction: Direction::Out,
                    transfer_type: TransferType::Bulk,
                },
            ],
            claimed: false,
            fail_open: None,
            fail_claim: None,
            fail_endpoints: None,
            fail_requests: Vec::new(),
            short_responses: false,
            submit_budget: None,
            wait_error: None,
            write_error: None,
            short_write: false,
            loopback: false,
            incoming: VecDeque::new(),
            pending: VecDeque::new(),
            written: Vec::new(),
            control_log: Vec::new(),
        }
    }
}

impl MockDevice {
    pub fn shared() -> SharedDevice {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn requests(&self) -> Vec<u8> {
        self.control_log.iter().map(|r| r.request).collect()
    }

    fn response(&self, request: u8) -> rusb::Result<Vec<u8>> {
        let words: Vec<u32> = match request {
            GS_USB_BREQ_DEVICE_CONFIG => {
                let mut buf = vec![0, 0, 0, self.icount];
                buf.extend_from_slice(&20u32.to_le_bytes());
                buf.extend_from_slice(&10u32.to_le_bytes());
                return Ok(buf);
            }
            GS_USB_BREQ_BT_CONST => vec![0xF, self.fclk_can, 1, 16, 1, 8, 4, 1, 1024, 1],
            CANDLELIGHT_TIMESTAMP_GET => vec![self.timestamp_us],
            _ => return Err(rusb::Error::NotSupported),
        };
        Ok(words.iter().flat_map(|w| w.to_le_bytes()).collect())
    }
}

/// Transport over a [`MockDevice`]
pub struct MockTransport {
    device: SharedDevice,
    claimed: bool,
    /// Whether this transport queued any reads on the device
    submitted: bool,
}

impl MockTransport {
    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            claimed: false,
            submitted: false,
        }
    }

    fn record(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> rusb::Result<()> {
        let mut device = self.device.lock().unwrap();
        device.control_log.push(ControlRecord {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
        });
        if device.fail_requests.contains(&request) {
            return Err(rusb::Error::Pipe);
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn claim_interface(&mut self) -> rusb::Result<u8> {
        let mut device = self.device.lock().unwrap();
        if let Some(e) = device.fail_claim {
            return Err(e);
        }
        if device.claimed {
            return Err(rusb::Error::Busy);
        }
        device.claimed = true;
        self.claimed = true;
        Ok(0)
    }

    fn release_interface(&mut self) {
        self.cancel_reads();
        if self.claimed {
            self.device.lock().unwrap().claimed = false;
            self.claimed = false;
        }
    }

    fn endpoints(&self) -> rusb::Result<Vec<Endpoint>> {
        let device = self.device.lock().unwrap();
        match device.fail_endpoints {
            Some(e) => Err(e),
            None => Ok(device.endpoints.clone()),
        }
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        self.record(request_type, request, value, index, data)?;
        Ok(data.len())
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        self.record(request_type, request, value, index, &[])?;
        let device = self.device.lock().unwrap();
        let response = device.response(request)?;
        let mut len = response.len().min(buf.len());
        if device.short_responses {
            len = len.min(4).saturating_sub(1);
        }
        buf[..len].copy_from_slice(&response[..len]);
        Ok(len)
    }

    fn write_bulk(&self, _endpoint: u8, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        let mut device = self.device.lock().unwrap();
        if let Some(e) = device.write_error {
            return Err(e);
        }
        device.written.push(data.to_vec());
        if device.loopback {
            device.incoming.push_back(Ok(data.to_vec()));
        }
        if device.short_write {
            Ok(data.len() / 2)
        } else {
            Ok(data.len())
        }
    }

    fn submit_read(
        &mut self,
        slot: usize,
        _endpoint: u8,
        buf: SlotBuffer,
    ) -> std::result::Result<(), SubmitError> {
        let mut device = self.device.lock().unwrap();
        match device.submit_budget {
            Some(0) => {
                return Err(SubmitError {
                    error: rusb::Error::NoDevice,
                    buf,
                })
            }
            Some(n) => device.submit_budget = Some(n - 1),
            None => {}
        }
        device.pending.push_back((slot, buf));
        self.submitted = true;
        Ok(())
    }

    fn wait_read(&mut self, _timeout: Duration) -> rusb::Result<Option<ReadCompletion>> {
        let mut device = self.device.lock().unwrap();
        if let Some(e) = device.wait_error.take() {
            return Err(e);
        }
        if device.pending.is_empty() {
            return Ok(None);
        }
        let packet = match device.incoming.pop_front() {
            Some(packet) => packet,
            None => return Ok(None),
        };
        let (slot, mut buf) = match device.pending.pop_front() {
            Some(read) => read,
            None => return Ok(None),
        };

        let result = packet.and_then(|data| {
            if data.len() > buf.len() {
                return Err(rusb::Error::Overflow);
            }
            buf[..data.len()].copy_from_slice(&data);
            Ok(data.len())
        });

        Ok(Some(ReadCompletion { slot, buf, result }))
    }

    fn cancel_reads(&mut self) {
        if self.submitted {
            self.device.lock().unwrap().pending.clear();
            self.submitted = false;
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.release_interface();
    }
}

/// Backend over a fixed list of simulated devices
#[derive(Default)]
pub struct MockBackend {
    pub devices: Vec<(String, SharedDevice)>,
    pub fail_enumeration: Option<rusb::Error>,
    pub fail_path: Option<rusb::Error>,
}

impl MockBackend {
    pub fn with_devices(count: usize) -> Self {
        Self {
            devices: (0..count)
                .map(|i| (format!("1-{}", i + 1), MockDevice::shared()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn device(&self, index: usize) -> SharedDevice {
        self.devices[index].1.clone()
    }
}

impl UsbBackend for MockBackend {
    type Interface = usize;
    type Transport = MockTransport;

    fn interfaces(&self) -> rusb::Result<Vec<usize>> {
        match self.fail_enumeration {
            Some(e) => Err(e),
            None => Ok((0..self.devices.len()).collect()),
        }
    }

    fn device_path(&self, interface: &usize) -> rusb::Result<String> {
        match self.fail_path {
            Some(e) => Err(e),
            None => Ok(self.devices[*interface].0.clone()),
        }
    }

    fn open(&self, path: &str) -> rusb::Result<MockTransport> {
        let (_, device) = self
            .devices
            .iter()
            .find(|(p, _)| p == path)
            .ok_or(rusb::Error::NoDevice)?;
        if let Some(e) = device.lock().unwrap().fail_open {
            return Err(e);
        }
        Ok(MockTransport::new(device.clone()))
    }
}
