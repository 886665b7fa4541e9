//! `rusb` implementation of the transport contracts
//!
//! Asynchronous reads are served by a dedicated worker thread: slot buffers
//! are queued on a request channel, the worker fills them with blocking bulk
//! reads, and finished reads come back on a completion channel that
//! [`Transport::wait_read`] waits on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use rusb::{Device, DeviceHandle, GlobalContext};

use crate::constants::*;
use crate::transport::{Endpoint, ReadCompletion, SlotBuffer, SubmitError, Transport, UsbBackend};

/// How often the reader worker checks for cancellation while idle or reading
const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Check if a USB device is a GS-USB device
pub fn is_gs_usb_device(vendor_id: u16, product_id: u16) -> bool {
    matches!(
        (vendor_id, product_id),
        (GS_USB_ID_VENDOR, GS_USB_ID_PRODUCT)
            | (GS_USB_CANDLELIGHT_VENDOR_ID, GS_USB_CANDLELIGHT_PRODUCT_ID)
            | (
                GS_USB_CES_CANEXT_FD_VENDOR_ID,
                GS_USB_CES_CANEXT_FD_PRODUCT_ID
            )
            | (
                GS_USB_ABE_CANDEBUGGER_FD_VENDOR_ID,
                GS_USB_ABE_CANDEBUGGER_FD_PRODUCT_ID
            )
    )
}

/// Find the vendor interface number in a configuration
fn vendor_interface(config: &rusb::ConfigDescriptor) -> Option<u8> {
    config
        .interfaces()
        .flat_map(|iface| iface.descriptors())
        .find(|desc| desc.class_code() == GS_USB_INTERFACE_CLASS)
        .map(|desc| desc.interface_number())
}

/// Build the path of a device from its bus and port chain, e.g. `1-2.4`
fn device_path(device: &Device<GlobalContext>) -> rusb::Result<String> {
    let ports = device.port_numbers()?;
    let ports = if ports.is_empty() {
        // Root hub ports report no chain; fall back to the bus address
        format!("a{}", device.address())
    } else {
        ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".")
    };
    Ok(format!("{}-{}", device.bus_number(), ports))
}

/// Backend over the global libusb context
#[derive(Debug, Default, Clone, Copy)]
pub struct RusbBackend;

impl RusbBackend {
    /// Create a backend over the global libusb context
    pub fn new() -> Self {
        Self
    }
}

impl UsbBackend for RusbBackend {
    type Interface = Device<GlobalContext>;
    type Transport = RusbTransport;

    fn interfaces(&self) -> rusb::Result<Vec<Device<GlobalContext>>> {
        let mut found = Vec::new();

        for device in rusb::devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };

            if !is_gs_usb_device(desc.vendor_id(), desc.product_id()) {
                continue;
            }

            let has_vendor_interface = device
                .config_descriptor(0)
                .map(|config| vendor_interface(&config).is_some())
                .unwrap_or(false);

            if has_vendor_interface {
                found.push(device);
            }
        }

        debug!("Found {} GS-USB interface(s)", found.len());
        Ok(found)
    }

    fn device_path(&self, interface: &Device<GlobalContext>) -> rusb::Result<String> {
        device_path(interface)
    }

    fn open(&self, path: &str) -> rusb::Result<RusbTransport> {
        for device in rusb::devices()?.iter() {
            if device_path(&device).ok().as_deref() != Some(path) {
                continue;
            }

            let handle = device.open()?;
            return Ok(RusbTransport::new(handle));
        }

        Err(rusb::Error::NoDevice)
    }
}

/// Request queued to the reader worker
struct ReadRequest {
    slot: usize,
    endpoint: u8,
    buf: SlotBuffer,
}

/// Reader worker thread and its channels
struct BulkReader {
    requests: Option<Sender<ReadRequest>>,
    completions: Receiver<ReadCompletion>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BulkReader {
    fn spawn(handle: Arc<DeviceHandle<GlobalContext>>) -> std::io::Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let worker_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("gs-usb-reader".to_string())
            .spawn(move || Self::run(handle, request_rx, completion_tx, worker_stop))?;

        Ok(Self {
            requests: Some(request_tx),
            completions: completion_rx,
            stop,
            thread: Some(thread),
        })
    }

    fn run(
        handle: Arc<DeviceHandle<GlobalContext>>,
        requests: Receiver<ReadRequest>,
        completions: Sender<ReadCompletion>,
        stop: Arc<AtomicBool>,
    ) {
        trace!("Reader worker started");

        while !stop.load(Ordering::Acquire) {
            let mut request = match requests.recv_timeout(READ_POLL_INTERVAL) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            // Short timeouts keep the read cancellable; a timeout is not a completion
            let result = loop {
                if stop.load(Ordering::Acquire) {
                    trace!("Reader worker stopped");
                    return;
                }
                match handle.read_bulk(request.endpoint, &mut request.buf[..], READ_POLL_INTERVAL) {
                    Err(rusb::Error::Timeout) => continue,
                    other => break other,
                }
            };

            let completion = ReadCompletion {
                slot: request.slot,
                buf: request.buf,
                result,
            };
            if completions.send(completion).is_err() {
                break;
            }
        }

        trace!("Reader worker stopped");
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Reader worker panicked");
            }
        }
    }
}

impl Drop for BulkReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Interface-level operations of a device handle
trait InterfaceHandle {
    fn kernel_driver_active(&self, number: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&mut self, number: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&mut self, number: u8) -> rusb::Result<()>;
    fn claim_interface(&mut self, number: u8) -> rusb::Result<()>;
    fn release_interface(&mut self, number: u8) -> rusb::Result<()>;
}

impl InterfaceHandle for DeviceHandle<GlobalContext> {
    fn kernel_driver_active(&self, number: u8) -> rusb::Result<bool> {
        DeviceHandle::kernel_driver_active(self, number)
    }

    fn detach_kernel_driver(&mut self, number: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, number)
    }

    fn attach_kernel_driver(&mut self, number: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, number)
    }

    fn claim_interface(&mut self, number: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, number)
    }

    fn release_interface(&mut self, number: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, number)
    }
}

/// Claim an interface, detaching a bound kernel driver first
///
/// Returns whether a driver was detached. A driver detached here is
/// reattached if the claim fails.
fn claim_detaching<H: InterfaceHandle>(handle: &mut H, number: u8) -> rusb::Result<bool> {
    let detached = if cfg!(any(target_os = "linux", target_os = "macos"))
        && handle.kernel_driver_active(number).unwrap_or(false)
    {
        handle.detach_kernel_driver(number)?;
        debug!("Detached kernel driver from interface {}", number);
        true
    } else {
        false
    };

    if let Err(e) = handle.claim_interface(number) {
        if detached {
            reattach(handle, number);
        }
        return Err(e);
    }
    Ok(detached)
}

/// Release an interface and hand it back to the kernel driver it was taken from
fn release_reattaching<H: InterfaceHandle>(handle: &mut H, number: u8, detached: bool) {
    if let Err(e) = handle.release_interface(number) {
        debug!("Failed to release interface {}: {}", number, e);
    }
    if detached {
        reattach(handle, number);
    }
}

fn reattach<H: InterfaceHandle>(handle: &mut H, number: u8) {
    match handle.attach_kernel_driver(number) {
        Ok(()) => debug!("Reattached kernel driver to interface {}", number),
        Err(e) => warn!("Failed to reattach kernel driver to interface {}: {}", number, e),
    }
}

/// Open gs_usb device handle
pub struct RusbTransport {
    handle: Arc<DeviceHandle<GlobalContext>>,
    interface_number: Option<u8>,
    /// Whether claiming detached a kernel driver that must be reattached
    detached_driver: bool,
    reader: Option<BulkReader>,
}

impl RusbTransport {
    fn new(handle: DeviceHandle<GlobalContext>) -> Self {
        Self {
            handle: Arc::new(handle),
            interface_number: None,
            detached_driver: false,
            reader: None,
        }
    }

    fn claimed_interface(&self) -> rusb::Result<u8> {
        self.interface_number.ok_or(rusb::Error::NotFound)
    }
}

impl Transport for RusbTransport {
    fn claim_interface(&mut self) -> rusb::Result<u8> {
        if let Some(number) = self.interface_number {
            return Ok(number);
        }

        let config = self.handle.device().active_config_descriptor()?;
        let number = vendor_interface(&config).ok_or(rusb::Error::NotFound)?;

        // The handle is shared with the reader worker only after claiming
        let handle = Arc::get_mut(&mut self.handle).ok_or(rusb::Error::Busy)?;
        self.detached_driver = claim_detaching(handle, number)?;

        debug!("Claimed interface {}", number);
        self.interface_number = Some(number);
        Ok(number)
    }

    fn release_interface(&mut self) {
        self.cancel_reads();

        if let Some(number) = self.interface_number.take() {
            let detached = std::mem::take(&mut self.detached_driver);
            match Arc::get_mut(&mut self.handle) {
                Some(handle) => release_reattaching(handle, number, detached),
                None => warn!("Interface {} still in use by the reader worker", number),
            }
        }
    }

    fn endpoints(&self) -> rusb::Result<Vec<Endpoint>> {
        let number = self.claimed_interface()?;
        let config = self.handle.device().active_config_descriptor()?;

        let descriptor = config
            .interfaces()
            .filter(|iface| iface.number() == number)
            .flat_map(|iface| iface.descriptors())
            .next()
            .ok_or(rusb::Error::NotFound)?;

        Ok(descriptor
            .endpoint_descriptors()
            .map(|ep| Endpoint {
                address: ep.address(),
                direction: ep.direction(),
                transfer_type: ep.transfer_type(),
            })
            .collect())
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle
            .read_control(request_type, request, value, index, buf, timeout)
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_bulk(endpoint, data, timeout)
    }

    fn submit_read(
        &mut self,
        slot: usize,
        endpoint: u8,
        buf: SlotBuffer,
    ) -> std::result::Result<(), SubmitError> {
        if self.reader.is_none() {
            match BulkReader::spawn(self.handle.clone()) {
                Ok(reader) => self.reader = Some(reader),
                Err(e) => {
                    warn!("Failed to start reader worker: {}", e);
                    return Err(SubmitError {
                        error: rusb::Error::NoMem,
                        buf,
                    });
                }
            }
        }

        let request = ReadRequest {
            slot,
            endpoint,
            buf,
        };
        let sender = self.reader.as_ref().and_then(|reader| reader.requests.as_ref());
        match sender {
            Some(sender) => sender.send(request).map_err(|e| SubmitError {
                error: rusb::Error::Io,
                buf: e.into_inner().buf,
            }),
            None => Err(SubmitError {
                error: rusb::Error::Io,
                buf: request.buf,
            }),
        }
    }

    fn wait_read(&mut self, timeout: Duration) -> rusb::Result<Option<ReadCompletion>> {
        let reader = match self.reader.as_ref() {
            Some(reader) => reader,
            None => {
                // Nothing submitted, nothing can complete
                std::thread::sleep(timeout);
                return Ok(None);
            }
        };

        match reader.completions.recv_timeout(timeout) {
            Ok(completion) => Ok(Some(completion)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(rusb::Error::Io),
        }
    }

    fn cancel_reads(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.shutdown();
            debug!("Cancelled outstanding reads");
        }
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        self.release_interface();
    }
}
