//! GS-USB device session
//!
//! This module provides the `GsUsb` struct, one open candleLight adapter with
//! its claimed interface, cached configuration and primed receive pipeline.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::bittiming;
use crate::config::SessionConfig;
use crate::constants::*;
use crate::control::ControlChannel;
use crate::discovery::{self, DeviceList};
use crate::error::{ErrorCode, GsUsbError, Result};
use crate::frame::GsUsbFrame;
use crate::pipeline::ReceivePipeline;
use crate::structures::{CanMode, DeviceBitTiming, DeviceCapability, DeviceConfig, DeviceMode};
use crate::transport::{Endpoint, Transport, UsbBackend};
use crate::usb::{RusbBackend, RusbTransport};

/// Open GS-USB device
///
/// A session exists only in the open state: [`GsUsb::open`] either returns a
/// fully initialised session or releases everything it acquired. Closing
/// consumes the session; dropping it closes implicitly.
///
/// Every operation returns its own `Result` and also records the outcome,
/// readable through [`GsUsb::last_error`].
///
/// A session is driven from one thread. Do not close it while a
/// [`GsUsb::recv_frame`] wait is running elsewhere.
///
/// # Example
///
/// ```no_run
/// use candle_usb::{CanMode, GsUsb, GsUsbFrame};
/// use std::time::Duration;
///
/// let mut dev = GsUsb::open_path("1-2")?;
///
/// dev.set_bitrate(0, 250_000)?;
/// dev.set_device_mode(0, CanMode::Start, candle_usb::GS_CAN_MODE_NORMAL)?;
///
/// let frame = GsUsbFrame::with_data(0x123, &[0x01, 0x02, 0x03, 0x04]);
/// dev.send_frame(0, &frame)?;
///
/// loop {
///     match dev.recv_frame(Duration::from_millis(100)) {
///         Ok(frame) if frame.is_rx_frame() => println!("RX: {}", frame),
///         Ok(_) => {}
///         Err(e) if e.is_timeout() => continue,
///         Err(e) => return Err(e),
///     }
/// }
/// # Ok::<(), candle_usb::GsUsbError>(())
/// ```
pub struct GsUsb<T: Transport = RusbTransport> {
    /// Transport path the session was opened from
    path: String,
    /// Handle with the vendor interface claimed
    transport: T,
    config: SessionConfig,
    interface_number: u8,
    endpoint_in: Endpoint,
    endpoint_out: Endpoint,
    /// Fetched once at open
    device_config: DeviceConfig,
    /// Bit timing constants of channel 0, fetched once at open
    capability: DeviceCapability,
    pipeline: ReceivePipeline,
    last_error: Option<ErrorCode>,
    /// Last bit timing written to any channel
    last_timing: Option<DeviceBitTiming>,
    open: bool,
}

/// What the open handshake learns about the device
struct Handshake {
    endpoint_in: Endpoint,
    endpoint_out: Endpoint,
    device_config: DeviceConfig,
    capability: DeviceCapability,
    pipeline: ReceivePipeline,
}

impl GsUsb<RusbTransport> {
    /// Open the adapter at `path` through libusb
    pub fn open_path(path: &str) -> Result<Self> {
        Self::open(&RusbBackend::new(), path)
    }

    /// Enumerate and probe connected adapters through libusb
    ///
    /// See [`discovery::find_devices`].
    pub fn find_devices(max_results: usize) -> Result<DeviceList> {
        discovery::find_devices(&RusbBackend::new(), max_results)
    }
}

impl<T: Transport> GsUsb<T> {
    /// Open the device at `path` with the default configuration
    pub fn open<B>(backend: &B, path: &str) -> Result<Self>
    where
        B: UsbBackend<Transport = T>,
    {
        Self::open_with_config(backend, path, SessionConfig::default())
    }

    /// Open the device at `path`
    ///
    /// Claims the vendor interface, checks the endpoint layout, runs the
    /// host-format and timestamp handshake, reads the device configuration
    /// and channel 0 bit timing constants, then primes the receive pipeline.
    pub fn open_with_config<B>(backend: &B, path: &str, config: SessionConfig) -> Result<Self>
    where
        B: UsbBackend<Transport = T>,
    {
        debug!("Opening {}", path);

        let mut transport = backend
            .open(path)
            .map_err(|source| GsUsbError::TransportOpen {
                path: path.to_string(),
                source,
            })?;

        let interface_number = transport
            .claim_interface()
            .map_err(GsUsbError::InterfaceInit)?;

        let handshake = match Self::handshake(&mut transport, interface_number, &config) {
            Ok(handshake) => handshake,
            Err(e) => {
                debug!("Open of {} failed: {}", path, e);
                transport.release_interface();
                return Err(e);
            }
        };

        debug!(
            "Opened {}: {} channel(s), fw {:.1}, hw {:.1}, clock {} Hz, {} receive slots",
            path,
            handshake.device_config.channel_count(),
            handshake.device_config.firmware_version(),
            handshake.device_config.hardware_version(),
            handshake.capability.fclk_can,
            handshake.pipeline.len()
        );

        Ok(Self {
            path: path.to_string(),
            transport,
            config,
            interface_number,
            endpoint_in: handshake.endpoint_in,
            endpoint_out: handshake.endpoint_out,
            device_config: handshake.device_config,
            capability: handshake.capability,
            pipeline: handshake.pipeline,
            last_error: None,
            last_timing: None,
            open: true,
        })
    }

    /// Everything `open` does after the interface is claimed
    fn handshake(
        transport: &mut T,
        interface_number: u8,
        config: &SessionConfig,
    ) -> Result<Handshake> {
        let endpoints = transport.endpoints().map_err(GsUsbError::PipeQuery)?;
        let (endpoint_in, endpoint_out) = Self::bulk_pair(&endpoints)?;
        trace!(
            "Bulk IN {:#04x}, bulk OUT {:#04x}",
            endpoint_in.address,
            endpoint_out.address
        );

        let (device_config, capability) = {
            let control = ControlChannel::new(&*transport, interface_number, config.control_timeout);
            control.set_host_format().map_err(GsUsbError::HostFormat)?;
            control
                .set_timestamp_mode(true)
                .map_err(GsUsbError::TimestampMode)?;
            let device_config = control.device_config().map_err(GsUsbError::DeviceInfo)?;
            let capability = control
                .bit_timing_const(0)
                .map_err(GsUsbError::BitTimingConst)?;
            (device_config, capability)
        };

        let mut pipeline = ReceivePipeline::new(endpoint_in.address, config.rx_slots);
        pipeline.prime_all(transport)?;

        Ok(Handshake {
            endpoint_in,
            endpoint_out,
            device_config,
            capability,
            pipeline,
        })
    }

    /// Pick the bulk IN and bulk OUT endpoint; anything else is rejected
    fn bulk_pair(endpoints: &[Endpoint]) -> Result<(Endpoint, Endpoint)> {
        let bulk = |direction: rusb::Direction| {
            endpoints
                .iter()
                .filter(move |ep| {
                    ep.transfer_type == rusb::TransferType::Bulk && ep.direction == direction
                })
                .copied()
                .collect::<Vec<_>>()
        };
        let bulk_in = bulk(rusb::Direction::In);
        let bulk_out = bulk(rusb::Direction::Out);
        let other = endpoints.len() - bulk_in.len() - bulk_out.len();

        match (bulk_in.as_slice(), bulk_out.as_slice(), other) {
            ([ep_in], [ep_out], 0) => Ok((*ep_in, *ep_out)),
            _ => Err(GsUsbError::EndpointShape {
                bulk_in: bulk_in.len(),
                bulk_out: bulk_out.len(),
                other,
            }),
        }
    }

    /// Close the session
    ///
    /// Abandons all receive slots, including degraded ones, and releases the
    /// interface and the transport handle.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.pipeline.release(&mut self.transport);
        self.transport.release_interface();
        self.last_error = None;
        debug!("Closed {}", self.path);
    }

    /// Put a channel into reset mode, taking it off the bus
    pub fn reset(&mut self, channel: u8) -> Result<()> {
        self.set_device_mode(channel, CanMode::Reset, 0)
    }

    /// Start a channel with the given GS_CAN_MODE_* flags
    pub fn start(&mut self, channel: u8, flags: u32) -> Result<()> {
        self.set_device_mode(channel, CanMode::Start, flags)
    }

    /// Set a channel's mode
    ///
    /// # Arguments
    /// * `channel` - CAN channel number
    /// * `mode` - Start or reset
    /// * `flags` - Mode flags (combination of GS_CAN_MODE_* constants)
    pub fn set_device_mode(&mut self, channel: u8, mode: CanMode, flags: u32) -> Result<()> {
        let unsupported = flags & !self.capability.feature;
        if unsupported != 0 {
            warn!(
                "Mode flags 0x{:08x} not advertised by {}",
                unsupported, self.path
            );
        }

        let result = self.check_channel(channel).and_then(|value| {
            self.control()
                .set_mode(value, &DeviceMode::new(mode, flags))
                .map_err(GsUsbError::SetMode)
        });
        if result.is_ok() {
            debug!("Channel {} mode {:?}, flags 0x{:08x}", channel, mode, flags);
        }
        self.record(result)
    }

    /// Set a channel's bitrate from the 48 MHz timing table
    ///
    /// # Supported bitrates
    /// 10k, 20k, 50k, 83.333k, 100k, 125k, 250k, 500k, 800k and 1M bit/s.
    /// Any other rate fails with `UnsupportedBitrate`; a device whose clock
    /// is not 48 MHz fails with `ClockMismatch` for every rate in the table.
    pub fn set_bitrate(&mut self, channel: u8, bitrate: u32) -> Result<()> {
        let timing = self
            .check_channel(channel)
            .and_then(|_| bittiming::bit_timing_for(bitrate, self.capability.fclk_can));

        match timing {
            Ok(timing) => self.set_bittiming(channel, &timing),
            Err(e) => self.record(Err(e)),
        }
    }

    /// Set raw bit timing parameters on a channel
    pub fn set_bittiming(&mut self, channel: u8, timing: &DeviceBitTiming) -> Result<()> {
        let result = self.check_channel(channel).and_then(|value| {
            self.control()
                .set_bit_timing(value, timing)
                .map_err(GsUsbError::SetBitTiming)
        });
        if result.is_ok() {
            debug!("Channel {} bit timing {}", channel, timing);
            self.last_timing = Some(*timing);
        }
        self.record(result)
    }

    /// Send a CAN frame on a channel
    ///
    /// The frame goes out with echo id 0 and `channel` filled in; the
    /// caller's copy is left untouched. Anything short of a full frame on the
    /// wire is a failure.
    pub fn send_frame(&mut self, channel: u8, frame: &GsUsbFrame) -> Result<()> {
        let result = self.check_channel(channel).and_then(|_| {
            let mut frame = *frame;
            frame.echo_id = GS_USB_ECHO_ID;
            frame.channel = channel;

            let data = frame.pack();
            let sent = self
                .transport
                .write_bulk(self.endpoint_out.address, &data, self.config.write_timeout)
                .map_err(GsUsbError::SendFrame)?;
            if sent != data.len() {
                return Err(GsUsbError::ShortWrite {
                    expected: data.len(),
                    actual: sent,
                });
            }

            trace!("TX {:?}", frame);
            Ok(())
        });
        self.record(result)
    }

    /// Receive the next frame, waiting at most `timeout`
    ///
    /// Both bus frames and transmit echoes are returned; tell them apart with
    /// [`GsUsbFrame::frame_type`]. A `ReadTimeout` is routine and the call can
    /// simply be repeated.
    pub fn recv_frame(&mut self, timeout: Duration) -> Result<GsUsbFrame> {
        let result = self.pipeline.recv_frame(&mut self.transport, timeout);
        self.record(result)
    }

    /// Read the device's free-running microsecond counter
    pub fn read_device_timestamp(&mut self) -> Result<u32> {
        let result = self.control().timestamp().map_err(GsUsbError::TimestampRead);
        self.record(result)
    }

    /// Code of the most recent failure, `None` if the last operation succeeded
    pub fn last_error(&self) -> Option<ErrorCode> {
        self.last_error
    }

    /// Transport path the session was opened from
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of CAN channels
    pub fn channel_count(&self) -> u8 {
        self.device_config.channel_count()
    }

    /// Device configuration read at open
    pub fn device_config(&self) -> &DeviceConfig {
        &self.device_config
    }

    /// Bit timing constants read at open
    pub fn capability(&self) -> &DeviceCapability {
        &self.capability
    }

    /// Claimed vendor interface number
    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }

    /// Bulk IN and bulk OUT endpoints
    pub fn endpoints(&self) -> (Endpoint, Endpoint) {
        (self.endpoint_in, self.endpoint_out)
    }

    /// Number of receive slots with a read outstanding
    pub fn pending_reads(&self) -> usize {
        self.pipeline.pending_count()
    }

    /// Last bit timing that was set via `set_bittiming`/`set_bitrate`
    pub fn last_timing(&self) -> Option<DeviceBitTiming> {
        self.last_timing
    }

    fn control(&self) -> ControlChannel<'_, T> {
        ControlChannel::new(
            &self.transport,
            self.interface_number,
            self.config.control_timeout,
        )
    }

    /// Validate a channel index and widen it to the control `value` field
    fn check_channel(&self, channel: u8) -> Result<u16> {
        let channel_count = self.channel_count();
        if channel >= channel_count {
            return Err(GsUsbError::InvalidChannel {
                channel,
                channel_count,
            });
        }
        Ok(channel.into())
    }

    fn record<R>(&mut self, result: Result<R>) -> Result<R> {
        self.last_error = result.as_ref().err().map(GsUsbError::code);
        result
    }
}

impl<T: Transport> std::fmt::Display for GsUsb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GS-USB {} ({} channel(s), fw {:.1}, hw {:.1})",
            self.path,
            self.channel_count(),
            self.device_config.firmware_version(),
            self.device_config.hardware_version()
        )
    }
}

impl<T: Transport> std::fmt::Debug for GsUsb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GsUsb")
            .field("path", &self.path)
            .field("interface_number", &self.interface_number)
            .field("channels", &self.channel_count())
            .field("pending_reads", &self.pending_reads())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl<T: Transport> Drop for GsUsb<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockTransport, SharedDevice};

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn open_one() -> (MockBackend, SharedDevice, GsUsb<MockTransport>) {
        init_logger();
        let backend = MockBackend::with_devices(1);
        let device = backend.device(0);
        let session = GsUsb::open(&backend, "1-1").unwrap();
        (backend, device, session)
    }

    fn open_err(backend: &MockBackend) -> GsUsbError {
        init_logger();
        GsUsb::open(backend, "1-1").unwrap_err()
    }

    #[test]
    fn test_open_runs_handshake_in_order() {
        let (_backend, device, session) = open_one();
        assert_eq!(
            device.lock().unwrap().requests(),
            vec![
                GS_USB_BREQ_HOST_FORMAT,
                CANDLELIGHT_TIMESTAMP_ENABLE,
                GS_USB_BREQ_DEVICE_CONFIG,
                GS_USB_BREQ_BT_CONST,
            ]
        );
        assert_eq!(session.path(), "1-1");
        assert_eq!(session.channel_count(), 1);
        assert_eq!(session.capability().fclk_can, 48_000_000);
        assert_eq!(session.endpoints().0.address, 0x81);
        assert_eq!(session.endpoints().1.address, 0x02);
        assert_eq!(session.last_error(), None);
    }

    #[test]
    fn test_open_primes_every_slot() {
        let (_backend, device, session) = open_one();
        assert_eq!(session.pending_reads(), GS_MAX_RX_URBS);
        assert_eq!(device.lock().unwrap().pending.len(), GS_MAX_RX_URBS);
    }

    #[test]
    fn test_open_with_custom_slot_count() {
        init_logger();
        let backend = MockBackend::with_devices(1);
        let config = SessionConfig::default().with_rx_slots(5);
        let session = GsUsb::open_with_config(&backend, "1-1", config).unwrap();
        assert_eq!(session.pending_reads(), 5);
    }

    #[test]
    fn test_open_unknown_path_fails() {
        init_logger();
        let backend = MockBackend::with_devices(1);
        let err = GsUsb::open(&backend, "9-9").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransportOpen);
    }

    #[test]
    fn test_open_transport_failure_keeps_source() {
        let backend = MockBackend::with_devices(1);
        backend.device(0).lock().unwrap().fail_open = Some(rusb::Error::Access);

        match open_err(&backend) {
            GsUsbError::TransportOpen { path, source } => {
                assert_eq!(path, "1-1");
                assert_eq!(source, rusb::Error::Access);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(backend.device(0).lock().unwrap().control_log.is_empty());
    }

    #[test]
    fn test_open_claim_failure_is_interface_init() {
        let backend = MockBackend::with_devices(1);
        backend.device(0).lock().unwrap().fail_claim = Some(rusb::Error::Access);

        match open_err(&backend) {
            GsUsbError::InterfaceInit(source) => assert_eq!(source, rusb::Error::Access),
            other => panic!("unexpected error: {:?}", other),
        }
        let device = backend.device(0);
        let device = device.lock().unwrap();
        assert!(!device.claimed);
        assert!(device.control_log.is_empty());
    }

    #[test]
    fn test_open_fails_when_interface_is_held() {
        let (backend, _device, _session) = open_one();
        let err = GsUsb::open(&backend, "1-1").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InterfaceInit);
    }

    #[test]
    fn test_open_pipe_query_failure_releases_interface() {
        let backend = MockBackend::with_devices(1);
        backend.device(0).lock().unwrap().fail_endpoints = Some(rusb::Error::Io);
        assert_eq!(open_err(&backend).code(), ErrorCode::PipeQuery);
        assert!(!backend.device(0).lock().unwrap().claimed);
    }

    #[test]
    fn test_open_rejects_wrong_endpoint_layout() {
        let backend = MockBackend::with_devices(1);
        backend.device(0).lock().unwrap().endpoints.push(Endpoint {
            address: 0x83,
            direction: rusb::Direction::In,
            transfer_type: rusb::TransferType::Interrupt,
        });

        match open_err(&backend) {
            GsUsbError::EndpointShape {
                bulk_in,
                bulk_out,
                other,
            } => assert_eq!((bulk_in, bulk_out, other), (1, 1, 1)),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!backend.device(0).lock().unwrap().claimed);
    }

    #[test]
    fn test_open_rejects_missing_bulk_out() {
        let backend = MockBackend::with_devices(1);
        backend.device(0).lock().unwrap().endpoints.truncate(1);
        assert_eq!(open_err(&backend).code(), ErrorCode::EndpointShape);
    }

    #[test]
    fn test_open_handshake_failures_release_everything() {
        let cases = [
            (GS_USB_BREQ_HOST_FORMAT, ErrorCode::HostFormat),
            (CANDLELIGHT_TIMESTAMP_ENABLE, ErrorCode::TimestampMode),
            (GS_USB_BREQ_DEVICE_CONFIG, ErrorCode::DeviceInfo),
            (GS_USB_BREQ_BT_CONST, ErrorCode::BitTimingConst),
        ];

        for (request, code) in cases {
            let backend = MockBackend::with_devices(1);
            backend.device(0).lock().unwrap().fail_requests.push(request);
            assert_eq!(open_err(&backend).code(), code);

            let device = backend.device(0);
            let device = device.lock().unwrap();
            assert!(!device.claimed);
            assert!(device.pending.is_empty());
        }
    }

    #[test]
    fn test_open_with_zero_slots_fails() {
        init_logger();
        let backend = MockBackend::with_devices(1);
        let config = SessionConfig::default().with_rx_slots(0);
        let err = GsUsb::open_with_config(&backend, "1-1", config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PrepareRead);
        assert!(!backend.device(0).lock().unwrap().claimed);
    }

    #[test]
    fn test_open_prime_failure_releases_reads() {
        let backend = MockBackend::with_devices(1);
        backend.device(0).lock().unwrap().submit_budget = Some(3);
        assert_eq!(open_err(&backend).code(), ErrorCode::PrepareRead);

        let device = backend.device(0);
        let device = device.lock().unwrap();
        assert!(device.pending.is_empty());
        assert!(!device.claimed);
    }

    #[test]
    fn test_close_releases_interface_and_reads() {
        let (backend, device, session) = open_one();
        session.close();
        assert!(!device.lock().unwrap().claimed);
        assert!(device.lock().unwrap().pending.is_empty());

        // The device can be opened again once released
        let session = GsUsb::open(&backend, "1-1").unwrap();
        assert_eq!(session.pending_reads(), GS_MAX_RX_URBS);
    }

    #[test]
    fn test_drop_closes_session() {
        let (_backend, device, session) = open_one();
        drop(session);
        assert!(!device.lock().unwrap().claimed);
    }

    #[test]
    fn test_reset_and_start_send_mode_requests() {
        let (_backend, device, mut session) = open_one();
        session.start(0, GS_CAN_MODE_LOOP_BACK).unwrap();
        session.reset(0).unwrap();

        let log = device.lock().unwrap().control_log.clone();
        let modes: Vec<_> = log
            .iter()
            .filter(|r| r.request == GS_USB_BREQ_MODE)
            .collect();
        assert_eq!(modes.len(), 2);
        assert_eq!(
            modes[0].data,
            DeviceMode::new(CanMode::Start, GS_CAN_MODE_LOOP_BACK)
                .pack()
                .to_vec()
        );
        assert_eq!(modes[1].data, DeviceMode::new(CanMode::Reset, 0).pack().to_vec());
    }

    #[test]
    fn test_set_mode_failure_is_recorded() {
        let (_backend, device, mut session) = open_one();
        device.lock().unwrap().fail_requests.push(GS_USB_BREQ_MODE);

        let err = session.start(0, GS_CAN_MODE_NORMAL).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SetMode);
        assert_eq!(session.last_error(), Some(ErrorCode::SetMode));

        device.lock().unwrap().fail_requests.clear();
        session.start(0, GS_CAN_MODE_NORMAL).unwrap();
        assert_eq!(session.last_error(), None);
    }

    #[test]
    fn test_set_bitrate_writes_table_timing() {
        let (_backend, device, mut session) = open_one();
        session.set_bitrate(0, 500_000).unwrap();

        let expected = bittiming::lookup(500_000).unwrap();
        assert_eq!(session.last_timing(), Some(expected));

        let log = device.lock().unwrap().control_log.clone();
        let last = log.last().unwrap();
        assert_eq!(last.request, GS_USB_BREQ_BITTIMING);
        assert_eq!(last.value, 0);
        assert_eq!(last.data, expected.pack().to_vec());
    }

    #[test]
    fn test_set_bitrate_clock_mismatch_for_every_rate() {
        init_logger();
        let backend = MockBackend::with_devices(1);
        backend.device(0).lock().unwrap().fclk_can = 80_000_000;
        let mut session = GsUsb::open(&backend, "1-1").unwrap();
        let before = backend.device(0).lock().unwrap().control_log.len();

        for bitrate in bittiming::supported_bitrates() {
            let err = session.set_bitrate(0, bitrate).unwrap_err();
            assert_eq!(err.code(), ErrorCode::ClockMismatch);
            assert_eq!(session.last_error(), Some(ErrorCode::ClockMismatch));
        }
        assert_eq!(backend.device(0).lock().unwrap().control_log.len(), before);
    }

    #[test]
    fn test_set_bitrate_unlisted_rate_regardless_of_clock() {
        for clock in [48_000_000, 40_000_000] {
            init_logger();
            let backend = MockBackend::with_devices(1);
            backend.device(0).lock().unwrap().fclk_can = clock;
            let mut session = GsUsb::open(&backend, "1-1").unwrap();

            let err = session.set_bitrate(0, 33_333).unwrap_err();
            assert_eq!(err.code(), ErrorCode::UnsupportedBitrate);
            assert_eq!(session.last_timing(), None);
        }
    }

    #[test]
    fn test_set_bittiming_failure() {
        let (_backend, device, mut session) = open_one();
        device
            .lock()
            .unwrap()
            .fail_requests
            .push(GS_USB_BREQ_BITTIMING);

        let timing = DeviceBitTiming::new(1, 12, 2, 1, 6);
        let err = session.set_bittiming(0, &timing).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SetBitTiming);
        assert_eq!(session.last_timing(), None);
    }

    #[test]
    fn test_channel_out_of_range_is_rejected_before_transfer() {
        let (_backend, device, mut session) = open_one();
        let before = device.lock().unwrap().control_log.len();

        let err = session.start(1, GS_CAN_MODE_NORMAL).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidChannel);
        let err = session.set_bitrate(1, 500_000).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidChannel);
        let err = session
            .send_frame(1, &GsUsbFrame::with_data(0x1, &[]))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidChannel);

        let device = device.lock().unwrap();
        assert_eq!(device.control_log.len(), before);
        assert!(device.written.is_empty());
    }

    #[test]
    fn test_send_frame_forces_echo_id_and_channel() {
        init_logger();
        let backend = MockBackend::with_devices(1);
        backend.device(0).lock().unwrap().icount = 1;
        let mut session = GsUsb::open(&backend, "1-1").unwrap();
        assert_eq!(session.channel_count(), 2);

        let mut frame = GsUsbFrame::with_data(0x321, &[1, 2, 3]);
        frame.echo_id = 7;
        frame.channel = 0;
        session.send_frame(1, &frame).unwrap();

        let written = backend.device(0).lock().unwrap().written.clone();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].len(), GS_USB_FRAME_SIZE);
        assert_eq!(&written[0][0..4], &[0, 0, 0, 0]);
        assert_eq!(written[0][9], 1);
        assert_eq!(frame.echo_id, 7);
    }

    #[test]
    fn test_send_frame_short_write_fails() {
        let (_backend, device, mut session) = open_one();
        device.lock().unwrap().short_write = true;

        let err = session
            .send_frame(0, &GsUsbFrame::with_data(0x1, &[0xFF]))
            .unwrap_err();
        assert!(matches!(err, GsUsbError::ShortWrite { .. }));
        assert_eq!(session.last_error(), Some(ErrorCode::SendFrame));
    }

    #[test]
    fn test_send_frame_transport_failure() {
        let (_backend, device, mut session) = open_one();
        device.lock().unwrap().write_error = Some(rusb::Error::Pipe);

        let err = session
            .send_frame(0, &GsUsbFrame::with_data(0x1, &[]))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SendFrame);
    }

    #[test]
    fn test_loopback_round_trip() {
        let (_backend, device, mut session) = open_one();
        device.lock().unwrap().loopback = true;

        let frame = GsUsbFrame::with_data(0x123, &[0xAA, 0xBB]);
        session.send_frame(0, &frame).unwrap();

        let received = session.recv_frame(TIMEOUT).unwrap();
        assert_eq!(received.can_id, 0x123);
        assert_eq!(received.can_dlc, 2);
        assert_eq!(received.data(), &[0xAA, 0xBB]);
        assert!(received.is_echo_frame());
        assert_eq!(session.pending_reads(), GS_MAX_RX_URBS);
    }

    #[test]
    fn test_recv_timeout_keeps_pool_full() {
        let (_backend, _device, mut session) = open_one();
        let err = session.recv_frame(TIMEOUT).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(session.last_error(), Some(ErrorCode::ReadTimeout));
        assert_eq!(session.pending_reads(), GS_MAX_RX_URBS);
    }

    #[test]
    fn test_recv_size_mismatch_keeps_pool_full() {
        let (_backend, device, mut session) = open_one();
        device.lock().unwrap().incoming.push_back(Ok(vec![0u8; 12]));

        let err = session.recv_frame(TIMEOUT).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReadSize);
        assert_eq!(session.pending_reads(), GS_MAX_RX_URBS);
    }

    #[test]
    fn test_read_device_timestamp() {
        let (_backend, device, mut session) = open_one();
        device.lock().unwrap().timestamp_us = 123_456;
        assert_eq!(session.read_device_timestamp().unwrap(), 123_456);

        device
            .lock()
            .unwrap()
            .fail_requests
            .push(CANDLELIGHT_TIMESTAMP_GET);
        let err = session.read_device_timestamp().unwrap_err();
        assert_eq!(err.code(), ErrorCode::TimestampRead);
    }
}
