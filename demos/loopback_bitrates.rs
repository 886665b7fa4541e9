//! Loopback bitrate check
//!
//! Walks every rate in the bit timing table on the first available adapter:
//! 1. Configures the rate and starts channel 0 in loopback mode
//! 2. Sends a test frame
//! 3. Expects the transmit echo and the looped-back frame with the same payload

use std::time::{Duration, Instant};

use candle_usb::{bittiming, GsUsb, GsUsbFrame, GS_CAN_MODE_LOOP_BACK};

const TEST_CAN_ID: u32 = 0x123;
const TEST_DATA: [u8; 8] = [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE];
const READ_TIMEOUT: Duration = Duration::from_millis(100);

struct Outcome {
    echo_ok: bool,
    rx_ok: bool,
}

fn check_bitrate(dev: &mut GsUsb, bitrate: u32) -> candle_usb::Result<Outcome> {
    dev.set_bitrate(0, bitrate)?;
    dev.start(0, GS_CAN_MODE_LOOP_BACK)?;
    dev.send_frame(0, &GsUsbFrame::with_data(TEST_CAN_ID, &TEST_DATA))?;

    let mut outcome = Outcome {
        echo_ok: false,
        rx_ok: false,
    };
    let deadline = Instant::now() + Duration::from_secs(2);
    while !(outcome.echo_ok && outcome.rx_ok) && Instant::now() < deadline {
        let frame = match dev.recv_frame(READ_TIMEOUT) {
            Ok(frame) => frame,
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e),
        };
        let matches = frame.arbitration_id() == TEST_CAN_ID && frame.data() == &TEST_DATA[..];
        if frame.is_echo_frame() {
            outcome.echo_ok |= matches;
        } else {
            outcome.rx_ok |= matches;
        }
    }

    dev.reset(0)?;
    Ok(outcome)
}

fn main() {
    env_logger::init();

    let list = match GsUsb::find_devices(16) {
        Ok(list) => list,
        Err(e) => {
            eprintln!("Discovery failed: {}", e);
            std::process::exit(1);
        }
    };
    let path = match list.available().next() {
        Some(device) => device.path.clone(),
        None => {
            println!("No available gs_usb device");
            return;
        }
    };

    let mut dev = match GsUsb::open_path(&path) {
        Ok(dev) => dev,
        Err(e) => {
            eprintln!("Failed to open {}: {}", path, e);
            std::process::exit(1);
        }
    };
    println!("Testing {}\n", dev);

    let mut failed = 0;
    for bitrate in bittiming::supported_bitrates() {
        let status = match check_bitrate(&mut dev, bitrate) {
            Ok(Outcome {
                echo_ok: true,
                rx_ok: true,
            }) => "PASS".to_string(),
            Ok(outcome) => {
                failed += 1;
                format!("FAIL (echo: {}, rx: {})", outcome.echo_ok, outcome.rx_ok)
            }
            Err(e) => {
                failed += 1;
                format!("FAIL ({})", e)
            }
        };
        println!("{:>9} bit/s  {}", bitrate, status);
    }

    dev.close();
    if failed > 0 {
        std::process::exit(1);
    }
}
