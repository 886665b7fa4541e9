//! candleLight dump
//!
//! Lists connected adapters, opens the first available one and then:
//! - Configures 250 kbps on channel 0
//! - Starts the channel
//! - Prints every received frame and sends one test frame per second

use std::time::{Duration, Instant};

use candle_usb::{
    FrameType, GsUsb, GsUsbFrame, CAN_EFF_FLAG, CAN_RTR_FLAG, GS_CAN_MODE_NORMAL,
};

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> candle_usb::Result<()> {
    let list = GsUsb::find_devices(16)?;
    println!("Found {} adapter(s)", list.total);
    for device in &list.devices {
        println!("  {}", device);
    }

    let path = match list.available().next() {
        Some(device) => device.path.clone(),
        None => {
            println!("No available gs_usb device");
            return Ok(());
        }
    };

    let mut dev = GsUsb::open_path(&path)?;
    println!("Opened {}", dev);
    println!("{}", dev.capability());

    dev.set_bitrate(0, 250_000)?;
    dev.start(0, GS_CAN_MODE_NORMAL)?;
    println!("Channel 0 started at 250 kbps");

    let data: [u8; 8] = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
    let frames = [
        GsUsbFrame::with_data(0x7FF, &data),
        GsUsbFrame::with_data(0x7FF, &[]),
        GsUsbFrame::with_data(0x12345678 | CAN_EFF_FLAG, &data),
        GsUsbFrame::with_data(0x7FF | CAN_RTR_FLAG, &[]),
    ];

    let mut next_send_time = Instant::now();
    let mut frame_index = 0;

    loop {
        match dev.recv_frame(Duration::from_millis(10)) {
            Ok(frame) => match frame.frame_type() {
                FrameType::Receive => println!("RX  {}", frame),
                FrameType::Echo => println!("ACK {}", frame),
            },
            Err(e) if e.is_timeout() => {}
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }

        if Instant::now() >= next_send_time {
            next_send_time = Instant::now() + Duration::from_secs(1);

            let frame = &frames[frame_index];
            frame_index = (frame_index + 1) % frames.len();

            match dev.send_frame(0, frame) {
                Ok(()) => println!("TX  {}", frame),
                Err(e) => eprintln!("Send error: {}", e),
            }
        }
    }

    dev.reset(0)?;
    dev.close();
    Ok(())
}
