use clap::Parser;
use dp564_protocol::{AckMode, DeviceState, MockDevice, MockDeviceConfig, Source};
use log::info;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mock_dp564")]
#[command(about = "Mock DP564 that speaks the remote control protocol for testing")]
struct Args {
    /// Address to bind the TCP server to
    #[arg(short, long, default_value = "127.0.0.1:4444")]
    address: String,

    /// Initial volume in dB
    #[arg(long, default_value = "-30.0", allow_negative_numbers = true)]
    volume: f32,

    /// Initial source (aes1, aes2, optical, streaming)
    #[arg(long, default_value = "aes1")]
    source: Source,

    /// Start with DIM on
    #[arg(long)]
    dim: bool,

    /// Never acknowledge commands
    #[arg(long, conflicts_with = "wrong_acks")]
    silent: bool,

    /// Acknowledge commands with the wrong value
    #[arg(long)]
    wrong_acks: bool,

    /// Seconds between device heartbeats
    #[arg(long, default_value = "10")]
    heartbeat_secs: u64,

    /// Simulate the volume knob: seconds between 1 dB steps of a volume sweep (0 = off)
    #[arg(long, default_value = "0")]
    knob_secs: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    info!("🚀 Starting mock DP564 with args: {:?}", args);

    let initial_state = DeviceState {
        volume_db: args.volume,
        dim: args.dim,
        source: args.source,
        ..DeviceState::default()
    };

    let ack_mode = if args.silent {
        AckMode::Silent
    } else if args.wrong_acks {
        AckMode::Wrong
    } else {
        AckMode::Normal
    };

    let mut device = MockDevice::new(MockDeviceConfig {
        bind_address: args.address,
        initial_state,
        send_backlog: true,
        ack_mode,
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
    });

    let port = device.start()?;
    info!("🎛️ Mock DP564 started on port {}", port);

    // Runs until killed
    let mut step = -1.0;
    loop {
        if args.knob_secs == 0 {
            thread::sleep(Duration::from_secs(1));
            continue;
        }

        thread::sleep(Duration::from_secs(args.knob_secs));
        let volume = device.state().volume_db;
        if volume + step < -95.0 || volume + step > 0.0 {
            step = -step;
        }
        device.push_volume(volume + step);
    }
}
