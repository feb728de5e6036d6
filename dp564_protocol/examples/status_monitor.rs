//! Connect to a DP564 and print every state change it reports.
//!
//! Start the mock device first:
//! ```bash
//! cd dp564_protocol && cargo run --bin mock_dp564 -- --knob-secs 2
//! ```
//!
//! Then run this example:
//! ```bash
//! cd dp564_protocol && cargo run --example status_monitor -- 127.0.0.1:4444
//! ```

use dp564_protocol::{ChangeOrigin, ClientConfig, DeviceEvent, Dp564Client};
use log::{error, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4444".to_string());

    info!("🚀 Starting DP564 status monitor");

    let client = Dp564Client::new(ClientConfig {
        address,
        ..ClientConfig::default()
    });
    let events = client.subscribe();
    client.connect()?;
    info!("✅ Connected to DP564");

    let state = client.device_state();
    println!(
        "Assumed state: volume {:.1} dB, DIM {}, source {}",
        state.volume_db,
        if state.dim { "ON" } else { "OFF" },
        state.source
    );

    info!("👂 Listening for device events... (Press Ctrl+C to stop)");

    for event in events {
        match event {
            DeviceEvent::VolumeChanged { db, origin } => match origin {
                ChangeOrigin::Device => println!("🎚️ Knob: volume {:.1} dB", db),
                ChangeOrigin::Command => println!("🎚️ Volume {:.1} dB", db),
            },
            DeviceEvent::DimChanged(on) => println!("🌗 DIM {}", if on { "ON" } else { "OFF" }),
            DeviceEvent::SourceChanged(source) => println!("🎛️ Source {}", source),
            DeviceEvent::ConnectionLost(reason) => {
                error!("❌ Connection lost: {}", reason);
                break;
            }
        }
    }

    client.disconnect();
    Ok(())
}
