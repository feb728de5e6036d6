//! # DP564 Protocol
//!
//! TCP control protocol and client for the DP564 audio decoder.
//!
//! This crate provides:
//! - Wire catalog for the device's binary frames (commands, acks, heartbeats)
//! - A blocking client that keeps the session alive and confirms every command
//! - A mock device for tests and local development
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dp564_protocol::{ClientConfig, Dp564Client, Source};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Dp564Client::new(ClientConfig::new("192.168.0.11", 4444));
//! client.connect()?;
//!
//! client.set_volume_db(-20.5)?;
//! client.set_source(Source::Optical)?;
//!
//! let state = client.device_state();
//! println!("Volume {:.1} dB, source {}", state.volume_db, state.source);
//!
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod mock_device;
pub mod protocol;
pub mod state;
pub mod transport;

mod engine;
mod heartbeat;
mod reader;

// Re-export commonly used types
pub use client::Dp564Client;
pub use config::{ClientConfig, DEFAULT_PORT};
pub use error::{Dp564Error, Result};
pub use mock_device::{AckMode, MockDevice, MockDeviceConfig, MockDeviceHandle};
pub use state::{
    ChangeOrigin, Confirmed, ConnectionState, DeviceEvent, DeviceState, Source, StatusSnapshot,
};
pub use transport::{TcpTransport, Transport};
