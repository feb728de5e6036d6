use std::time::Duration;

/// Default TCP port of the remote protocol
pub const DEFAULT_PORT: u16 = 4444;

/// Connection and timing settings for [`Dp564Client`](crate::Dp564Client)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device address, `host:port`
    pub address: String,
    /// Bound on opening the TCP connection
    pub connect_timeout: Duration,
    /// Read timeout while waiting for the first heartbeat after the handshake
    pub drain_timeout: Duration,
    /// Read timeout of the reader loop; also bounds how long shutdown waits for it
    pub read_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// How long a command waits for its acknowledgment
    pub ack_timeout: Duration,
    /// Gap the device needs between the two handshake frames, and between the
    /// pre-command and the command
    pub inter_frame_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("192.168.0.11:{}", DEFAULT_PORT),
            connect_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(2),
            inter_frame_delay: Duration::from_millis(100),
        }
    }
}

impl ClientConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            ..Self::default()
        }
    }
}
