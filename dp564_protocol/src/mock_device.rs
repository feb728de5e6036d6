//! Simulated DP564 for tests and local development.
//!
//! Speaks enough of the control protocol to exercise the client: answers the
//! handshake with a status backlog and a heartbeat, acknowledges commands,
//! sends periodic heartbeats, and can simulate the front-panel knob.

use crate::protocol::{
    decode_volume, encode_volume, hex, Setting, DIM_ACK_PREFIX, DIM_CMD_PREFIX, HANDSHAKE_MSG_1,
    HANDSHAKE_MSG_2, HEARTBEAT, PRE_COMMAND, SOURCE_ACK_PREFIX, SOURCE_CMD_PREFIX,
    VOLUME_ACK_PREFIX, VOLUME_CMD_PREFIX, VOLUME_DEVICE_UPDATE_PREFIX,
};
use crate::state::{DeviceState, Source};
use crate::transport::is_timeout;
use log::{debug, error, info, warn};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const COMMAND_LEN: usize = 6;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How the mock answers commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Acknowledge with the value that was set
    #[default]
    Normal,
    /// Never acknowledge
    Silent,
    /// Acknowledge with a different value than the one requested
    Wrong,
}

/// Configuration for the mock device
#[derive(Debug, Clone)]
pub struct MockDeviceConfig {
    /// Address to bind to (use "127.0.0.1:0" for a random port)
    pub bind_address: String,
    /// State reported in the backlog and used until commands change it
    pub initial_state: DeviceState,
    /// Send volume/dim/source status frames ahead of the first heartbeat
    pub send_backlog: bool,
    pub ack_mode: AckMode,
    /// Interval of the device's own heartbeats
    pub heartbeat_interval: Duration,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            initial_state: DeviceState::default(),
            send_backlog: true,
            ack_mode: AckMode::Normal,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// Writable side of one client connection
type ClientStream = Arc<Mutex<TcpStream>>;

/// Everything the connection threads share
struct DeviceShared {
    config: MockDeviceConfig,
    state: Mutex<DeviceState>,
    clients: Mutex<Vec<ClientStream>>,
    commands_received: AtomicUsize,
    heartbeats_received: AtomicUsize,
    should_stop: AtomicBool,
}

/// Mock DP564 accepting any number of control connections
pub struct MockDevice {
    shared: Arc<DeviceShared>,
    actual_port: Option<u16>,
}

impl MockDevice {
    pub fn new(config: MockDeviceConfig) -> Self {
        info!("🎛️ Mock DP564 configured:");
        info!("  🔊 Volume: {:.1} dB", config.initial_state.volume_db);
        info!("  🌗 Dim: {}", config.initial_state.dim);
        info!("  🎚️ Source: {}", config.initial_state.source);
        info!("  📨 Ack mode: {:?}", config.ack_mode);

        Self {
            shared: Arc::new(DeviceShared {
                state: Mutex::new(config.initial_state),
                config,
                clients: Mutex::new(Vec::new()),
                commands_received: AtomicUsize::new(0),
                heartbeats_received: AtomicUsize::new(0),
                should_stop: AtomicBool::new(false),
            }),
            actual_port: None,
        }
    }

    /// Start accepting connections and return the bound port
    pub fn start(&mut self) -> io::Result<u16> {
        let listener = TcpListener::bind(&self.shared.config.bind_address)?;
        listener.set_nonblocking(true)?;
        let actual_port = listener.local_addr()?.port();
        self.actual_port = Some(actual_port);

        info!("🎛️ Mock DP564 listening on 127.0.0.1:{}", actual_port);

        let shared = self.shared.clone();
        thread::spawn(move || {
            let mut next_client_id = 1usize;

            while !shared.should_stop.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let client_id = next_client_id;
                        next_client_id += 1;
                        info!("📡 Client {} connected from {}", client_id, peer);

                        let shared = shared.clone();
                        thread::spawn(move || {
                            if let Err(e) = handle_client(stream, client_id, shared) {
                                error!("Client {} error: {}", client_id, e);
                            }
                        });
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(POLL_INTERVAL);
                    }
                    Err(e) => {
                        error!("Connection error: {}", e);
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }

            debug!("🛑 Mock DP564 accept loop stopped");
        });

        Ok(actual_port)
    }

    /// Start in the background and return a handle for testing
    pub fn start_background(mut self) -> io::Result<MockDeviceHandle> {
        let port = self.start()?;
        Ok(MockDeviceHandle { port, device: self })
    }

    pub fn port(&self) -> Option<u16> {
        self.actual_port
    }

    /// Current state as the mock sees it
    pub fn state(&self) -> DeviceState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn commands_received(&self) -> usize {
        self.shared.commands_received.load(Ordering::SeqCst)
    }

    pub fn heartbeats_received(&self) -> usize {
        self.shared.heartbeats_received.load(Ordering::SeqCst)
    }

    /// Simulate the volume knob: update the volume and announce it to every client.
    pub fn push_volume(&self, db: f32) {
        let byte = encode_volume(db);
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(Setting::Volume(decode_volume(byte)));

        info!("🎚️ Knob turned to {:.1} dB", decode_volume(byte));
        let mut frame = VOLUME_DEVICE_UPDATE_PREFIX.to_vec();
        frame.push(byte);
        self.shared.broadcast(&frame);
    }

    /// Drop every open connection, as a power cycle would.
    pub fn hang_up(&self) {
        let clients = std::mem::take(
            &mut *self
                .shared
                .clients
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for client in clients {
            let stream = client.lock().unwrap_or_else(PoisonError::into_inner);
            stream.shutdown(Shutdown::Both).ok();
        }
        info!("🔌 Mock DP564 hung up");
    }

    pub fn stop(&self) {
        self.shared.should_stop.store(true, Ordering::Relaxed);
        self.hang_up();
    }
}

impl DeviceShared {
    fn broadcast(&self, frame: &[u8]) {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.retain(|client| {
            let mut stream = client.lock().unwrap_or_else(PoisonError::into_inner);
            match stream.write_all(frame) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Dropping client after failed write: {}", e);
                    false
                }
            }
        });
    }

    fn register(&self, client: ClientStream) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
    }

    fn unregister(&self, client: &ClientStream) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|c| !Arc::ptr_eq(c, client));
    }

    /// Status frames describing the current state, in the order the device dumps them
    fn backlog(&self) -> Vec<u8> {
        let state = *self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&VOLUME_ACK_PREFIX);
        bytes.push(encode_volume(state.volume_db));
        bytes.extend_from_slice(&DIM_ACK_PREFIX);
        bytes.push(u8::from(state.dim));
        bytes.extend_from_slice(&SOURCE_ACK_PREFIX);
        bytes.push(state.source.index());
        bytes
    }

    /// Apply a command and build the reply the configured ack mode calls for.
    fn answer(&self, command: &[u8]) -> Option<Vec<u8>> {
        self.commands_received.fetch_add(1, Ordering::SeqCst);
        let (prefix, value) = command.split_at(command.len() - 1);
        let value = value[0];

        let (ack_prefix, setting) = if prefix == VOLUME_CMD_PREFIX {
            (VOLUME_ACK_PREFIX, Setting::Volume(decode_volume(value)))
        } else if prefix == DIM_CMD_PREFIX {
            (DIM_ACK_PREFIX, Setting::Dim(value != 0))
        } else if prefix == SOURCE_CMD_PREFIX {
            let Some(source) = Source::from_index(value) else {
                warn!("⚠️ Unknown source index {}", value);
                return None;
            };
            (SOURCE_ACK_PREFIX, Setting::Source(source))
        } else {
            warn!("⚠️ Unknown command: {}", hex(command));
            return None;
        };

        let reply_value = match self.config.ack_mode {
            AckMode::Silent => return None,
            AckMode::Wrong => value.wrapping_add(1),
            AckMode::Normal => {
                self.state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(setting);
                value
            }
        };

        let mut reply = ack_prefix.to_vec();
        reply.push(reply_value);
        Some(reply)
    }
}

/// What the front of the inbound buffer holds
enum Inbound {
    Handshake,
    Heartbeat,
    Command(Vec<u8>),
    Garbage,
}

/// Take the next complete client message off the front of `buf`.
fn next_inbound(buf: &mut Vec<u8>) -> Option<Inbound> {
    if buf.is_empty() {
        return None;
    }

    let prefix_len = buf.len().min(HANDSHAKE_MSG_1.len());
    if buf[..prefix_len] == HANDSHAKE_MSG_1[..prefix_len] {
        // The handshake and the heartbeat share their first four bytes
        if buf.len() < HEARTBEAT.len() {
            return None;
        }
        let message = match buf[HANDSHAKE_MSG_1.len()] {
            b if b == HANDSHAKE_MSG_2[0] => Inbound::Handshake,
            b if b == HEARTBEAT[HEARTBEAT.len() - 1] => Inbound::Heartbeat,
            _ => Inbound::Garbage,
        };
        buf.drain(..HEARTBEAT.len());
        return Some(message);
    }

    if buf[..prefix_len] == PRE_COMMAND[..prefix_len] {
        let total = PRE_COMMAND.len() + COMMAND_LEN;
        if buf.len() < total {
            return None;
        }
        let command = buf[PRE_COMMAND.len()..total].to_vec();
        buf.drain(..total);
        return Some(Inbound::Command(command));
    }

    buf.remove(0);
    Some(Inbound::Garbage)
}

fn handle_client(
    mut stream: TcpStream,
    client_id: usize,
    shared: Arc<DeviceShared>,
) -> io::Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(POLL_INTERVAL))?;
    stream.set_nodelay(true)?;
    let writer: ClientStream = Arc::new(Mutex::new(stream.try_clone()?));

    let mut pending = Vec::new();
    let mut buf = [0u8; 1024];
    let mut handshaken = false;
    let mut last_heartbeat = Instant::now();

    let result = 'session: loop {
        if shared.should_stop.load(Ordering::Relaxed) {
            break Ok(());
        }

        if handshaken && last_heartbeat.elapsed() >= shared.config.heartbeat_interval {
            last_heartbeat = Instant::now();
            if let Err(e) = write_to(&writer, &HEARTBEAT) {
                break Err(e);
            }
        }

        let n = match stream.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(message) = next_inbound(&mut pending) {
            match message {
                Inbound::Handshake => {
                    info!("🤝 Client {} completed handshake", client_id);
                    let mut dump = if shared.config.send_backlog {
                        shared.backlog()
                    } else {
                        Vec::new()
                    };
                    dump.extend_from_slice(&HEARTBEAT);
                    if !handshaken {
                        handshaken = true;
                        shared.register(writer.clone());
                    }
                    if let Err(e) = write_to(&writer, &dump) {
                        break 'session Err(e);
                    }
                    last_heartbeat = Instant::now();
                }
                Inbound::Heartbeat => {
                    shared.heartbeats_received.fetch_add(1, Ordering::SeqCst);
                    debug!("💓 Heartbeat from client {}", client_id);
                }
                Inbound::Command(command) => {
                    debug!("📥 Client {} command: {}", client_id, hex(&command));
                    if let Some(reply) = shared.answer(&command) {
                        if let Err(e) = write_to(&writer, &reply) {
                            break 'session Err(e);
                        }
                    }
                }
                Inbound::Garbage => {
                    debug!("🗑️ Client {} sent unexpected bytes", client_id);
                }
            }
        }
    };

    shared.unregister(&writer);
    info!("🔌 Client {} disconnected", client_id);
    result
}

fn write_to(client: &ClientStream, bytes: &[u8]) -> io::Result<()> {
    client
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .write_all(bytes)
}

/// Handle for a mock device running in the background
pub struct MockDeviceHandle {
    pub port: u16,
    device: MockDevice,
}

impl MockDeviceHandle {
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn device(&self) -> &MockDevice {
        &self.device
    }

    pub fn stop(&self) {
        self.device.stop();
    }
}

impl Drop for MockDeviceHandle {
    fn drop(&mut self) {
        self.stop();
        // Give the connection threads a moment to notice
        thread::sleep(Duration::from_millis(50));
    }
}
