use crate::config::ClientConfig;
use crate::engine::Shared;
use crate::error::{Dp564Error, Result};
use crate::protocol::{
    find_heartbeat, hex, FrameSplitter, Setting, HANDSHAKE_MSG_1, HANDSHAKE_MSG_2, HEARTBEAT,
    MAX_VOLUME_DB, MIN_VOLUME_DB, PRE_COMMAND,
};
use crate::state::{ConnectionState, DeviceEvent, DeviceState, Source, StatusSnapshot};
use crate::transport::{is_timeout, TcpTransport, Transport};
use crate::{heartbeat, reader};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Resources owned by one connected session
struct Session {
    transport: Arc<dyn Transport>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// Client for a single DP564 device.
///
/// Commands block the calling thread until the device acknowledges them or
/// the ack timeout expires. Only one command may be outstanding at a time;
/// a second concurrent call is rejected with [`Dp564Error::CommandBusy`].
pub struct Dp564Client {
    shared: Arc<Shared>,
    /// Held for the whole of connect/disconnect, so lifecycle transitions
    /// have a single writer.
    lifecycle: Mutex<Option<Session>>,
}

impl Dp564Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Open a TCP connection to the configured address and start a session.
    pub fn connect(&self) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle();
        self.ready_for_session(&mut lifecycle)?;

        let address = self.shared.config.address.clone();
        self.shared.set_connection(ConnectionState::Connecting);
        info!("📡 Connecting to DP564 at {}...", address);

        let transport = match TcpTransport::connect(&address, self.shared.config.connect_timeout) {
            Ok(transport) => transport,
            Err(e) => {
                self.shared.set_connection(ConnectionState::Disconnected);
                return Err(Dp564Error::ConnectFailure(format!("{}: {}", address, e)));
            }
        };
        info!("✅ Connection successful");

        *lifecycle = Some(self.start_session(Arc::new(transport))?);
        Ok(())
    }

    /// Start a session over an already opened transport.
    pub fn attach<T: Transport>(&self, transport: T) -> Result<()> {
        let mut lifecycle = self.lock_lifecycle();
        self.ready_for_session(&mut lifecycle)?;

        self.shared.set_connection(ConnectionState::Connecting);
        *lifecycle = Some(self.start_session(Arc::new(transport))?);
        Ok(())
    }

    /// Stop both background activities, wait for them, close the transport.
    ///
    /// Does nothing when already disconnected.
    pub fn disconnect(&self) {
        let mut lifecycle = self.lock_lifecycle();
        self.teardown(&mut lifecycle);
    }

    pub fn set_volume_db(&self, db: f32) -> Result<()> {
        if !(MIN_VOLUME_DB..=MAX_VOLUME_DB).contains(&db) {
            return Err(Dp564Error::CommandRejected(format!(
                "volume {} dB is outside {:.1} to {:.1} dB",
                db, MIN_VOLUME_DB, MAX_VOLUME_DB
            )));
        }
        self.execute(Setting::Volume(db))
    }

    pub fn set_dim(&self, on: bool) -> Result<()> {
        self.execute(Setting::Dim(on))
    }

    /// Flip DIM relative to the last known state. Returns the new state.
    pub fn toggle_dim(&self) -> Result<bool> {
        let target = !self.shared.device().dim;
        self.execute(Setting::Dim(target))?;
        Ok(target)
    }

    pub fn set_source(&self, source: Source) -> Result<()> {
        self.execute(Setting::Source(source))
    }

    /// Select a source by name (`aes1`, `aes2`, `optical`, `streaming`, any case).
    pub fn set_source_name(&self, name: &str) -> Result<()> {
        let source = name.trim().parse::<Source>().map_err(|_| {
            Dp564Error::CommandRejected(format!(
                "unknown source '{}', choose from: {}",
                name.trim(),
                Source::names().join(", ")
            ))
        })?;
        self.set_source(source)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.snapshot()
    }

    pub fn device_state(&self) -> DeviceState {
        self.shared.device()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Active
    }

    /// Receive state changes and connection loss as they happen.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = unbounded();
        self.shared.subscribe(tx);
        rx
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Option<Session>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reap a session that failed in the background; refuse to replace a live one.
    fn ready_for_session(&self, lifecycle: &mut Option<Session>) -> Result<()> {
        match self.shared.connection() {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::ShuttingDown => {
                self.teardown(lifecycle);
                Ok(())
            }
            state => Err(Dp564Error::ConnectFailure(format!(
                "session already in progress ({})",
                state
            ))),
        }
    }

    fn start_session(&self, transport: Arc<dyn Transport>) -> Result<Session> {
        self.shared.begin_session(transport.clone());

        let leftover = match self.handshake_and_drain(transport.as_ref()) {
            Ok(leftover) => leftover,
            Err(e) => {
                self.abandon(transport.as_ref());
                return Err(e);
            }
        };

        if let Err(e) = transport.set_read_timeout(self.shared.config.read_timeout) {
            self.abandon(transport.as_ref());
            return Err(Dp564Error::ConnectFailure(format!(
                "failed to set read timeout: {}",
                e
            )));
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        self.shared.arm_heartbeat_stop(stop_tx);
        self.shared.set_connection(ConnectionState::Active);
        info!("🚀 Initial data received, starting background threads");

        let reader = {
            let shared = self.shared.clone();
            let transport = transport.clone();
            let frames = FrameSplitter::with_bytes(&leftover);
            thread::spawn(move || reader::run(shared, transport, frames))
        };
        let heartbeat = {
            let shared = self.shared.clone();
            thread::spawn(move || heartbeat::run(shared, stop_rx))
        };

        Ok(Session {
            transport,
            reader: Some(reader),
            heartbeat: Some(heartbeat),
        })
    }

    /// Send the two handshake frames, then read the device's status backlog
    /// up to its first heartbeat. Returns whatever followed that heartbeat.
    fn handshake_and_drain(&self, transport: &dyn Transport) -> Result<Vec<u8>> {
        self.shared.set_connection(ConnectionState::Handshaking);
        info!("🤝 Sending handshake...");
        self.shared
            .send_frames(&[&HANDSHAKE_MSG_1, &HANDSHAKE_MSG_2])
            .map_err(|e| Dp564Error::ConnectFailure(format!("handshake failed: {}", e)))?;

        self.shared.set_connection(ConnectionState::Draining);
        info!("📥 Receiving initial data dump from device...");
        let drain_timeout = self.shared.config.drain_timeout;
        transport
            .set_read_timeout(drain_timeout)
            .map_err(|e| Dp564Error::ConnectFailure(format!("failed to set read timeout: {}", e)))?;

        let mut backlog = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match transport.recv(&mut buf) {
                Ok(0) => {
                    return Err(Dp564Error::ConnectFailure(
                        "connection closed during initial data dump".to_string(),
                    ))
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    return Err(Dp564Error::ConnectFailure(format!(
                        "no heartbeat from device within {:?}",
                        drain_timeout
                    )))
                }
                Err(e) => {
                    return Err(Dp564Error::ConnectFailure(format!(
                        "read failed during initial data dump: {}",
                        e
                    )))
                }
            };

            backlog.extend_from_slice(&buf[..n]);
            if let Some(pos) = find_heartbeat(&backlog) {
                debug!("📥 Drained {} bytes of backlog", pos + HEARTBEAT.len());
                return Ok(backlog.split_off(pos + HEARTBEAT.len()));
            }
        }
    }

    /// Give up on a session that never became active.
    fn abandon(&self, transport: &dyn Transport) {
        self.shared.end_session();
        if let Err(e) = transport.close() {
            debug!("Closing abandoned transport failed: {}", e);
        }
        self.shared.set_connection(ConnectionState::Disconnected);
    }

    fn teardown(&self, lifecycle: &mut Option<Session>) {
        let Some(mut session) = lifecycle.take() else {
            debug!("Already disconnected");
            return;
        };

        info!("🔌 Disconnecting...");
        self.shared.set_connection(ConnectionState::ShuttingDown);
        self.shared.request_stop();

        for (name, handle) in [
            ("reader", session.reader.take()),
            ("heartbeat", session.heartbeat.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("⚠️ {} thread panicked", name);
                }
            }
        }

        self.shared.end_session();
        if let Err(e) = session.transport.close() {
            debug!("Closing transport failed: {}", e);
        }
        self.shared.set_connection(ConnectionState::Disconnected);
        info!("✅ Disconnected");
    }

    /// Send a command and wait for the device to acknowledge it.
    fn execute(&self, setting: Setting) -> Result<()> {
        let setting = setting.quantized();
        let expected = setting.expected_ack();
        let command = setting.command_frame();
        let config = &self.shared.config;

        let (slot, answer) = bounded(1);
        let deadline = Instant::now() + config.inter_frame_delay + config.ack_timeout;
        let id = self.shared.install_pending(expected.clone(), slot, deadline)?;

        match self.shared.send_frames(&[&PRE_COMMAND, &command]) {
            Ok(()) => info!("📤 Sent command: {}", describe(setting)),
            Err(e) => {
                // The failure answers the pending ack; whatever is left is dropped
                self.shared
                    .fail(format!("failed to send command: {}", e), Dp564Error::Transport(e));
                self.shared.clear_pending(id);
            }
        }

        match answer.recv_deadline(deadline) {
            Ok(Err(e)) => Err(e),
            Ok(Ok(frame)) if frame.ends_with(&expected) => {
                self.shared.confirm(setting);
                info!("✅ {} acknowledged", describe(setting));
                Ok(())
            }
            Ok(Ok(frame)) => {
                warn!(
                    "⚠️ Received unexpected ACK for {}: {}",
                    describe(setting),
                    hex(&frame)
                );
                Err(Dp564Error::AckMismatch { frame })
            }
            Err(RecvTimeoutError::Timeout) => {
                self.shared.clear_pending(id);
                warn!("⚠️ No acknowledgment received for {}", describe(setting));
                Err(Dp564Error::AckTimeout(config.ack_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Dp564Error::TransportClosed),
        }
    }
}

impl Drop for Dp564Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn describe(setting: Setting) -> String {
    match setting {
        Setting::Volume(db) => format!("volume {:.1} dB", db),
        Setting::Dim(true) => "DIM ON".to_string(),
        Setting::Dim(false) => "DIM OFF".to_string(),
        Setting::Source(source) => format!("source {}", source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        encode_volume, DIM_ACK_PREFIX, SOURCE_ACK_PREFIX, VOLUME_ACK_PREFIX,
        VOLUME_DEVICE_UPDATE_PREFIX,
    };
    use crate::state::ChangeOrigin;
    use crate::transport::memory::{DeviceEnd, MemoryTransport};
    use std::time::Duration;

    fn test_config() -> ClientConfig {
        ClientConfig {
            address: "memory".to_string(),
            drain_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(20),
            heartbeat_interval: Duration::from_secs(60),
            ack_timeout: Duration::from_millis(300),
            inter_frame_delay: Duration::from_millis(1),
            ..ClientConfig::default()
        }
    }

    fn frame(prefix: &[u8], value: u8) -> Vec<u8> {
        let mut frame = prefix.to_vec();
        frame.push(value);
        frame
    }

    fn connected(config: ClientConfig) -> (Dp564Client, Arc<MemoryTransport>, DeviceEnd) {
        let (transport, device) = MemoryTransport::pair();
        let transport = Arc::new(transport);
        device.push(&frame(&SOURCE_ACK_PREFIX, 0));
        device.push(&HEARTBEAT);

        let client = Dp564Client::new(config);
        client.attach(transport.clone()).expect("attach failed");
        (client, transport, device)
    }

    /// Push `bytes` once the command under test has had time to go out.
    fn reply_later(device: &DeviceEnd, bytes: Vec<u8>) -> thread::JoinHandle<()> {
        let device = device.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            device.push(&bytes);
        })
    }

    #[test]
    fn test_attach_sends_handshake_and_becomes_active() {
        let (client, transport, _device) = connected(test_config());

        assert!(client.is_connected());
        assert_eq!(
            transport.sent(),
            vec![HANDSHAKE_MSG_1.to_vec(), HANDSHAKE_MSG_2.to_vec()]
        );
        assert_eq!(client.device_state(), DeviceState::default());
    }

    #[test]
    fn test_attach_fails_when_device_hangs_up_before_heartbeat() {
        let (transport, device) = MemoryTransport::pair();
        let transport = Arc::new(transport);
        device.push(&frame(&DIM_ACK_PREFIX, 0));
        device.hang_up();

        let client = Dp564Client::new(test_config());
        let result = client.attach(transport.clone());

        assert!(matches!(result, Err(Dp564Error::ConnectFailure(_))));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(transport.is_closed());
    }

    #[test]
    fn test_attach_fails_when_no_heartbeat_arrives() {
        let (transport, _device) = MemoryTransport::pair();
        let client = Dp564Client::new(ClientConfig {
            drain_timeout: Duration::from_millis(50),
            ..test_config()
        });

        let result = client.attach(transport);
        assert!(matches!(result, Err(Dp564Error::ConnectFailure(_))));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_volume_ack_updates_state() {
        let (client, transport, device) = connected(test_config());
        let events = client.subscribe();
        let reply = reply_later(&device, frame(&VOLUME_ACK_PREFIX, encode_volume(-20.5)));

        client.set_volume_db(-20.5).expect("volume command failed");
        reply.join().unwrap();

        assert_eq!(client.device_state().volume_db, -20.5);
        assert!(client.device_state().confirmed.volume);
        let sent = transport.sent();
        assert_eq!(sent[2], PRE_COMMAND.to_vec());
        assert_eq!(sent[3], vec![0x02, 0x03, 0x12, 0x00, 0x00, 151]);
        assert_eq!(
            events.try_recv(),
            Ok(DeviceEvent::VolumeChanged {
                db: -20.5,
                origin: ChangeOrigin::Command
            })
        );
    }

    #[test]
    fn test_frames_are_paced_by_inter_frame_delay() {
        let delay = Duration::from_millis(30);
        let (client, transport, device) = connected(ClientConfig {
            inter_frame_delay: delay,
            ..test_config()
        });
        let reply = reply_later(&device, frame(&DIM_ACK_PREFIX, 1));

        client.set_dim(true).expect("dim command failed");
        reply.join().unwrap();

        let sent = transport.sent_at();
        assert_eq!(sent[0].1, HANDSHAKE_MSG_1.to_vec());
        assert_eq!(sent[1].1, HANDSHAKE_MSG_2.to_vec());
        assert!(sent[1].0.duration_since(sent[0].0) >= delay);
        assert_eq!(sent[2].1, PRE_COMMAND.to_vec());
        assert_eq!(sent[3].1, vec![0x02, 0x05, 0x13, 0x00, 0x00, 0x01]);
        assert!(sent[3].0.duration_since(sent[2].0) >= delay);
    }

    #[test]
    fn test_out_of_range_volume_is_rejected_without_io() {
        let (client, transport, _device) = connected(test_config());
        let before = transport.sent().len();

        for db in [-95.5, 0.5, f32::NAN] {
            let result = client.set_volume_db(db);
            assert!(
                matches!(result, Err(Dp564Error::CommandRejected(_))),
                "{} dB was not rejected",
                db
            );
        }

        assert_eq!(transport.sent().len(), before);
    }

    #[test]
    fn test_unknown_source_is_rejected_without_io() {
        let (client, transport, _device) = connected(test_config());
        let before = transport.sent().len();

        let result = client.set_source_name("hdmi");
        assert!(matches!(result, Err(Dp564Error::CommandRejected(_))));
        assert_eq!(transport.sent().len(), before);
    }

    #[test]
    fn test_commands_rejected_when_not_connected() {
        let client = Dp564Client::new(test_config());
        assert!(matches!(
            client.set_dim(true),
            Err(Dp564Error::CommandRejected(_))
        ));
    }

    #[test]
    fn test_mismatched_ack_leaves_volume_unchanged() {
        let (client, _transport, device) = connected(test_config());
        let reply = reply_later(&device, frame(&DIM_ACK_PREFIX, 1));

        let result = client.set_volume_db(-10.0);
        reply.join().unwrap();

        match result {
            Err(Dp564Error::AckMismatch { frame: got }) => {
                assert_eq!(got, frame(&DIM_ACK_PREFIX, 1))
            }
            other => panic!("expected AckMismatch, got {:?}", other),
        }
        assert_eq!(client.device_state().volume_db, 0.0);
        assert!(!client.device_state().confirmed.volume);
    }

    #[test]
    fn test_missing_ack_times_out() {
        let (client, _transport, _device) = connected(test_config());

        let started = Instant::now();
        let result = client.set_dim(true);

        assert!(matches!(result, Err(Dp564Error::AckTimeout(_))));
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!client.device_state().dim);

        // The slot is free again
        assert!(matches!(
            client.set_dim(true),
            Err(Dp564Error::AckTimeout(_))
        ));
    }

    #[test]
    fn test_unsolicited_volume_update_needs_no_pending_command() {
        let (client, _transport, device) = connected(test_config());
        let events = client.subscribe();

        device.push(&frame(&VOLUME_DEVICE_UPDATE_PREFIX, encode_volume(-10.0)));

        let event = events
            .recv_timeout(Duration::from_secs(1))
            .expect("no event for knob update");
        assert_eq!(
            event,
            DeviceEvent::VolumeChanged {
                db: -10.0,
                origin: ChangeOrigin::Device
            }
        );
        assert_eq!(client.device_state().volume_db, -10.0);
    }

    #[test]
    fn test_update_behind_uncatalogued_frame_is_applied() {
        let (client, _transport, device) = connected(test_config());
        let events = client.subscribe();

        let mut bytes = vec![0x00, 0x00, 0x00, 0x0b, 0x04, 0x07, 0x07, 0x01, 0x02, 0x00, 0x01];
        bytes.extend(frame(&VOLUME_DEVICE_UPDATE_PREFIX, encode_volume(-10.0)));
        device.push(&bytes);

        let event = events
            .recv_timeout(Duration::from_secs(1))
            .expect("update behind unknown frame was lost");
        assert_eq!(
            event,
            DeviceEvent::VolumeChanged {
                db: -10.0,
                origin: ChangeOrigin::Device
            }
        );
        assert_eq!(client.device_state().volume_db, -10.0);
        assert!(client.device_state().confirmed.volume);
    }

    #[test]
    fn test_heartbeat_does_not_resolve_pending_command() {
        let (client, _transport, device) = connected(test_config());
        let device_clone = device.clone();
        let replies = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            device_clone.push(&HEARTBEAT);
            thread::sleep(Duration::from_millis(50));
            device_clone.push(&frame(&SOURCE_ACK_PREFIX, Source::Optical.index()));
        });

        client.set_source(Source::Optical).expect("source command failed");
        replies.join().unwrap();

        let state = client.device_state();
        assert_eq!(state.source, Source::Optical);
        assert_eq!(state.volume_db, 0.0);
        assert!(!state.dim);
    }

    #[test]
    fn test_update_between_command_and_ack_does_not_resolve_it() {
        let (client, _transport, device) = connected(test_config());
        let mut bytes = frame(&VOLUME_DEVICE_UPDATE_PREFIX, encode_volume(-40.0));
        bytes.extend(frame(&DIM_ACK_PREFIX, 1));
        let reply = reply_later(&device, bytes);

        client.set_dim(true).expect("dim command failed");
        reply.join().unwrap();

        let state = client.device_state();
        assert!(state.dim);
        assert_eq!(state.volume_db, -40.0);
    }

    #[test]
    fn test_second_command_while_pending_is_busy() {
        let (client, transport, device) = connected(test_config());
        let client = Arc::new(client);

        let first = {
            let client = client.clone();
            thread::spawn(move || client.set_dim(true))
        };
        thread::sleep(Duration::from_millis(50));
        let sent_before = transport.sent().len();

        assert!(matches!(
            client.set_source(Source::Aes2),
            Err(Dp564Error::CommandBusy)
        ));
        assert_eq!(transport.sent().len(), sent_before);

        device.push(&frame(&DIM_ACK_PREFIX, 1));
        first.join().unwrap().expect("first command failed");
    }

    #[test]
    fn test_toggle_dim_flips_known_state() {
        let (client, _transport, device) = connected(test_config());

        let reply = reply_later(&device, frame(&DIM_ACK_PREFIX, 1));
        assert!(client.toggle_dim().unwrap());
        reply.join().unwrap();

        let reply = reply_later(&device, frame(&DIM_ACK_PREFIX, 0));
        assert!(!client.toggle_dim().unwrap());
        reply.join().unwrap();
        assert!(!client.device_state().dim);
    }

    #[test]
    fn test_device_hang_up_wakes_pending_command() {
        let (client, _transport, device) = connected(test_config());
        let events = client.subscribe();
        let device_clone = device.clone();
        let hang_up = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            device_clone.hang_up();
        });

        let started = Instant::now();
        let result = client.set_volume_db(-3.0);
        hang_up.join().unwrap();

        assert!(matches!(result, Err(Dp564Error::TransportClosed)));
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(client.connection_state(), ConnectionState::ShuttingDown);
        assert!(client.status().failure.is_some());
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(1)),
            Ok(DeviceEvent::ConnectionLost(_))
        ));

        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_read_error_reaches_pending_command() {
        let (client, _transport, device) = connected(test_config());
        let device_clone = device.clone();
        let reset = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            device_clone.reset();
        });

        let started = Instant::now();
        let result = client.set_dim(true);
        reset.join().unwrap();

        match result {
            Err(Dp564Error::Transport(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionReset)
            }
            other => panic!("expected a transport error, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(client.connection_state(), ConnectionState::ShuttingDown);
        assert!(client.status().failure.is_some());
    }

    #[test]
    fn test_send_failure_ends_session() {
        let (client, transport, _device) = connected(test_config());
        transport.fail_sends();

        let started = Instant::now();
        let result = client.set_dim(false);

        match result {
            Err(Dp564Error::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected a transport error, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(client.connection_state(), ConnectionState::ShuttingDown);
        assert!(matches!(
            client.set_dim(false),
            Err(Dp564Error::CommandRejected(_))
        ));
    }

    #[test]
    fn test_heartbeats_are_sent_on_interval() {
        let (client, transport, _device) = connected(ClientConfig {
            heartbeat_interval: Duration::from_millis(30),
            ..test_config()
        });

        thread::sleep(Duration::from_millis(200));
        client.disconnect();

        let heartbeats = transport
            .sent()
            .iter()
            .filter(|frame| frame.as_slice() == HEARTBEAT)
            .count();
        assert!(heartbeats >= 2, "only {} heartbeats sent", heartbeats);
    }

    #[test]
    fn test_heartbeat_failure_ends_session() {
        let (client, transport, _device) = connected(ClientConfig {
            heartbeat_interval: Duration::from_millis(20),
            ..test_config()
        });
        let events = client.subscribe();
        transport.fail_sends();

        assert!(matches!(
            events.recv_timeout(Duration::from_secs(1)),
            Ok(DeviceEvent::ConnectionLost(_))
        ));
        assert_eq!(client.connection_state(), ConnectionState::ShuttingDown);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (client, transport, _device) = connected(test_config());

        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(transport.is_closed());

        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_interrupts_heartbeat_wait() {
        let (client, _transport, _device) = connected(test_config());

        let started = Instant::now();
        client.disconnect();

        // Heartbeat interval is a minute; shutdown must not wait it out
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_reconnect_after_failure_starts_fresh_state() {
        let (client, _transport, device) = connected(test_config());
        device.push(&frame(&VOLUME_DEVICE_UPDATE_PREFIX, encode_volume(-12.0)));
        thread::sleep(Duration::from_millis(100));
        device.hang_up();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(client.connection_state(), ConnectionState::ShuttingDown);

        let (transport, device) = MemoryTransport::pair();
        device.push(&HEARTBEAT);
        client.attach(transport).expect("reattach failed");

        assert!(client.is_connected());
        assert_eq!(client.device_state(), DeviceState::default());
        assert!(client.status().failure.is_none());
    }

    #[test]
    fn test_attach_while_active_is_refused() {
        let (client, _transport, _device) = connected(test_config());
        let (other, _other_device) = MemoryTransport::pair();

        assert!(matches!(
            client.attach(other),
            Err(Dp564Error::ConnectFailure(_))
        ));
        assert!(client.is_connected());
    }
}
