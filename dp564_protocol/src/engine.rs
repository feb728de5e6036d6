//! State shared between the client, the reader loop and the heartbeat emitter.

use crate::config::ClientConfig;
use crate::error::{Dp564Error, Result};
use crate::protocol::{classify, decode_volume, hex, value_byte, FrameKind, Setting};
use crate::state::{ChangeOrigin, ConnectionState, DeviceEvent, DeviceState, StatusSnapshot};
use crate::transport::Transport;
use crossbeam_channel::Sender;
use log::{debug, error, info, trace};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

/// The one outstanding command waiting for its acknowledgment
struct PendingAck {
    id: u64,
    expected_suffix: Vec<u8>,
    /// Capacity-1 channel; whoever takes the record sends into it, so at
    /// most one answer ever lands here. An error means the session failed.
    slot: Sender<Result<Vec<u8>>>,
    deadline: Instant,
}

struct SessionState {
    connection: ConnectionState,
    device: DeviceState,
    pending: Option<PendingAck>,
    failure: Option<String>,
}

pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    /// Guards device state, connection state and the pending ack together
    session: Mutex<SessionState>,
    /// Send lock. Owns the sending handle, so holding it is the only way to write.
    link: Mutex<Option<Arc<dyn Transport>>>,
    stop: AtomicBool,
    /// Dropping the sender wakes the heartbeat emitter immediately
    heartbeat_stop: Mutex<Option<Sender<()>>>,
    subscribers: Mutex<Vec<Sender<DeviceEvent>>>,
    next_request: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            config,
            session: Mutex::new(SessionState {
                connection: ConnectionState::Disconnected,
                device: DeviceState::default(),
                pending: None,
                failure: None,
            }),
            link: Mutex::new(None),
            stop: AtomicBool::new(false),
            heartbeat_stop: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            next_request: AtomicU64::new(1),
        }
    }

    pub(crate) fn connection(&self) -> ConnectionState {
        lock(&self.session).connection
    }

    pub(crate) fn set_connection(&self, connection: ConnectionState) {
        let mut session = lock(&self.session);
        debug!("🔁 {} → {}", session.connection, connection);
        session.connection = connection;
    }

    pub(crate) fn device(&self) -> DeviceState {
        lock(&self.session).device
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        let session = lock(&self.session);
        StatusSnapshot {
            connection: session.connection,
            device: session.device,
            failure: session.failure.clone(),
        }
    }

    /// Fresh session: defaults, no failure, transport wired to the send lock.
    pub(crate) fn begin_session(&self, transport: Arc<dyn Transport>) {
        {
            let mut session = lock(&self.session);
            session.device = DeviceState::default();
            session.pending = None;
            session.failure = None;
        }
        self.stop.store(false, Ordering::SeqCst);
        *lock(&self.link) = Some(transport);
    }

    pub(crate) fn arm_heartbeat_stop(&self, stop: Sender<()>) {
        *lock(&self.heartbeat_stop) = Some(stop);
    }

    /// Unwire the transport. Called once both background threads are gone.
    pub(crate) fn end_session(&self) {
        *lock(&self.link) = None;
        lock(&self.session).pending = None;
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Ask both background activities to exit at their next wake point.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        lock(&self.heartbeat_stop).take();
    }

    /// Mark the session failed after a mid-session transport error.
    ///
    /// Only an active session moves to `ShuttingDown` here; the actual
    /// teardown is left to the lifecycle manager. A command still waiting
    /// for its ack is handed `cause`.
    pub(crate) fn fail(&self, reason: String, cause: Dp564Error) {
        let (newly_failed, pending) = {
            let mut session = lock(&self.session);
            if session.connection == ConnectionState::Active {
                session.connection = ConnectionState::ShuttingDown;
                session.failure = Some(reason.clone());
                (true, session.pending.take())
            } else {
                (false, None)
            }
        };

        self.request_stop();

        if let Some(pending) = pending {
            debug!("📨 Failing ack #{} with: {}", pending.id, cause);
            if pending.slot.send(Err(cause)).is_err() {
                debug!("Caller for ack #{} already gave up", pending.id);
            }
        }

        if newly_failed {
            error!("❌ Session failed: {}", reason);
            self.publish(DeviceEvent::ConnectionLost(reason));
        }
    }

    /// Send frames back to back under the send lock, pausing the
    /// inter-frame delay between them. The device reads a pre-command and
    /// its command as one message, so nothing may be written in the gap.
    pub(crate) fn send_frames(&self, frames: &[&[u8]]) -> io::Result<()> {
        let link = lock(&self.link);
        let transport = link
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no transport"))?;

        for (i, frame) in frames.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.config.inter_frame_delay);
            }
            trace!("📤 {}", hex(frame));
            transport.send(frame)?;
        }
        Ok(())
    }

    /// Register the command about to be sent. Fails without side effects
    /// when the session is not active or another command is outstanding.
    pub(crate) fn install_pending(
        &self,
        expected_suffix: Vec<u8>,
        slot: Sender<Result<Vec<u8>>>,
        deadline: Instant,
    ) -> Result<u64> {
        let mut session = lock(&self.session);

        if session.connection != ConnectionState::Active {
            return Err(Dp564Error::CommandRejected(format!(
                "not connected ({})",
                session.connection
            )));
        }
        if session.pending.is_some() {
            return Err(Dp564Error::CommandBusy);
        }

        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        debug!(
            "⏳ Awaiting ack #{} ending in {} (deadline in {:?})",
            id,
            hex(&expected_suffix),
            deadline.saturating_duration_since(Instant::now())
        );
        session.pending = Some(PendingAck {
            id,
            expected_suffix,
            slot,
            deadline,
        });
        Ok(id)
    }

    /// Drop the pending ack if it still belongs to request `id`.
    pub(crate) fn clear_pending(&self, id: u64) {
        let mut session = lock(&self.session);
        if session.pending.as_ref().is_some_and(|p| p.id == id) {
            session.pending = None;
        }
    }

    /// Apply a setting the device acknowledged.
    pub(crate) fn confirm(&self, setting: Setting) {
        lock(&self.session).device.apply(setting);
        self.publish(DeviceEvent::from_setting(setting, ChangeOrigin::Command));
    }

    /// Route one inbound frame. Runs on the reader thread only.
    pub(crate) fn route_frame(&self, frame: Vec<u8>) {
        let kind = classify(&frame);

        match kind {
            FrameKind::Heartbeat => {
                trace!("💓 Heartbeat from device");
            }
            FrameKind::VolumeUpdate => {
                let Some(byte) = value_byte(&frame) else {
                    return;
                };
                let db = decode_volume(byte);
                let changed = {
                    let mut session = lock(&self.session);
                    let changed = session.device.volume_db != db;
                    session.device.apply(Setting::Volume(db));
                    changed
                };
                if changed {
                    info!("🎚️ Volume updated by device to {:.1} dB", db);
                    self.publish(DeviceEvent::VolumeChanged {
                        db,
                        origin: ChangeOrigin::Device,
                    });
                }
            }
            _ => {
                if kind == FrameKind::VolumeAck {
                    if let Some(byte) = value_byte(&frame) {
                        debug!("🎚️ Device reports volume {:.1} dB", decode_volume(byte));
                    }
                }

                let pending = lock(&self.session).pending.take();
                match pending {
                    Some(pending) => {
                        debug!(
                            "📨 Delivering {:?} frame {} to ack #{} (expects {}, {:?} left)",
                            kind,
                            hex(&frame),
                            pending.id,
                            hex(&pending.expected_suffix),
                            pending.deadline.saturating_duration_since(Instant::now())
                        );
                        if pending.slot.send(Ok(frame)).is_err() {
                            debug!("Caller for ack #{} already gave up", pending.id);
                        }
                    }
                    None => {
                        debug!(
                            "🗑️ Dropping {:?} frame with no command pending: {}",
                            kind,
                            hex(&frame)
                        );
                    }
                }
            }
        }
    }

    pub(crate) fn subscribe(&self, subscriber: Sender<DeviceEvent>) {
        lock(&self.subscribers).push(subscriber);
    }

    fn publish(&self, event: DeviceEvent) {
        lock(&self.subscribers).retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
