use crate::engine::Shared;
use crate::error::Dp564Error;
use crate::protocol::HEARTBEAT;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, trace};
use std::sync::Arc;

/// Heartbeat emitter: one keep-alive per interval until stopped.
///
/// The interval wait doubles as the stop signal: the lifecycle manager drops
/// the sending half of `stop` and the wait returns at once.
pub(crate) fn run(shared: Arc<Shared>, stop: Receiver<()>) {
    let interval = shared.config.heartbeat_interval;
    debug!("💓 Heartbeat emitter started ({:?} interval)", interval);

    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if shared.stop_requested() {
            break;
        }

        trace!("💓 Sending heartbeat");
        if let Err(e) = shared.send_frames(&[&HEARTBEAT]) {
            shared.fail(
                format!("failed to send heartbeat: {}", e),
                Dp564Error::Transport(e),
            );
            break;
        }
    }

    debug!("💓 Heartbeat emitter stopped");
}
