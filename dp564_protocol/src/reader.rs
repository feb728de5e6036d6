use crate::engine::Shared;
use crate::error::Dp564Error;
use crate::protocol::FrameSplitter;
use crate::transport::{is_timeout, Transport};
use log::{debug, info};
use std::io;
use std::sync::Arc;

const READ_CHUNK: usize = 1024;

/// Reader loop: the only code that receives from the transport.
///
/// Runs until a stop is requested or the transport fails. Frames are routed
/// in arrival order.
pub(crate) fn run(shared: Arc<Shared>, transport: Arc<dyn Transport>, mut frames: FrameSplitter) {
    debug!("👂 Reader loop started");
    let mut buf = [0u8; READ_CHUNK];

    while !shared.stop_requested() {
        match transport.recv(&mut buf) {
            Ok(0) => {
                info!("🔌 Connection closed by the DP564");
                shared.fail(
                    "connection closed by the device".to_string(),
                    Dp564Error::TransportClosed,
                );
                break;
            }
            Ok(n) => {
                frames.extend(&buf[..n]);
                while let Some(frame) = frames.next_frame() {
                    shared.route_frame(frame);
                }
            }
            Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !shared.stop_requested() {
                    shared.fail(format!("read failed: {}", e), Dp564Error::Transport(e));
                }
                break;
            }
        }
    }

    debug!("👂 Reader loop stopped");
}
