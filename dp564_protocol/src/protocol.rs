//! Frame catalog for the DP564 remote protocol.
//!
//! The device does not use a universal length-prefixed framing. Every message
//! type has a fixed prefix and a fixed-width payload, so frames are recognised
//! by prefix match and cut out of the byte stream by their known widths. The
//! `00 00 00 NN` header only matters for frames outside the catalog.

use crate::state::Source;

// Client → Device
pub const HANDSHAKE_MSG_1: [u8; 4] = [0x00, 0x00, 0x00, 0x05];
pub const HANDSHAKE_MSG_2: [u8; 1] = [0x03];
/// Sent before every stateful command.
pub const PRE_COMMAND: [u8; 4] = [0x00, 0x00, 0x00, 0x0a];
pub const VOLUME_CMD_PREFIX: [u8; 5] = [0x02, 0x03, 0x12, 0x00, 0x00];
pub const DIM_CMD_PREFIX: [u8; 5] = [0x02, 0x05, 0x13, 0x00, 0x00];
pub const SOURCE_CMD_PREFIX: [u8; 5] = [0x02, 0x03, 0x01, 0x00, 0x00];

// Device → Client
pub const VOLUME_ACK_PREFIX: [u8; 10] = [0x00, 0x00, 0x00, 0x0b, 0x04, 0x03, 0x12, 0x01, 0x02, 0x00];
/// Unsolicited volume change, e.g. the front-panel knob.
pub const VOLUME_DEVICE_UPDATE_PREFIX: [u8; 10] =
    [0x00, 0x00, 0x00, 0x0b, 0x04, 0x03, 0x14, 0x01, 0x02, 0x00];
pub const DIM_ACK_PREFIX: [u8; 10] = [0x00, 0x00, 0x00, 0x0b, 0x04, 0x05, 0x13, 0x01, 0x02, 0x00];
pub const SOURCE_ACK_PREFIX: [u8; 10] = [0x00, 0x00, 0x00, 0x0b, 0x04, 0x03, 0x01, 0x01, 0x02, 0x00];

/// Keep-alive exchanged in both directions.
pub const HEARTBEAT: [u8; 5] = [0x00, 0x00, 0x00, 0x05, 0x04];

pub const DIM_ON: u8 = 0x01;
pub const DIM_OFF: u8 = 0x00;

/// Width of every ack and device-update frame: 10 byte prefix + 1 value byte.
pub const STATUS_FRAME_LEN: usize = 11;

/// Every frame opens with `00 00 00 NN`, `NN` being the frame's total width.
const FRAME_HEADER_LEN: usize = 4;

pub const MIN_VOLUME_DB: f32 = -95.0;
pub const MAX_VOLUME_DB: f32 = 0.0;

/// Kinds of frames the device sends us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Heartbeat,
    VolumeAck,
    VolumeUpdate,
    DimAck,
    SourceAck,
    Unknown,
}

const STATUS_PREFIXES: [(&[u8], FrameKind); 4] = [
    (&VOLUME_ACK_PREFIX, FrameKind::VolumeAck),
    (&VOLUME_DEVICE_UPDATE_PREFIX, FrameKind::VolumeUpdate),
    (&DIM_ACK_PREFIX, FrameKind::DimAck),
    (&SOURCE_ACK_PREFIX, FrameKind::SourceAck),
];

/// Classify a complete frame against the catalog.
///
/// The heartbeat only matches exactly; everything else is the longest known
/// prefix the frame starts with.
pub fn classify(frame: &[u8]) -> FrameKind {
    if frame == HEARTBEAT {
        return FrameKind::Heartbeat;
    }

    STATUS_PREFIXES
        .iter()
        .filter(|(prefix, _)| frame.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, kind)| *kind)
        .unwrap_or(FrameKind::Unknown)
}

/// Map a level in dB to the wire byte (half-dB steps, 0 dB = 192).
///
/// No range check here: callers reject values outside
/// [`MIN_VOLUME_DB`]..=[`MAX_VOLUME_DB`] before encoding.
pub fn encode_volume(db: f32) -> u8 {
    (192.0 + db * 2.0).round().clamp(0.0, 255.0) as u8
}

/// Map a wire byte back to dB.
pub fn decode_volume(byte: u8) -> f32 {
    (byte as f32 - 192.0) / 2.0
}

/// The trailing value byte of a frame, if any.
pub fn value_byte(frame: &[u8]) -> Option<u8> {
    frame.last().copied()
}

/// A stateful setting the device acknowledges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    Volume(f32),
    Dim(bool),
    Source(Source),
}

impl Setting {
    fn payload(&self) -> u8 {
        match self {
            Setting::Volume(db) => encode_volume(*db),
            Setting::Dim(true) => DIM_ON,
            Setting::Dim(false) => DIM_OFF,
            Setting::Source(source) => source.index(),
        }
    }

    /// The command frame, sent right after [`PRE_COMMAND`].
    pub fn command_frame(&self) -> Vec<u8> {
        let prefix: &[u8] = match self {
            Setting::Volume(_) => &VOLUME_CMD_PREFIX,
            Setting::Dim(_) => &DIM_CMD_PREFIX,
            Setting::Source(_) => &SOURCE_CMD_PREFIX,
        };
        let mut frame = prefix.to_vec();
        frame.push(self.payload());
        frame
    }

    /// The acknowledgment the device answers with when it accepts the command.
    pub fn expected_ack(&self) -> Vec<u8> {
        let prefix: &[u8] = match self {
            Setting::Volume(_) => &VOLUME_ACK_PREFIX,
            Setting::Dim(_) => &DIM_ACK_PREFIX,
            Setting::Source(_) => &SOURCE_ACK_PREFIX,
        };
        let mut frame = prefix.to_vec();
        frame.push(self.payload());
        frame
    }

    /// The setting as the device will report it, i.e. with the volume
    /// quantized to the half-dB wire resolution.
    pub fn quantized(self) -> Setting {
        match self {
            Setting::Volume(db) => Setting::Volume(decode_volume(encode_volume(db))),
            other => other,
        }
    }
}

/// Cuts a TCP byte stream into frames.
///
/// Reads can coalesce several frames or split one. Known frames are cut at
/// their fixed widths. Frames outside the catalog still carry the
/// `00 00 00 NN` header whose last byte is the total width, and are cut there.
/// Headerless garbage is handed out as one [`FrameKind::Unknown`] frame up to
/// the next offset where a known frame could start. A trailing partial that
/// could still become a frame is kept until more bytes arrive.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buffer: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the splitter with bytes left over from an earlier read.
    pub fn with_bytes(bytes: &[u8]) -> Self {
        Self {
            buffer: bytes.to_vec(),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }

        let len = match known_frame_len(&self.buffer).or_else(|| declared_len(&self.buffer)) {
            Some(len) if len <= self.buffer.len() => len,
            Some(_) => return None,
            None => self.resync_offset(),
        };

        Some(self.buffer.drain(..len).collect())
    }

    /// First offset past the head of the buffer where a known frame could
    /// start, or the whole buffer if there is none.
    fn resync_offset(&self) -> usize {
        (1..self.buffer.len())
            .find(|&i| known_frame_len(&self.buffer[i..]).is_some())
            .unwrap_or(self.buffer.len())
    }
}

/// Width of the catalog frame `buf` starts with. A buffer that is itself a
/// prefix of a catalog frame reports that frame's width.
fn known_frame_len(buf: &[u8]) -> Option<usize> {
    if could_start(buf, &HEARTBEAT) {
        // Under four bytes a heartbeat and a status frame look alike;
        // either width means waiting for more.
        return Some(HEARTBEAT.len());
    }

    STATUS_PREFIXES
        .iter()
        .any(|(prefix, _)| could_start(buf, prefix))
        .then_some(STATUS_FRAME_LEN)
}

/// Width announced by a `00 00 00 NN` frame header.
fn declared_len(buf: &[u8]) -> Option<usize> {
    match *buf {
        [0x00, 0x00, 0x00, width, ..] if usize::from(width) > FRAME_HEADER_LEN => {
            Some(usize::from(width))
        }
        _ => None,
    }
}

/// True when `buf` starts with `prefix`, or is itself a prefix of `prefix`.
fn could_start(buf: &[u8], prefix: &[u8]) -> bool {
    let n = buf.len().min(prefix.len());
    buf[..n] == prefix[..n]
}

/// Position of the first heartbeat frame in `bytes`.
pub fn find_heartbeat(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(HEARTBEAT.len())
        .position(|window| window == HEARTBEAT)
}

/// Hex rendering used in log lines and diagnostics
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
