use crate::protocol::hex;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Dp564Error>;

#[derive(Error, Debug)]
pub enum Dp564Error {
    /// Transport could not be opened, or handshake/drain failed before the
    /// first heartbeat.
    #[error("Connection failed: {0}")]
    ConnectFailure(String),

    #[error("Connection closed by the device")]
    TransportClosed,

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Caller-side validation failure. Nothing was sent.
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// Another command is still waiting for its acknowledgment. Nothing was sent.
    #[error("Command rejected: another command is awaiting acknowledgment")]
    CommandBusy,

    #[error("No acknowledgment received within {0:?}")]
    AckTimeout(Duration),

    #[error("Unexpected acknowledgment: {}", hex(.frame))]
    AckMismatch { frame: Vec<u8> },
}

impl Dp564Error {
    /// True for failures that end the session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Dp564Error::ConnectFailure(_) | Dp564Error::TransportClosed | Dp564Error::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_renders_frame_as_hex() {
        let err = Dp564Error::AckMismatch {
            frame: vec![0x00, 0x0b, 0xff],
        };
        assert_eq!(err.to_string(), "Unexpected acknowledgment: 000bff");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Dp564Error::TransportClosed.is_fatal());
        assert!(Dp564Error::ConnectFailure("refused".into()).is_fatal());
        assert!(!Dp564Error::CommandBusy.is_fatal());
        assert!(!Dp564Error::AckTimeout(Duration::from_secs(2)).is_fatal());
    }
}
