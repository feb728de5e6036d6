use crate::protocol::Setting;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Input sources selectable on the device
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Aes1,
    Aes2,
    Optical,
    Streaming,
}

impl Source {
    /// Index carried in the source command and its ack
    pub fn index(self) -> u8 {
        match self {
            Source::Aes1 => 0x00,
            Source::Aes2 => 0x01,
            Source::Optical => 0x02,
            Source::Streaming => 0x03,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Source::iter().find(|source| source.index() == index)
    }

    /// All source names, in wire order
    pub fn names() -> Vec<String> {
        Source::iter().map(|source| source.to_string()).collect()
    }
}

/// Which parts of [`DeviceState`] the device has actually reported.
///
/// The initial values are assumptions; a field only becomes confirmed after
/// an acknowledgment or an unsolicited update carries it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmed {
    pub volume: bool,
    pub dim: bool,
    pub source: bool,
}

/// Last known state of the device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub volume_db: f32,
    pub dim: bool,
    pub source: Source,
    pub confirmed: Confirmed,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            volume_db: 0.0,
            dim: false,
            source: Source::Aes1,
            confirmed: Confirmed::default(),
        }
    }
}

impl DeviceState {
    /// Record a setting the device has confirmed.
    pub fn apply(&mut self, setting: Setting) {
        match setting {
            Setting::Volume(db) => {
                self.volume_db = db;
                self.confirmed.volume = true;
            }
            Setting::Dim(on) => {
                self.dim = on;
                self.confirmed.dim = true;
            }
            Setting::Source(source) => {
                self.source = source;
                self.confirmed.source = true;
            }
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Draining,
    Active,
    ShuttingDown,
}

/// Read-only view handed to collaborators such as the shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub connection: ConnectionState,
    pub device: DeviceState,
    /// Why the last session ended, if it failed
    pub failure: Option<String>,
}

/// Who caused a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOrigin {
    /// Acknowledged command issued by this client
    Command,
    /// Pushed by the device on its own, e.g. the front-panel knob
    Device,
}

/// Notifications delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    VolumeChanged { db: f32, origin: ChangeOrigin },
    DimChanged(bool),
    SourceChanged(Source),
    ConnectionLost(String),
}

impl DeviceEvent {
    pub(crate) fn from_setting(setting: Setting, origin: ChangeOrigin) -> Self {
        match setting {
            Setting::Volume(db) => DeviceEvent::VolumeChanged { db, origin },
            Setting::Dim(on) => DeviceEvent::DimChanged(on),
            Setting::Source(source) => DeviceEvent::SourceChanged(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_source_names_parse_case_insensitively() {
        assert_eq!(Source::from_str("aes1").unwrap(), Source::Aes1);
        assert_eq!(Source::from_str("AES2").unwrap(), Source::Aes2);
        assert_eq!(Source::from_str("Optical").unwrap(), Source::Optical);
        assert_eq!(Source::from_str("streaming").unwrap(), Source::Streaming);
        assert!(Source::from_str("hdmi").is_err());
    }

    #[test]
    fn test_source_indices() {
        assert_eq!(Source::names(), vec!["aes1", "aes2", "optical", "streaming"]);
        for source in Source::iter() {
            assert_eq!(Source::from_index(source.index()), Some(source));
        }
        assert_eq!(Source::from_index(4), None);
    }

    #[test]
    fn test_defaults_are_unconfirmed() {
        let state = DeviceState::default();
        assert_eq!(state.volume_db, 0.0);
        assert!(!state.dim);
        assert_eq!(state.source, Source::Aes1);
        assert_eq!(state.confirmed, Confirmed::default());
    }

    #[test]
    fn test_apply_confirms_only_the_touched_field() {
        let mut state = DeviceState::default();
        state.apply(Setting::Dim(true));

        assert!(state.dim);
        assert!(state.confirmed.dim);
        assert!(!state.confirmed.volume);
        assert!(!state.confirmed.source);

        state.apply(Setting::Volume(-30.5));
        assert_eq!(state.volume_db, -30.5);
        assert!(state.confirmed.volume);
    }

    #[test]
    fn test_snapshot_serializes_lowercase_source() {
        let snapshot = StatusSnapshot {
            connection: ConnectionState::Active,
            device: DeviceState::default(),
            failure: None,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["device"]["source"], "aes1");
        assert_eq!(json["connection"], "Active");
    }
}
