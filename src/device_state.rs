//! Connectivity states reported by the adb server.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A device's connectivity as reported by the server.
///
/// A USB device typically moves `Disconnected -> Offline -> Online` when
/// plugged in and `Online -> Disconnected` when unplugged. `Disconnected` is
/// also what a serial missing from the roster means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    Invalid,
    Unauthorized,
    #[default]
    Disconnected,
    Offline,
    Online,
    Authorizing,
    Recovery,
}

impl DeviceState {
    /// The token the server uses for this state, or `None` for `Invalid`.
    pub fn token(self) -> Option<&'static str> {
        match self {
            DeviceState::Disconnected => Some(""),
            DeviceState::Offline => Some("offline"),
            DeviceState::Online => Some("device"),
            DeviceState::Unauthorized => Some("unauthorized"),
            DeviceState::Authorizing => Some("authorizing"),
            DeviceState::Recovery => Some("recovery"),
            DeviceState::Invalid => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            DeviceState::Invalid => "Invalid",
            DeviceState::Unauthorized => "Unauthorized",
            DeviceState::Disconnected => "Disconnected",
            DeviceState::Offline => "Offline",
            DeviceState::Online => "Online",
            DeviceState::Authorizing => "Authorizing",
            DeviceState::Recovery => "Recovery",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceState {
    type Err = Error;

    /// Parses a server token. Unknown tokens are a parse error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(DeviceState::Disconnected),
            "offline" => Ok(DeviceState::Offline),
            "device" => Ok(DeviceState::Online),
            "unauthorized" => Ok(DeviceState::Unauthorized),
            "authorizing" => Ok(DeviceState::Authorizing),
            "recovery" => Ok(DeviceState::Recovery),
            _ => Err(Error::parse(format!("invalid device state: {s:?}"))),
        }
    }
}
