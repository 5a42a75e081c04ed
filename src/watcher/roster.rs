//! Roster decoding and diffing for the `track-devices` stream.

use std::collections::HashMap;

use crate::device_state::DeviceState;
use crate::error::{Error, Result};

/// Serial to state, rebuilt in full on every tracking update.
pub type Roster = HashMap<String, DeviceState>;

/// One device changing state between two rosters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceStateChangedEvent {
    pub serial: String,
    pub old_state: DeviceState,
    pub new_state: DeviceState,
}

impl DeviceStateChangedEvent {
    /// True when the device just became usable.
    pub fn came_online(&self) -> bool {
        self.old_state != DeviceState::Online && self.new_state == DeviceState::Online
    }

    /// True when the device stopped being usable.
    pub fn went_offline(&self) -> bool {
        self.old_state == DeviceState::Online && self.new_state != DeviceState::Online
    }
}

/// Parses `<serial>\t<state>` lines. Blank lines are skipped; any other line
/// without a tab fails the whole roster.
pub fn parse_device_states(text: &str) -> Result<Roster> {
    let mut states = Roster::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((serial, state)) = line.split_once('\t') else {
            return Err(Error::parse(format!("invalid device state line {i}: {line}")));
        };
        let state = state
            .parse::<DeviceState>()
            .map_err(|e| e.wrap(format!("invalid device state line {i}")))?;
        states.insert(serial.to_string(), state);
    }
    Ok(states)
}

/// Events for every serial whose state differs between `old` and `new`.
///
/// A serial missing from either side counts as `Disconnected`. Order is
/// unspecified.
pub fn calculate_state_diffs(old: &Roster, new: &Roster) -> Vec<DeviceStateChangedEvent> {
    let mut diffs = Vec::new();

    for (serial, &old_state) in old {
        let new_state = new.get(serial).copied().unwrap_or_default();
        if old_state != new_state {
            diffs.push(DeviceStateChangedEvent {
                serial: serial.clone(),
                old_state,
                new_state,
            });
        }
    }

    for (serial, &new_state) in new {
        if !old.contains_key(serial) && new_state != DeviceState::Disconnected {
            diffs.push(DeviceStateChangedEvent {
                serial: serial.clone(),
                old_state: DeviceState::Disconnected,
                new_state,
            });
        }
    }

    diffs
}
