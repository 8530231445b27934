//! Power state wire encoding for both lighthouse generations.

use std::fmt;

use thiserror::Error;
use uuid::{Uuid, uuid};

/// Power characteristic of a 1.0 base station.
pub const V1_POWER_CHARACTERISTIC: Uuid = uuid!("00001524-1212-efde-1523-785feabcd123");

/// Attribute handle of the power characteristic on a 2.0 base station.
pub const V2_POWER_HANDLE: u16 = 17;

/// Characteristic living at [`V2_POWER_HANDLE`], for stacks that only address by UUID.
pub const V2_POWER_CHARACTERISTIC: Uuid = uuid!("00001525-1212-efde-1523-785feabcd124");

const V1_PAYLOAD_LEN: usize = 20;
const V1_ON_FLAG: u8 = 0x00;
const V1_OFF_FLAG: u8 = 0x01;

const V2_ON: u8 = 0x01;
const V2_OFF: u8 = 0x00;
const V2_STARTUP: u8 = 0x20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PowerState {
    On,
    Off,
    /// Reported by a 2.0 base station that was recently powered and has not
    /// had its state written yet. Never written.
    Startup,
}

impl PowerState {
    pub fn from_is_on(is_on: bool) -> Self {
        if is_on { PowerState::On } else { PowerState::Off }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, PowerState::On | PowerState::Startup)
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            PowerState::On => "on",
            PowerState::Off => "off",
            PowerState::Startup => "startup",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Where a device keeps its power state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CharacteristicRef {
    Uuid(Uuid),
    Handle(u16),
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharacteristicRef::Uuid(uuid) => write!(f, "{uuid}"),
            CharacteristicRef::Handle(handle) => write!(f, "handle {handle}"),
        }
    }
}

/// The device answered, but with a payload that means nothing for its protocol.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unrecognized {version} power payload {payload:02x?}")]
pub struct ProtocolViolation {
    pub version: ProtocolVersion,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => f.write_str("v1"),
            ProtocolVersion::V2 => f.write_str("v2"),
        }
    }
}

impl ProtocolVersion {
    pub fn characteristic(&self) -> CharacteristicRef {
        match self {
            ProtocolVersion::V1 => CharacteristicRef::Uuid(V1_POWER_CHARACTERISTIC),
            ProtocolVersion::V2 => CharacteristicRef::Handle(V2_POWER_HANDLE),
        }
    }

    /// Wire bytes for `state`.
    ///
    /// `Startup` is read-only and is written as `On`.
    pub fn encode(&self, state: PowerState) -> Vec<u8> {
        match self {
            ProtocolVersion::V1 => {
                let flag = if state.is_on() { V1_ON_FLAG } else { V1_OFF_FLAG };
                let mut payload = vec![0x12, flag, 0x00, 0x28, 0xFF, 0xFF, 0xFF, 0xFF];
                payload.resize(V1_PAYLOAD_LEN, 0x00);
                payload
            }
            ProtocolVersion::V2 => match state {
                PowerState::On | PowerState::Startup => vec![V2_ON],
                PowerState::Off => vec![V2_OFF],
            },
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<PowerState, ProtocolViolation> {
        let state = match self {
            ProtocolVersion::V1 => {
                if payload == self.encode(PowerState::On).as_slice() {
                    Some(PowerState::On)
                } else if payload == self.encode(PowerState::Off).as_slice() {
                    Some(PowerState::Off)
                } else {
                    None
                }
            }
            ProtocolVersion::V2 => match payload {
                [V2_ON] => Some(PowerState::On),
                [V2_OFF] => Some(PowerState::Off),
                [V2_STARTUP] => Some(PowerState::Startup),
                _ => None,
            },
        };

        state.ok_or_else(|| ProtocolViolation {
            version: *self,
            payload: payload.to_vec(),
        })
    }
}
