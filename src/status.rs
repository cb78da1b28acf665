// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Status maskbits
//!
//! Each module reports its state as a set of independent boolean facts. One bit,
//! `UNKNOWN`, is reserved for failed polls and is never combined with any other
//! bit. An empty set is a legitimate value for modules where no fact applies.

use std::fmt;

use bitflags::bitflags;

/// Common interface of the module status types.
pub trait StatusFlags: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Sentinel reported when the status cannot be determined.
    const UNKNOWN: Self;

    /// Raw value of the mask.
    fn value(&self) -> u32;

    /// Human readable label, e.g. `OPEN|DRIVE_AVAILABLE`.
    fn label(&self) -> String;

    /// Whether this is the `UNKNOWN` sentinel.
    fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

bitflags! {
    /// Position and drive status of the roll-off dome.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DomeStatus: u32 {
        const OPEN = 0x1;
        const CLOSED = 0x2;
        const MOVING = 0x4;
        const POSITION_UNKNOWN = 0x8;
        const DRIVE_ENABLED = 0x10;
        const MOTOR_CLOSING = 0x20;
        const MOTOR_OPENING = 0x40;
        const BRAKE_ENABLED = 0x80;
        const DRIVE_AVAILABLE = 0x100;
        const DRIVE_ERROR = 0x200;
        const OVERCURRENT = 0x400;
        const OVERCURRENT_MODE = 0x800;
        const E_STOP = 0x1000;
        const UNKNOWN = 0x100000;
    }
}

bitflags! {
    /// Interlocks, e-stops and O2 alarms.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SafetyStatus: u32 {
        const DOOR_CLOSED = 0x1;
        const DOOR_LOCKED = 0x2;
        const LOCAL = 0x4;
        const E_STOP = 0x8;
        const RAIN_SENSOR_ALARM = 0x10;
        const DOME_LOCKED = 0x20;
        const DOME_ERROR = 0x40;
        const O2_ALARM_UTILITIES_ROOM = 0x100;
        const O2_ALARM_SPECTROGRAPH_ROOM = 0x200;
        const O2_FAULT_UTILITIES_ROOM = 0x400;
        const O2_FAULT_SPECTROGRAPH_ROOM = 0x800;
        const HARDWARE_BYPASS = 0x1000;
        const SOFTWARE_BYPASS = 0x2000;
        const UNKNOWN = 0x100000;
    }
}

impl SafetyStatus {
    /// Rooms with an O2 sensor.
    pub const O2_ROOMS: [&'static str; 2] = ["utilities_room", "spectrograph_room"];

    /// Alarm bit for the O2 sensor of `room`.
    pub fn o2_alarm(room: &str) -> Option<Self> {
        match room {
            "utilities_room" => Some(Self::O2_ALARM_UTILITIES_ROOM),
            "spectrograph_room" => Some(Self::O2_ALARM_SPECTROGRAPH_ROOM),
            _ => None,
        }
    }

    /// Fault bit for the O2 sensor of `room`.
    pub fn o2_fault(room: &str) -> Option<Self> {
        match room {
            "utilities_room" => Some(Self::O2_FAULT_UTILITIES_ROOM),
            "spectrograph_room" => Some(Self::O2_FAULT_SPECTROGRAPH_ROOM),
            _ => None,
        }
    }
}

macro_rules! impl_status_flags {
    ($flags:ty) => {
        impl StatusFlags for $flags {
            const UNKNOWN: Self = <$flags>::UNKNOWN;

            fn value(&self) -> u32 {
                self.bits()
            }

            fn label(&self) -> String {
                if self.is_empty() {
                    return "NONE".to_string();
                }
                self.iter_names()
                    .map(|(name, _)| name)
                    .collect::<Vec<_>>()
                    .join("|")
            }
        }

        impl fmt::Display for $flags {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&StatusFlags::label(self))
            }
        }
    };
}

impl_status_flags!(DomeStatus);
impl_status_flags!(SafetyStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let status = DomeStatus::OPEN | DomeStatus::DRIVE_AVAILABLE;
        assert_eq!(status.label(), "OPEN|DRIVE_AVAILABLE");
        assert_eq!(status.value(), 0x101);
        assert_eq!(SafetyStatus::empty().label(), "NONE");
        assert_eq!(DomeStatus::UNKNOWN.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_unknown_is_exclusive_bit() {
        assert!(DomeStatus::UNKNOWN.is_unknown());
        assert!(!(DomeStatus::UNKNOWN | DomeStatus::OPEN).is_unknown());
        assert!(DomeStatus::all()
            .difference(DomeStatus::UNKNOWN)
            .intersection(DomeStatus::UNKNOWN)
            .is_empty());
        assert!(!SafetyStatus::empty().is_unknown());
    }

    #[test]
    fn test_o2_room_bits() {
        for room in SafetyStatus::O2_ROOMS {
            assert!(SafetyStatus::o2_alarm(room).is_some());
            assert!(SafetyStatus::o2_fault(room).is_some());
        }
        assert!(SafetyStatus::o2_alarm("uma_room").is_none());
    }
}
