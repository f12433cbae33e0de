//! State enums for the control unit.
//!
//! All enums use `#[repr(u8)]` (or `i32` for wire codes) for compact
//! telemetry transport and stable numeric values across releases.

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Operation State ────────────────────────────────────────────────

/// Operational state of one controlled subsystem.
///
/// `Idle` and `Stopped` are terminal-until-commanded. Every other state is
/// an active operation owned by exactly one state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum OperationState {
    #[default]
    Idle = 0,
    Homing = 1,
    FindingLimits = 2,
    Slewing = 3,
    Hunting = 4,
    Tracking = 5,
    Stopped = 6,
}

impl OperationState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Homing),
            2 => Some(Self::FindingLimits),
            3 => Some(Self::Slewing),
            4 => Some(Self::Hunting),
            5 => Some(Self::Tracking),
            6 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Whether an operation is in progress (motion may be commanded).
    #[inline]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Homing => "Homing",
            Self::FindingLimits => "FindingLimits",
            Self::Slewing => "Slewing",
            Self::Hunting => "Hunting",
            Self::Tracking => "Tracking",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Subsystems & Axes ──────────────────────────────────────────────

/// One independently supervised subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Subsystem {
    Mount = 0,
    Dome = 1,
    Shutter = 2,
    Focus = 3,
    Filter = 4,
}

impl Subsystem {
    pub const ALL: [Subsystem; 5] = [
        Self::Mount,
        Self::Dome,
        Self::Shutter,
        Self::Focus,
        Self::Filter,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Dome => "dome",
            Self::Shutter => "shutter",
            Self::Focus => "focus",
            Self::Filter => "filter",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical rotating axis. Exactly one state machine owns each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum AxisId {
    /// Mount longitude-like axis (hour angle or azimuth).
    MountX = 0,
    /// Mount latitude-like axis (declination or altitude).
    MountY = 1,
    /// Field rotator.
    MountR = 2,
    /// Dome azimuth.
    DomeAz = 3,
    Focus = 4,
    Filter = 5,
}

impl AxisId {
    pub const ALL: [AxisId; 6] = [
        Self::MountX,
        Self::MountY,
        Self::MountR,
        Self::DomeAz,
        Self::Focus,
        Self::Filter,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn subsystem(self) -> Subsystem {
        match self {
            Self::MountX | Self::MountY | Self::MountR => Subsystem::Mount,
            Self::DomeAz => Subsystem::Dome,
            Self::Focus => Subsystem::Focus,
            Self::Filter => Subsystem::Filter,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MountX => "x",
            Self::MountY => "y",
            Self::MountR => "r",
            Self::DomeAz => "dome",
            Self::Focus => "focus",
            Self::Filter => "filter",
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known shutter position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum ShutterPosition {
    #[default]
    Unknown = 0,
    Open = 1,
    Closed = 2,
    Opening = 3,
    Closing = 4,
}

impl ShutterPosition {
    /// Closed or on its way there.
    #[inline]
    pub const fn is_closed_or_closing(self) -> bool {
        matches!(self, Self::Closed | Self::Closing)
    }
}

// ─── Response Codes ─────────────────────────────────────────────────

/// Numeric prefix of every channel response line.
///
/// `0` is success, positive values are non-terminal progress reports,
/// negative values are terminal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ResponseCode {
    Ok = 0,
    Progress = 1,
    FormatError = -1,
    Rejected = -2,
    LimitExceeded = -3,
    Stall = -4,
    Timeout = -5,
    HardwareError = -6,
    Interrupted = -7,
}

impl ResponseCode {
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Whether the response ends the command (anything but progress).
    #[inline]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Progress)
    }

    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Progress),
            -1 => Some(Self::FormatError),
            -2 => Some(Self::Rejected),
            -3 => Some(Self::LimitExceeded),
            -4 => Some(Self::Stall),
            -5 => Some(Self::Timeout),
            -6 => Some(Self::HardwareError),
            -7 => Some(Self::Interrupted),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_state_roundtrip_u8() {
        for v in 0..=6u8 {
            let s = OperationState::from_u8(v).unwrap();
            assert_eq!(s as u8, v);
        }
        assert!(OperationState::from_u8(7).is_none());
    }

    #[test]
    fn only_idle_and_stopped_are_inactive() {
        assert!(!OperationState::Idle.is_active());
        assert!(!OperationState::Stopped.is_active());
        assert!(OperationState::Homing.is_active());
        assert!(OperationState::Tracking.is_active());
    }

    #[test]
    fn axis_subsystem_ownership() {
        assert_eq!(AxisId::MountR.subsystem(), Subsystem::Mount);
        assert_eq!(AxisId::DomeAz.subsystem(), Subsystem::Dome);
        for (i, axis) in AxisId::ALL.iter().enumerate() {
            assert_eq!(axis.index(), i);
        }
    }

    #[test]
    fn response_code_signs() {
        assert_eq!(ResponseCode::Ok.code(), 0);
        assert!(ResponseCode::Progress.code() > 0);
        assert!(!ResponseCode::Progress.is_terminal());
        for c in [
            ResponseCode::FormatError,
            ResponseCode::Rejected,
            ResponseCode::LimitExceeded,
            ResponseCode::Stall,
            ResponseCode::Timeout,
            ResponseCode::HardwareError,
            ResponseCode::Interrupted,
        ] {
            assert!(c.code() < 0);
            assert!(c.is_terminal());
            assert_eq!(ResponseCode::from_i32(c.code()), Some(c));
        }
    }
}
