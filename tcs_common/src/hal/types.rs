//! Raw hardware I/O types.
//!
//! Values here are electrical levels and raw counts exactly as the
//! hardware reports them. Polarity and unit conversion belong to the
//! control unit.

use bitflags::bitflags;

bitflags! {
    /// Raw switch levels of one axis (bit set = line high).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SwitchState: u8 {
        const HOME      = 0x01;
        const POS_LIMIT = 0x02;
        const NEG_LIMIT = 0x04;
    }
}

impl SwitchState {
    /// Home switch active, honouring the configured polarity.
    #[inline]
    pub fn home_active(self, active_low: bool) -> bool {
        self.contains(Self::HOME) != active_low
    }

    /// Limit switch active in the direction of `sign` (+1 / -1).
    #[inline]
    pub fn limit_active(self, sign: f64) -> bool {
        if sign > 0.0 {
            self.contains(Self::POS_LIMIT)
        } else if sign < 0.0 {
            self.contains(Self::NEG_LIMIT)
        } else {
            false
        }
    }
}

/// Shutter drive command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutterDrive {
    Open,
    Close,
    Halt,
}

/// Shutter end-of-travel sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShutterSense {
    pub open_limit: bool,
    pub closed_limit: bool,
}
