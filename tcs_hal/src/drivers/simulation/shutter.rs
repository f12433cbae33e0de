//! Shutter simulator.
//!
//! Travel is modelled as an open fraction in `[0, 1]`. When a power
//! position is configured the drive only has power while the dome sits
//! inside that window.

use tcs_common::hal::types::{ShutterDrive, ShutterSense};

/// Default full-travel time [s].
pub const SHUTTER_TRAVEL_SECS: f64 = 8.0;

/// Simulated shutter or roll-off roof.
#[derive(Debug, Clone)]
pub struct ShutterSimulator {
    fraction: f64,
    drive: ShutterDrive,
    travel_secs: f64,
}

impl Default for ShutterSimulator {
    fn default() -> Self {
        Self {
            fraction: 0.0,
            drive: ShutterDrive::Halt,
            travel_secs: SHUTTER_TRAVEL_SECS,
        }
    }
}

impl ShutterSimulator {
    /// Latch a drive command.
    pub fn command(&mut self, drive: ShutterDrive) {
        self.drive = drive;
    }

    /// Advance by `dt` seconds; `powered` is false outside the power window.
    pub fn update(&mut self, dt: f64, powered: bool) {
        if !powered || dt <= 0.0 {
            return;
        }
        let step = dt / self.travel_secs;
        match self.drive {
            ShutterDrive::Open => {
                self.fraction = (self.fraction + step).min(1.0);
                if self.fraction >= 1.0 {
                    self.drive = ShutterDrive::Halt;
                }
            }
            ShutterDrive::Close => {
                self.fraction = (self.fraction - step).max(0.0);
                if self.fraction <= 0.0 {
                    self.drive = ShutterDrive::Halt;
                }
            }
            ShutterDrive::Halt => {}
        }
    }

    /// End-of-travel sensors.
    pub fn sense(&self) -> ShutterSense {
        ShutterSense {
            open_limit: self.fraction >= 1.0,
            closed_limit: self.fraction <= 0.0,
        }
    }

    /// Open fraction.
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Override the travel time.
    pub fn set_travel_secs(&mut self, secs: f64) {
        self.travel_secs = secs.max(f64::EPSILON);
    }

    /// Stop immediately.
    pub fn halt(&mut self) {
        self.drive = ShutterDrive::Halt;
    }
}
