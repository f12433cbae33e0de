//! Explicit wall-clock timestamps.
//!
//! Every time-dependent computation in the control core takes a
//! `Timestamp` argument; only the control loop reads the system clock.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Julian date of the Unix epoch.
pub const JD_UNIX_EPOCH: f64 = 2_440_587.5;

/// Julian date of J2000.0.
pub const JD_J2000: f64 = 2_451_545.0;

/// Seconds since the Unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Read the system clock.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self(secs)
    }

    #[inline]
    pub const fn from_unix_secs(secs: f64) -> Self {
        Self(secs)
    }

    #[inline]
    pub const fn as_unix_secs(self) -> f64 {
        self.0
    }

    /// Timestamp `secs` seconds later (negative moves backwards).
    #[inline]
    pub fn add_secs(self, secs: f64) -> Self {
        Self(self.0 + secs)
    }

    /// Seconds elapsed from `earlier` to `self`.
    #[inline]
    pub fn secs_since(self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }

    /// Julian date (UTC, leap seconds ignored).
    #[inline]
    pub fn julian_date(self) -> f64 {
        JD_UNIX_EPOCH + self.0 / 86_400.0
    }

    /// Days since J2000.0.
    #[inline]
    pub fn days_since_j2000(self) -> f64 {
        self.julian_date() - JD_J2000
    }
}
