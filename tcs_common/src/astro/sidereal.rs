//! Sidereal time.

use crate::consts::TWO_PI;
use crate::time::Timestamp;

/// Greenwich mean sidereal time [rad] in `[0, 2π)`.
pub fn gmst(t: Timestamp) -> f64 {
    let d = t.days_since_j2000();
    let c = d / 36_525.0;
    let deg = 280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * c * c
        - c * c * c / 38_710_000.0;
    deg.to_radians().rem_euclid(TWO_PI)
}

/// Local mean sidereal time [rad] for an east-positive longitude [rad].
#[inline]
pub fn lst(t: Timestamp, longitude: f64) -> f64 {
    (gmst(t) + longitude).rem_euclid(TWO_PI)
}
