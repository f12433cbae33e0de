//! Spherical coordinate conversions.
//!
//! Azimuth is measured from north through east. Hour angle is positive
//! west of the meridian. All angles in radians.

use crate::consts::TWO_PI;
use std::f64::consts::PI;

/// Normalize to `(-π, π]`.
#[inline]
pub fn wrap_pi(angle: f64) -> f64 {
    let a = angle.rem_euclid(TWO_PI);
    if a > PI { a - TWO_PI } else { a }
}

/// Normalize to `[0, 2π)`.
#[inline]
pub fn wrap_two_pi(angle: f64) -> f64 {
    angle.rem_euclid(TWO_PI)
}

/// Hour angle / declination to (altitude, azimuth).
pub fn hadec_to_altaz(ha: f64, dec: f64, lat: f64) -> (f64, f64) {
    let (sin_ha, cos_ha) = ha.sin_cos();
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_lat, cos_lat) = lat.sin_cos();

    let sin_alt = sin_dec * sin_lat + cos_dec * cos_lat * cos_ha;
    let alt = sin_alt.clamp(-1.0, 1.0).asin();
    let az = (-cos_dec * sin_ha).atan2(sin_dec * cos_lat - cos_dec * sin_lat * cos_ha);
    (alt, wrap_two_pi(az))
}

/// Altitude / azimuth to (hour angle, declination).
pub fn altaz_to_hadec(alt: f64, az: f64, lat: f64) -> (f64, f64) {
    let (sin_az, cos_az) = az.sin_cos();
    let (sin_alt, cos_alt) = alt.sin_cos();
    let (sin_lat, cos_lat) = lat.sin_cos();

    let sin_dec = sin_alt * sin_lat + cos_alt * cos_lat * cos_az;
    let dec = sin_dec.clamp(-1.0, 1.0).asin();
    let ha = (-sin_az * cos_alt).atan2(sin_alt * cos_lat - cos_alt * sin_lat * cos_az);
    (wrap_pi(ha), dec)
}

/// Parallactic angle of a position.
pub fn parallactic_angle(ha: f64, dec: f64, lat: f64) -> f64 {
    ha.sin()
        .atan2(lat.tan() * dec.cos() - dec.sin() * ha.cos())
}

/// Great-circle separation of two (longitude, latitude) points.
pub fn separation(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().clamp(0.0, 1.0).asin()
}
