//! Mount geometry: native position pair to drive-axis values.
//!
//! The native pair is (longitude-like, latitude-like): (-HA, Dec) on an
//! equatorial mount, (-Az, Alt) on an alt-az mount, so that the
//! longitude-like value increases counter-clockwise seen from the pole.
//! Collimation and non-perpendicularity only affect the longitude axis.

use tcs_common::astro::ApparentPlace;
use tcs_common::control_unit::config::{MountConfig, MountKind};

/// Below this |cos(lat)| the 1/cos and tan terms are clamped.
const POLE_GUARD: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountGeometry {
    pub kind: MountKind,
    pub collimation: f64,
    pub non_perpendicularity: f64,
}

impl MountGeometry {
    pub fn from_config(config: &MountConfig) -> Self {
        Self {
            kind: config.kind,
            collimation: config.collimation,
            non_perpendicularity: config.non_perpendicularity,
        }
    }

    /// User-facing (lon, lat) of an apparent place: (HA, Dec) or (Az, Alt).
    pub fn user_pair(&self, place: &ApparentPlace) -> (f64, f64) {
        match self.kind {
            MountKind::Equatorial => (place.ha, place.dec),
            MountKind::AltAz => (place.az, place.alt),
        }
    }

    /// Native pair from the user-facing pair.
    #[inline]
    pub fn native_from_user(&self, lon: f64, lat: f64) -> (f64, f64) {
        (-lon, lat)
    }

    /// Drive values (x, y) for a native pair.
    pub fn native_to_axes(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (sin_lat, cos_lat) = lat.sin_cos();
        let cos_lat = guard(cos_lat);
        let x = lon + self.collimation / cos_lat + self.non_perpendicularity * sin_lat / cos_lat;
        (x, lat)
    }

    /// Native pair for drive values (x, y).
    pub fn axes_to_native(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin_y, cos_y) = y.sin_cos();
        let cos_y = guard(cos_y);
        let lon = x - self.collimation / cos_y - self.non_perpendicularity * sin_y / cos_y;
        (lon, y)
    }
}

fn guard(c: f64) -> f64 {
    if c.abs() < POLE_GUARD {
        POLE_GUARD.copysign(c)
    } else {
        c
    }
}
