//! `Ephemeris` trait, target descriptions and the site implementation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::coords::{altaz_to_hadec, hadec_to_altaz, parallactic_angle, wrap_pi};
use super::kepler::OrbitalElements;
use super::sidereal::lst;
use crate::control_unit::config::SiteConfig;
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EphemerisError {
    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// What the telescope should point at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TargetObject {
    /// Fixed apparent RA/Dec [rad].
    Equatorial { ra: f64, dec: f64 },
    /// RA/Dec moving linearly from `epoch` [rad, rad/s].
    Moving {
        ra: f64,
        dec: f64,
        ra_rate: f64,
        dec_rate: f64,
        epoch: Timestamp,
    },
    /// Fixed hour angle / declination (does not track) [rad].
    HourAngle { ha: f64, dec: f64 },
    /// Fixed altitude / azimuth [rad].
    Horizon { alt: f64, az: f64 },
    /// Heliocentric orbit.
    Elements(OrbitalElements),
}

impl TargetObject {
    /// Whether the apparent place drifts with time (needs tracking).
    pub fn is_sidereal(&self) -> bool {
        matches!(
            self,
            Self::Equatorial { .. } | Self::Moving { .. } | Self::Elements(_)
        )
    }
}

impl fmt::Display for TargetObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equatorial { ra, dec } => write!(
                f,
                "radec {:.5}h {:+.4}d",
                ra.to_degrees() / 15.0,
                dec.to_degrees()
            ),
            Self::Moving { ra, dec, .. } => write!(
                f,
                "radec {:.5}h {:+.4}d (moving)",
                ra.to_degrees() / 15.0,
                dec.to_degrees()
            ),
            Self::HourAngle { ha, dec } => write!(
                f,
                "hadec {:+.5}h {:+.4}d",
                ha.to_degrees() / 15.0,
                dec.to_degrees()
            ),
            Self::Horizon { alt, az } => {
                write!(f, "altaz {:.4}d {:.4}d", alt.to_degrees(), az.to_degrees())
            }
            Self::Elements(el) => write!(f, "elements a={:.4} e={:.4}", el.a, el.e),
        }
    }
}

/// Instantaneous place as seen from the site [rad].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ApparentPlace {
    pub ha: f64,
    pub dec: f64,
    pub alt: f64,
    pub az: f64,
    pub parallactic: f64,
}

/// Celestial-mechanics collaborator.
pub trait Ephemeris: Send {
    /// Site latitude [rad].
    fn latitude(&self) -> f64;

    fn apparent_place(
        &self,
        target: &TargetObject,
        t: Timestamp,
    ) -> Result<ApparentPlace, EphemerisError>;
}

/// Built-in ephemeris for one site (mean sidereal time, no refraction).
#[derive(Debug, Clone, Copy)]
pub struct SiteEphemeris {
    latitude: f64,
    longitude: f64,
}

impl SiteEphemeris {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            latitude: site.latitude.to_radians(),
            longitude: site.longitude.to_radians(),
        }
    }

    fn place_from_hadec(&self, ha: f64, dec: f64) -> ApparentPlace {
        let ha = wrap_pi(ha);
        let (alt, az) = hadec_to_altaz(ha, dec, self.latitude);
        ApparentPlace {
            ha,
            dec,
            alt,
            az,
            parallactic: parallactic_angle(ha, dec, self.latitude),
        }
    }
}

impl Ephemeris for SiteEphemeris {
    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn apparent_place(
        &self,
        target: &TargetObject,
        t: Timestamp,
    ) -> Result<ApparentPlace, EphemerisError> {
        if !t.as_unix_secs().is_finite() {
            return Err(EphemerisError::InvalidTime(format!("{t:?}")));
        }
        let sidereal = lst(t, self.longitude);
        let place = match *target {
            TargetObject::Equatorial { ra, dec } => self.place_from_hadec(sidereal - ra, dec),
            TargetObject::Moving {
                ra,
                dec,
                ra_rate,
                dec_rate,
                epoch,
            } => {
                let dt = t.secs_since(epoch);
                let dec = (dec + dec_rate * dt).clamp(
                    -std::f64::consts::FRAC_PI_2,
                    std::f64::consts::FRAC_PI_2,
                );
                self.place_from_hadec(sidereal - (ra + ra_rate * dt), dec)
            }
            TargetObject::HourAngle { ha, dec } => self.place_from_hadec(ha, dec),
            TargetObject::Horizon { alt, az } => {
                let (ha, dec) = altaz_to_hadec(alt, az, self.latitude);
                ApparentPlace {
                    ha,
                    dec,
                    alt,
                    az,
                    parallactic: parallactic_angle(ha, dec, self.latitude),
                }
            }
            TargetObject::Elements(ref el) => {
                let (ra, dec) = el.geocentric_radec(t)?;
                self.place_from_hadec(sidereal - ra, dec)
            }
        };
        Ok(place)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astro::sidereal::lst;

    fn site() -> SiteEphemeris {
        SiteEphemeris::new(&SiteConfig {
            latitude: 31.96,
            longitude: -111.6,
            elevation_m: 2096.0,
        })
    }

    #[test]
    fn object_at_local_sidereal_time_transits() {
        let eph = site();
        let t = Timestamp::from_unix_secs(1_700_000_000.0);
        let ra = lst(t, (-111.6_f64).to_radians());
        let place = eph
            .apparent_place(&TargetObject::Equatorial { ra, dec: 0.2 }, t)
            .unwrap();
        assert!(place.ha.abs() < 1e-9);
        assert!((place.az - std::f64::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn hour_angle_grows_with_time() {
        let eph = site();
        let target = TargetObject::Equatorial { ra: 1.0, dec: 0.3 };
        let t0 = Timestamp::from_unix_secs(1_700_000_000.0);
        let p0 = eph.apparent_place(&target, t0).unwrap();
        let p1 = eph.apparent_place(&target, t0.add_secs(60.0)).unwrap();
        let rate = wrap_pi(p1.ha - p0.ha) / 60.0;
        // Sidereal rate ~7.29e-5 rad/s.
        assert!((rate - 7.292e-5).abs() < 1e-7);
    }

    #[test]
    fn horizon_target_is_fixed() {
        let eph = site();
        let target = TargetObject::Horizon { alt: 0.8, az: 2.0 };
        let t0 = Timestamp::from_unix_secs(1_700_000_000.0);
        let p0 = eph.apparent_place(&target, t0).unwrap();
        let p1 = eph.apparent_place(&target, t0.add_secs(3600.0)).unwrap();
        assert_eq!(p0, p1);
        assert_eq!(p0.alt, 0.8);
        assert!(!target.is_sidereal());
    }

    #[test]
    fn moving_target_advances_in_declination() {
        let eph = site();
        let t0 = Timestamp::from_unix_secs(1_700_000_000.0);
        let target = TargetObject::Moving {
            ra: 1.0,
            dec: 0.1,
            ra_rate: 0.0,
            dec_rate: 1e-4,
            epoch: t0,
        };
        let p = eph.apparent_place(&target, t0.add_secs(100.0)).unwrap();
        assert!((p.dec - 0.11).abs() < 1e-12);
    }

    #[test]
    fn non_finite_time_rejected() {
        let eph = site();
        let t = Timestamp::from_unix_secs(f64::NAN);
        let res = eph.apparent_place(&TargetObject::Equatorial { ra: 0.0, dec: 0.0 }, t);
        assert!(matches!(res, Err(EphemerisError::InvalidTime(_))));
    }
}
