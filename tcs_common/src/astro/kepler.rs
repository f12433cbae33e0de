//! Two-body propagation of heliocentric elliptical orbits.

use serde::{Deserialize, Serialize};

use super::ephemeris::EphemerisError;
use crate::consts::TWO_PI;
use crate::time::Timestamp;

/// Gaussian gravitational constant [rad/day].
const GAUSS_K: f64 = 0.017_202_098_95;

/// Mean obliquity of the ecliptic at J2000 [deg].
const OBLIQUITY_J2000_DEG: f64 = 23.439_291;

/// Light travel time for one AU [days].
const LIGHT_TIME_PER_AU: f64 = 0.005_775_518_3;

const KEPLER_MAX_ITER: usize = 30;
const KEPLER_TOLERANCE: f64 = 1e-12;

/// Heliocentric ecliptic (J2000) osculating elements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitalElements {
    /// Semi-major axis [AU].
    pub a: f64,
    /// Eccentricity, `0 <= e < 1`.
    pub e: f64,
    /// Inclination [rad].
    pub i: f64,
    /// Longitude of the ascending node [rad].
    pub node: f64,
    /// Argument of perihelion [rad].
    pub peri: f64,
    /// Mean anomaly at `epoch` [rad].
    pub mean_anomaly: f64,
    pub epoch: Timestamp,
}

impl OrbitalElements {
    /// Mean elements of the Earth-Moon barycentre at J2000.
    pub fn earth() -> Self {
        let peri_longitude = 102.937_348_08_f64.to_radians();
        let mean_longitude = 100.464_571_66_f64.to_radians();
        Self {
            a: 1.000_000_11,
            e: 0.016_710_22,
            i: 0.0,
            node: 0.0,
            peri: peri_longitude,
            mean_anomaly: mean_longitude - peri_longitude,
            epoch: Timestamp::from_unix_secs(946_728_000.0),
        }
    }

    pub fn validate(&self) -> Result<(), EphemerisError> {
        if !(self.a > 0.0) {
            return Err(EphemerisError::InvalidTarget(format!(
                "semi-major axis {} must be positive",
                self.a
            )));
        }
        if !(0.0..1.0).contains(&self.e) {
            return Err(EphemerisError::InvalidTarget(format!(
                "eccentricity {} outside [0, 1)",
                self.e
            )));
        }
        Ok(())
    }

    /// Heliocentric ecliptic position [AU] at `t`.
    pub fn position(&self, t: Timestamp) -> Result<[f64; 3], EphemerisError> {
        self.validate()?;
        let days = t.secs_since(self.epoch) / 86_400.0;
        let n = GAUSS_K / self.a.powf(1.5);
        let m = (self.mean_anomaly + n * days).rem_euclid(TWO_PI);
        let ecc = solve_kepler(m, self.e)?;

        let xp = self.a * (ecc.cos() - self.e);
        let yp = self.a * (1.0 - self.e * self.e).sqrt() * ecc.sin();

        let (sw, cw) = self.peri.sin_cos();
        let (sn, cn) = self.node.sin_cos();
        let (si, ci) = self.i.sin_cos();

        Ok([
            xp * (cw * cn - sw * sn * ci) + yp * (-sw * cn - cw * sn * ci),
            xp * (cw * sn + sw * cn * ci) + yp * (-sw * sn + cw * cn * ci),
            xp * (sw * si) + yp * (cw * si),
        ])
    }

    /// Geocentric equatorial (ra, dec) [rad] at `t`, one light-time pass.
    pub fn geocentric_radec(&self, t: Timestamp) -> Result<(f64, f64), EphemerisError> {
        let earth = Self::earth().position(t)?;
        let body = self.position(t)?;
        let dist = distance(&body, &earth);
        let body = self.position(t.add_secs(-dist * LIGHT_TIME_PER_AU * 86_400.0))?;
        let geo = [body[0] - earth[0], body[1] - earth[1], body[2] - earth[2]];

        let (se, ce) = OBLIQUITY_J2000_DEG.to_radians().sin_cos();
        let x = geo[0];
        let y = geo[1] * ce - geo[2] * se;
        let z = geo[1] * se + geo[2] * ce;

        let ra = y.atan2(x).rem_euclid(TWO_PI);
        let dec = z.atan2((x * x + y * y).sqrt());
        Ok((ra, dec))
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Eccentric anomaly for mean anomaly `m` (Newton iteration).
pub fn solve_kepler(m: f64, e: f64) -> Result<f64, EphemerisError> {
    let mut ecc = if e < 0.8 { m } else { std::f64::consts::PI };
    for _ in 0..KEPLER_MAX_ITER {
        let f = ecc - e * ecc.sin() - m;
        let step = f / (1.0 - e * ecc.cos());
        ecc -= step;
        if step.abs() < KEPLER_TOLERANCE {
            return Ok(ecc);
        }
    }
    Err(EphemerisError::CalculationError(format!(
        "Kepler equation did not converge (M={m}, e={e})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_orbit_eccentric_equals_mean() {
        assert!((solve_kepler(1.234, 0.0).unwrap() - 1.234).abs() < 1e-12);
    }

    #[test]
    fn kepler_solution_satisfies_equation() {
        let (m, e) = (0.3, 0.9);
        let ecc = solve_kepler(m, e).unwrap();
        assert!((ecc - e * ecc.sin() - m).abs() < 1e-10);
    }

    #[test]
    fn earth_distance_stays_within_perihelion_aphelion() {
        let earth = OrbitalElements::earth();
        for day in [0.0, 91.0, 182.0, 273.0] {
            let p = earth.position(earth.epoch.add_secs(day * 86_400.0)).unwrap();
            let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
            assert!(r > 0.98 && r < 1.02, "r={r}");
        }
    }

    #[test]
    fn mars_like_orbit_is_near_ecliptic() {
        let mars = OrbitalElements {
            a: 1.523_679,
            e: 0.0934,
            i: 1.85_f64.to_radians(),
            node: 49.56_f64.to_radians(),
            peri: 286.5_f64.to_radians(),
            mean_anomaly: 19.4_f64.to_radians(),
            epoch: OrbitalElements::earth().epoch,
        };
        let (ra, dec) = mars.geocentric_radec(mars.epoch).unwrap();
        assert!((0.0..TWO_PI).contains(&ra));
        // Ecliptic objects never exceed obliquity plus inclination by much.
        assert!(dec.abs() < 30_f64.to_radians());
    }

    #[test]
    fn hyperbolic_orbit_rejected() {
        let mut el = OrbitalElements::earth();
        el.e = 1.2;
        assert!(matches!(
            el.position(el.epoch),
            Err(EphemerisError::InvalidTarget(_))
        ));
    }
}
