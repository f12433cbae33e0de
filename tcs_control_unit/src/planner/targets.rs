//! Axis targets from a celestial object, operator offsets, the pointing
//! mesh and the mount geometry.

use tcs_common::astro::coords::{altaz_to_hadec, hadec_to_altaz, parallactic_angle, wrap_pi};
use tcs_common::astro::{ApparentPlace, Ephemeris, TargetObject};
use tcs_common::control_unit::config::{MountConfig, MountKind};
use tcs_common::control_unit::state::AxisId;
use tcs_common::control_unit::telemetry::{OffsetTelemetry, PointingTelemetry};
use tcs_common::time::Timestamp;

use crate::error::ControlError;
use crate::model::{MountGeometry, PointingMesh, TravelLimits};
use crate::safety::check_and_wrap;

/// Operator offsets applied on top of the target [rad].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Offsets {
    /// Sky offsets.
    pub ra: f64,
    pub dec: f64,
    /// Raw-axis offsets accumulated from paddle nudges.
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

impl Offsets {
    pub fn telemetry(&self) -> OffsetTelemetry {
        OffsetTelemetry {
            ra: self.ra,
            dec: self.dec,
            x: self.x,
            y: self.y,
            r: self.r,
        }
    }

    /// Drop the raw-axis nudges, keeping the sky offsets.
    pub fn clear_nudges(&mut self) {
        self.x = 0.0;
        self.y = 0.0;
        self.r = 0.0;
    }
}

/// Travel limits of the mount axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountLimits {
    pub x: TravelLimits,
    pub y: TravelLimits,
    pub r: Option<TravelLimits>,
}

/// Validated drive values for one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisTargets {
    pub x: f64,
    pub y: f64,
    pub r: Option<f64>,
    /// Apparent place after sky offsets.
    pub place: ApparentPlace,
}

#[derive(Debug, Clone)]
pub struct MotionPlanner {
    geometry: MountGeometry,
    mesh: PointingMesh,
}

impl MotionPlanner {
    pub fn new(config: &MountConfig, mesh: PointingMesh) -> Self {
        Self {
            geometry: MountGeometry::from_config(config),
            mesh,
        }
    }

    #[inline]
    pub fn kind(&self) -> MountKind {
        self.geometry.kind
    }

    /// Drive values for `object` at `now`. Deterministic in its inputs.
    pub fn compute_axis_targets(
        &self,
        ephemeris: &dyn Ephemeris,
        object: &TargetObject,
        now: Timestamp,
        offsets: &Offsets,
        limits: &MountLimits,
    ) -> Result<AxisTargets, ControlError> {
        let latitude = ephemeris.latitude();
        let mut place = ephemeris.apparent_place(object, now)?;

        if offsets.ra != 0.0 || offsets.dec != 0.0 {
            let ha = wrap_pi(place.ha - offsets.ra);
            let dec = (place.dec + offsets.dec)
                .clamp(-std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2);
            let (alt, az) = hadec_to_altaz(ha, dec, latitude);
            place = ApparentPlace {
                ha,
                dec,
                alt,
                az,
                parallactic: parallactic_angle(ha, dec, latitude),
            };
        }

        let (lon, lat) = self.geometry.user_pair(&place);
        let (dlon, dlat) = self.mesh.correction(lon, lat);
        let (lon, lat) = self.geometry.native_from_user(lon + dlon, lat + dlat);
        let (x, y) = self.geometry.native_to_axes(lon, lat);

        let x = check_and_wrap(AxisId::MountX, limits.x, x + offsets.x, true)?;
        let y = check_and_wrap(AxisId::MountY, limits.y, y + offsets.y, true)?;
        let r = match limits.r {
            Some(r_limits) => {
                let base = match self.geometry.kind {
                    MountKind::AltAz => place.parallactic,
                    MountKind::Equatorial => 0.0,
                };
                Some(check_and_wrap(AxisId::MountR, r_limits, base + offsets.r, true)?)
            }
            None => None,
        };
        Ok(AxisTargets { x, y, r, place })
    }

    /// Where the mount points for drive values (x, y).
    pub fn pointing(&self, latitude: f64, x: f64, y: f64) -> PointingTelemetry {
        let (lon, lat) = self.geometry.axes_to_native(x, y);
        let lon = -lon;
        let (dlon, dlat) = self.mesh.correction(lon, lat);
        let (lon, lat) = (lon - dlon, lat - dlat);
        match self.geometry.kind {
            MountKind::Equatorial => {
                let ha = wrap_pi(lon);
                let (alt, az) = hadec_to_altaz(ha, lat, latitude);
                PointingTelemetry {
                    ha,
                    dec: lat,
                    alt,
                    az,
                }
            }
            MountKind::AltAz => {
                let (ha, dec) = altaz_to_hadec(lat, lon, latitude);
                PointingTelemetry {
                    ha,
                    dec,
                    alt: lat,
                    az: lon.rem_euclid(std::f64::consts::TAU),
                }
            }
        }
    }
}
