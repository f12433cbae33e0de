//! Closed-form slew duration estimate.

use std::f64::consts::PI;

use crate::model::Axis;

/// Seconds to move `axis` to `target`, assuming a cosine-shaped
/// acceleration profile:
///
/// `t = |Δθ|/(2π) · step_count / v_max + (π − 1) · v_max / a_slew`
///
/// with `v_max` and `a_slew` in motor steps per second (squared).
pub fn estimate_slew_time(axis: &Axis, target: f64) -> f64 {
    let delta = (target - axis.position).abs();
    let max_velocity = axis.rad_to_motor(axis.config.max_velocity).abs();
    let max_accel = axis.rad_to_motor(axis.config.max_accel_slew).abs();
    delta / (2.0 * PI) * axis.config.step_count as f64 / max_velocity
        + (PI - 1.0) * max_velocity / max_accel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::axis::tests::axis_config;
    use tcs_common::control_unit::state::AxisId;

    #[test]
    fn ten_degrees_matches_profile() {
        let mut cfg = axis_config(200_000);
        cfg.max_velocity = 0.01;
        cfg.max_accel_slew = 0.001;
        let axis = Axis::new(AxisId::MountX, cfg);
        let target = 10f64.to_radians();
        let t = estimate_slew_time(&axis, target);

        let v = 0.01 * 200_000.0 / (2.0 * PI);
        let a = 0.001 * 200_000.0 / (2.0 * PI);
        let expected = target / (2.0 * PI) * 200_000.0 / v + (PI - 1.0) * v / a;
        assert!(t.is_finite() && t > 0.0);
        assert!((t - expected).abs() < 1e-9);
        // Same as |Δθ|/v + (π−1)·v/a in radians.
        assert!((t - (target / 0.01 + (PI - 1.0) * 10.0)).abs() < 1e-9);
    }

    #[test]
    fn zero_distance_still_pays_ramp() {
        let axis = Axis::new(AxisId::MountY, axis_config(360_000));
        let t = estimate_slew_time(&axis, axis.position);
        assert!((t - (PI - 1.0) * 0.1 / 0.05).abs() < 1e-9);
    }
}
