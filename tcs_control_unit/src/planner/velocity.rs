//! Per-tick velocity command.
//!
//! Two velocity estimates are blended: the scope-implied velocity closes
//! the gap between the axis and where the target will be next tick, the
//! object-implied velocity is the target's own rate. Slewing and hunting
//! weight them by `damping_factor`, steady tracking by
//! `tracking_encoder_weight`.

use tcs_common::hal::driver::{HardwareBinding, HardwareError};
use tracing::trace;

use crate::model::Axis;

/// Commands slower than this are sent as a stop [motor steps/s].
const DEADBAND_STEPS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Slewing or hunting.
    Slew,
    /// Locked tracking.
    Track,
}

/// Command one tick of motion towards `desired_future` (the target one
/// tick from now). `target_now` is the target at the current tick.
///
/// A velocity whose sign opposes the last command, or the axis's actual
/// motion, is never sent directly: the axis is stopped first and the new
/// direction deferred to a later tick. Returns the commanded rate [rad/s].
pub fn advance(
    axis: &mut Axis,
    hw: &mut dyn HardwareBinding,
    target_now: f64,
    desired_future: f64,
    dt: f64,
    mode: BlendMode,
) -> Result<f64, HardwareError> {
    let (weight, accel) = match mode {
        BlendMode::Slew => (axis.config.damping_factor, axis.config.max_accel_slew),
        BlendMode::Track => (
            axis.config.tracking_encoder_weight,
            axis.config.max_accel_track,
        ),
    };
    let error = desired_future - axis.position;
    let v_scope = error / dt;
    let v_object = (desired_future - target_now) / dt;

    let max_velocity = axis.config.max_velocity;
    let braking = (2.0 * accel * error.abs()).sqrt().max(v_object.abs());
    let mut velocity = (weight * v_scope + (1.0 - weight) * v_object)
        .clamp(-max_velocity, max_velocity);
    velocity = velocity.clamp(-braking, braking);
    axis.predicted = Some(desired_future);

    if axis.rad_to_motor(velocity).abs() < DEADBAND_STEPS {
        if axis.last_commanded != 0.0 {
            hw.stop(axis.id)?;
            axis.last_commanded = 0.0;
        }
        return Ok(0.0);
    }

    let against_command =
        axis.last_commanded != 0.0 && axis.last_commanded.signum() != velocity.signum();
    let against_motion = axis.velocity != 0.0 && axis.velocity.signum() != velocity.signum();
    if against_command || against_motion {
        if axis.last_commanded != 0.0 {
            trace!(axis = %axis.id, "direction reversal, stopping first");
            hw.stop(axis.id)?;
        }
        axis.last_commanded = 0.0;
        return Ok(0.0);
    }

    let raw_velocity = axis.rad_to_motor(velocity);
    let raw_accel = axis.rad_to_motor(accel).abs();
    hw.jog_at(axis.id, raw_velocity, raw_accel)?;
    axis.last_commanded = velocity;
    Ok(velocity)
}

/// Run an axis at a fixed rate [rad/s] with slew acceleration.
pub fn drive_at(
    axis: &mut Axis,
    hw: &mut dyn HardwareBinding,
    velocity: f64,
) -> Result<(), HardwareError> {
    let raw_accel = axis.rad_to_motor(axis.config.max_accel_slew).abs();
    hw.jog_at(axis.id, axis.rad_to_motor(velocity), raw_accel)?;
    axis.last_commanded = velocity;
    Ok(())
}

/// Point-to-point move at full slew speed. The controller plans the
/// profile itself.
pub fn move_axis_to(
    axis: &mut Axis,
    hw: &mut dyn HardwareBinding,
    target: f64,
) -> Result<(), HardwareError> {
    let raw_target = axis.rad_to_motor_raw(target);
    let raw_velocity = axis.rad_to_motor(axis.config.max_velocity).abs();
    let raw_accel = axis.rad_to_motor(axis.config.max_accel_slew).abs();
    hw.move_to(axis.id, raw_target, raw_velocity, raw_accel)?;
    axis.target = Some(target);
    axis.last_commanded = (target - axis.position).signum() * axis.config.max_velocity;
    Ok(())
}

/// Stop an axis.
pub fn halt(axis: &mut Axis, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
    hw.stop(axis.id)?;
    axis.last_commanded = 0.0;
    Ok(())
}
