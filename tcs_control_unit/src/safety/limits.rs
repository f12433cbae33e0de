//! Travel-limit validation with optional revolution wrapping.

use tcs_common::consts::{MAX_WRAP_REVOLUTIONS, TWO_PI};
use tcs_common::control_unit::state::AxisId;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Axis, TravelLimits};

/// A candidate position outside the safe travel of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("axis {axis}: {value:.6} rad violates limit {bound:.6} rad")]
pub struct LimitExceeded {
    pub axis: AxisId,
    /// The violated bound [rad].
    pub bound: f64,
    /// The offending value [rad].
    pub value: f64,
}

/// Validate `candidate` against `limits`.
///
/// With `allow_wrap`, whole revolutions are added or subtracted (the
/// fewest that bring the value back across the violated bound) and the
/// result is re-verified. The returned value is always strictly inside
/// the limits.
pub fn check_and_wrap(
    axis: AxisId,
    limits: TravelLimits,
    candidate: f64,
    allow_wrap: bool,
) -> Result<f64, LimitExceeded> {
    if limits.contains(candidate) {
        return Ok(candidate);
    }

    let above = candidate >= limits.pos;
    let exceeded = LimitExceeded {
        axis,
        bound: if above { limits.pos } else { limits.neg },
        value: candidate,
    };
    if !allow_wrap || !candidate.is_finite() {
        debug!(%axis, candidate, "candidate outside travel limits");
        return Err(exceeded);
    }

    let overshoot = if above {
        candidate - limits.pos
    } else {
        limits.neg - candidate
    };
    let revolutions = (overshoot / TWO_PI).floor() + 1.0;
    if revolutions > MAX_WRAP_REVOLUTIONS as f64 {
        warn!(%axis, candidate, "candidate too many revolutions from travel range");
        return Err(exceeded);
    }

    let wrapped = if above {
        candidate - revolutions * TWO_PI
    } else {
        candidate + revolutions * TWO_PI
    };
    if limits.contains(wrapped) {
        Ok(wrapped)
    } else {
        debug!(%axis, candidate, wrapped, "no revolution of candidate fits travel range");
        Err(exceeded)
    }
}

/// Hard limit switch active in the direction the axis is being driven.
pub fn check_limit_switches(axis: &Axis) -> Result<(), LimitExceeded> {
    let direction = if axis.last_commanded != 0.0 {
        axis.last_commanded
    } else {
        axis.velocity
    };
    if axis.switches.limit_active(direction) {
        let bound = if direction > 0.0 {
            axis.limits.pos
        } else {
            axis.limits.neg
        };
        warn!(axis = %axis.id, position = axis.position, "limit switch active");
        return Err(LimitExceeded {
            axis: axis.id,
            bound,
            value: axis.position,
        });
    }
    Ok(())
}
