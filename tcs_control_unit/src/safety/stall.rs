//! Stall detection: commanded motion must show up in the feedback.

use tcs_common::control_unit::state::AxisId;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Axis;

/// Minimum expected travel per tick, in feedback steps, before a tick is
/// judged at all. Slower motion is below the feedback resolution.
const MIN_EXPECTED_STEPS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("axis {axis} stalled for {ticks} consecutive ticks")]
pub struct StallDetected {
    pub axis: AxisId,
    pub ticks: u32,
}

/// One-tick check. Rates are the commanded rates over the previous and
/// the current interval [rad/s], positions in rad.
///
/// Both rates nonzero with the same sign means the axis was driven in one
/// direction for the whole tick, so the position must have moved that way.
pub fn detect_stall(
    axis: AxisId,
    previous_rate: f64,
    previous_position: f64,
    current_rate: f64,
    current_position: f64,
) -> Result<(), StallDetected> {
    if previous_rate == 0.0 || current_rate == 0.0 {
        return Ok(());
    }
    if previous_rate.signum() != current_rate.signum() {
        return Ok(());
    }
    let moved = current_position - previous_position;
    if moved * current_rate > 0.0 {
        Ok(())
    } else {
        Err(StallDetected { axis, ticks: 1 })
    }
}

/// Outcome of one tick of stall supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallVerdict {
    Clear,
    /// Stalled, but not yet for long enough to abort.
    Warning,
    Abort(StallDetected),
}

/// Escalates consecutive stalled ticks to an abort.
#[derive(Debug, Clone, Copy)]
pub struct StallMonitor {
    abort_after: u32,
}

impl StallMonitor {
    pub fn new(abort_after: u32) -> Self {
        Self {
            abort_after: abort_after.max(2),
        }
    }

    /// Judge the latest sample of `axis`, updating its stall counter.
    ///
    /// The interval since the previous sample is judged against the rate
    /// commanded over it. The reported velocity only excuses a tick when
    /// it opposes the command, i.e. the controller is still braking out of
    /// the other direction.
    pub fn evaluate(&self, axis: &mut Axis, dt: f64) -> StallVerdict {
        let Some(prev) = axis.previous() else {
            return StallVerdict::Clear;
        };
        let commanded = axis.last_commanded;
        let braking = prev.velocity * commanded < 0.0 || axis.velocity * commanded < 0.0;
        let mut expected = commanded.abs() * dt;
        if let Some(target) = axis.target {
            expected = expected.min((target - prev.position).abs());
        }
        if braking || expected < MIN_EXPECTED_STEPS * axis.step_size() {
            axis.stall_ticks = 0;
            return StallVerdict::Clear;
        }
        match detect_stall(
            axis.id,
            prev.commanded,
            prev.position,
            commanded,
            axis.position,
        ) {
            Ok(()) => {
                if axis.stall_ticks > 0 {
                    debug!(axis = %axis.id, "axis moving again");
                }
                axis.stall_ticks = 0;
                StallVerdict::Clear
            }
            Err(_) => {
                axis.stall_ticks += 1;
                if axis.stall_ticks >= self.abort_after {
                    StallVerdict::Abort(StallDetected {
                        axis: axis.id,
                        ticks: axis.stall_ticks,
                    })
                } else {
                    warn!(
                        axis = %axis.id,
                        ticks = axis.stall_ticks,
                        commanded,
                        reported = axis.velocity,
                        "no feedback movement while driven"
                    );
                    StallVerdict::Warning
                }
            }
        }
    }
}
