//! Travel-limit discovery.
//!
//! Each axis is driven positive until its limit switch (or, without
//! switches, for the dead-reckoning travel time), then negative, then
//! returned to its zero. The positions where the switches tripped, pulled
//! in by `limit_margin`, become the axis's new soft limits.

use tcs_common::consts::MAX_MOUNT_AXES;
use tcs_common::control_unit::state::AxisId;
use tcs_common::hal::driver::{HardwareBinding, HardwareError};
use tcs_common::hal::types::SwitchState;
use tcs_common::time::Timestamp;
use tracing::{debug, info, warn};

use super::homing::{axis_list, selected};
use super::transition::Transition;
use crate::error::ControlError;
use crate::model::{Axis, TravelLimits};
use crate::planner::{drive_at, halt, move_axis_to};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStep {
    SeekPositive,
    SeekNegative,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitPhase {
    Settle(LimitStep),
    Run(LimitStep),
    Complete,
}

/// Limits discovered for one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundLimits {
    pub axis: AxisId,
    pub name: String,
    pub limits: TravelLimits,
}

#[derive(Debug, Clone)]
struct LimitSeeker {
    axis: AxisId,
    phase: LimitPhase,
    speed: f64,
    switches: bool,
    travel_time: f64,
    margin: f64,
    step_started: Timestamp,
    pos_hit: f64,
    neg_hit: f64,
}

impl LimitSeeker {
    fn new(axis: &Axis, now: Timestamp) -> Self {
        Self {
            axis: axis.id,
            phase: LimitPhase::Settle(LimitStep::SeekPositive),
            speed: axis.config.limit_seek_speed(),
            switches: axis.config.has_limit_switches,
            travel_time: axis.config.home.travel_time,
            margin: axis.config.limit_margin,
            step_started: now,
            pos_hit: axis.limits.pos,
            neg_hit: axis.limits.neg,
        }
    }

    fn reached(&self, axis: &Axis, switch: SwitchState, now: Timestamp) -> bool {
        if self.switches {
            axis.switches.contains(switch)
        } else {
            now.secs_since(self.step_started) >= self.travel_time
        }
    }

    fn found(&self) -> TravelLimits {
        TravelLimits {
            neg: self.neg_hit + self.margin,
            pos: self.pos_hit - self.margin,
        }
    }

    /// `Ok(Some(_))` once the axis is back home with valid limits.
    fn tick(
        &mut self,
        axis: &mut Axis,
        hw: &mut dyn HardwareBinding,
        now: Timestamp,
    ) -> Result<Option<Result<TravelLimits, ControlError>>, HardwareError> {
        match self.phase {
            LimitPhase::Complete => return Ok(Some(Ok(self.found()))),
            LimitPhase::Settle(step) => {
                if axis.at_rest() {
                    match step {
                        LimitStep::SeekPositive => drive_at(axis, hw, self.speed)?,
                        LimitStep::SeekNegative => drive_at(axis, hw, -self.speed)?,
                        LimitStep::Return => {
                            let found = self.found();
                            if found.neg >= found.pos {
                                warn!(axis = %axis.id, ?found, "found limits are inverted");
                                return Ok(Some(Err(ControlError::rejected(format!(
                                    "axis {}: found limits {:.4}..{:.4} leave no travel",
                                    axis.id, found.neg, found.pos
                                )))));
                            }
                            let home = if found.contains(0.0) { 0.0 } else { found.midpoint() };
                            move_axis_to(axis, hw, home)?;
                        }
                    }
                    self.step_started = now;
                    self.phase = LimitPhase::Run(step);
                    debug!(axis = %axis.id, ?step, "limit step started");
                }
            }
            LimitPhase::Run(LimitStep::SeekPositive) => {
                if self.reached(axis, SwitchState::POS_LIMIT, now) {
                    self.pos_hit = axis.position;
                    halt(axis, hw)?;
                    self.phase = LimitPhase::Settle(LimitStep::SeekNegative);
                    info!(axis = %axis.id, position = axis.position, "positive limit found");
                }
            }
            LimitPhase::Run(LimitStep::SeekNegative) => {
                if self.reached(axis, SwitchState::NEG_LIMIT, now) {
                    self.neg_hit = axis.position;
                    halt(axis, hw)?;
                    self.phase = LimitPhase::Settle(LimitStep::Return);
                    info!(axis = %axis.id, position = axis.position, "negative limit found");
                }
            }
            LimitPhase::Run(LimitStep::Return) => {
                if axis.error().abs() <= axis.step_size() && axis.at_rest() {
                    axis.target = None;
                    axis.last_commanded = 0.0;
                    axis.limits = self.found();
                    self.phase = LimitPhase::Complete;
                    return Ok(Some(Ok(axis.limits)));
                }
            }
        }
        Ok(None)
    }
}

/// Limit discovery over a set of homed axes.
#[derive(Debug, Clone)]
pub struct LimitsRun {
    seekers: heapless::Vec<LimitSeeker, MAX_MOUNT_AXES>,
    found: Vec<FoundLimits>,
}

impl LimitsRun {
    /// Measure the axes named in `which` (all of `axes` when empty).
    /// Every one of them must be homed, otherwise nothing moves.
    pub fn enter(
        axes: &mut [Axis],
        which: &[AxisId],
        hw: &mut dyn HardwareBinding,
        now: Timestamp,
    ) -> Result<Self, ControlError> {
        if !axes.iter().any(|a| selected(which, a.id)) {
            return Err(ControlError::rejected("no axis to measure"));
        }
        if let Some(axis) = axes.iter().find(|a| selected(which, a.id) && !a.homed) {
            return Err(ControlError::rejected(format!("axis {} is not homed", axis.id)));
        }
        let mut seekers = heapless::Vec::new();
        for axis in axes.iter_mut().filter(|a| selected(which, a.id)) {
            halt(axis, hw)?;
            axis.target = None;
            if seekers.push(LimitSeeker::new(axis, now)).is_err() {
                return Err(ControlError::rejected("too many axes to measure at once"));
            }
        }
        Ok(Self {
            seekers,
            found: Vec::new(),
        })
    }

    /// Limits found by a completed run.
    pub fn found(&self) -> &[FoundLimits] {
        &self.found
    }

    pub fn poll(
        &mut self,
        axes: &mut [Axis],
        hw: &mut dyn HardwareBinding,
        now: Timestamp,
    ) -> Result<Transition, HardwareError> {
        let mut all_complete = true;
        let mut finished = Vec::new();
        for seeker in self.seekers.iter_mut() {
            let Some(axis) = axes.iter_mut().find(|a| a.id == seeker.axis) else {
                return Ok(Transition::Abort(ControlError::rejected(format!(
                    "axis {} missing while finding limits",
                    seeker.axis
                ))));
            };
            let was_complete = seeker.phase == LimitPhase::Complete;
            match seeker.tick(axis, hw, now)? {
                Some(Ok(limits)) => {
                    if !was_complete {
                        self.found.push(FoundLimits {
                            axis: axis.id,
                            name: axis.name().to_string(),
                            limits,
                        });
                        finished.push(axis.id);
                    }
                }
                Some(Err(e)) => return Ok(Transition::Abort(e)),
                None => all_complete = false,
            }
        }

        if all_complete {
            Ok(Transition::Done(format!(
                "limits found for {}",
                axis_list(self.found.iter().map(|f| f.axis))
            )))
        } else if !finished.is_empty() {
            Ok(Transition::Progress(format!(
                "limits found for {}",
                axis_list(finished.into_iter())
            )))
        } else {
            Ok(Transition::Continue)
        }
    }
}
