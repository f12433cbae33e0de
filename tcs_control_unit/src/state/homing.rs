//! Homing supervision.
//!
//! Each axis is re-zeroed against its home switch, or by dead reckoning
//! when it has none:
//!
//! | Step        | Motion                         | Ends when               |
//! |-------------|--------------------------------|-------------------------|
//! | Clear       | away from home (`-direction`)  | switch inactive         |
//! | Seek        | towards home (`+direction`)    | switch active           |
//! | Backoff     | away, at a quarter of the speed| switch inactive (latch) |
//! | DeadReckon  | towards home                   | `travel_time` elapsed   |
//! | Zero        | none                           | position redefined      |
//!
//! Every step starts only once the axis stands still, so no reversal is
//! ever commanded on a moving axis. The aggregate run completes only when
//! every requested axis has completed.

use tcs_common::consts::MAX_MOUNT_AXES;
use tcs_common::control_unit::state::AxisId;
use tcs_common::hal::driver::{HardwareBinding, HardwareError};
use tcs_common::time::Timestamp;
use tracing::{debug, info};

use super::transition::Transition;
use crate::error::ControlError;
use crate::model::Axis;
use crate::planner::{drive_at, halt};

/// Backoff speed as a fraction of the seek speed.
const BACKOFF_FRACTION: f64 = 0.25;

// ─── Homing Phases ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingStep {
    Clear,
    Seek,
    Backoff,
    DeadReckon,
    Zero,
}

impl HomingStep {
    fn next(self) -> Self {
        match self {
            Self::Clear => Self::Seek,
            Self::Seek => Self::Backoff,
            Self::Backoff | Self::DeadReckon | Self::Zero => Self::Zero,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingPhase {
    /// Waiting for the axis to stand still before starting the step.
    Settle(HomingStep),
    /// Step under way.
    Run(HomingStep),
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingTickResult {
    InProgress,
    Complete,
}

// ─── Homing Supervisor ──────────────────────────────────────────────

/// Per-axis homing state machine.
#[derive(Debug, Clone)]
pub struct HomingSupervisor {
    axis: AxisId,
    phase: HomingPhase,
    switch: bool,
    /// Seek direction sign (+1.0 or -1.0).
    direction: f64,
    /// [rad/s]
    speed: f64,
    travel_time: f64,
    step_started: Timestamp,
    /// Feedback count at the switch edge.
    edge_raw: i64,
}

impl HomingSupervisor {
    pub fn new(axis: &Axis, now: Timestamp) -> Self {
        let home = &axis.config.home;
        let first = if home.switch {
            HomingStep::Seek
        } else {
            HomingStep::DeadReckon
        };
        Self {
            axis: axis.id,
            phase: HomingPhase::Settle(first),
            switch: home.switch,
            direction: home.direction as f64,
            speed: home.speed,
            travel_time: home.travel_time,
            step_started: now,
            edge_raw: 0,
        }
    }

    #[inline]
    pub fn axis(&self) -> AxisId {
        self.axis
    }

    #[inline]
    pub fn phase(&self) -> HomingPhase {
        self.phase
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.phase == HomingPhase::Complete
    }

    /// Stop the axis and invalidate its reference.
    pub fn start(&mut self, axis: &mut Axis, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
        halt(axis, hw)?;
        axis.homed = false;
        axis.target = None;
        axis.on_target_ticks = 0;
        Ok(())
    }

    /// Advance once per tick.
    pub fn tick(
        &mut self,
        axis: &mut Axis,
        hw: &mut dyn HardwareBinding,
        now: Timestamp,
    ) -> Result<HomingTickResult, HardwareError> {
        match self.phase {
            HomingPhase::Complete => return Ok(HomingTickResult::Complete),
            HomingPhase::Settle(step) => {
                if !axis.at_rest() {
                    return Ok(HomingTickResult::InProgress);
                }
                match step {
                    HomingStep::Seek if axis.home_active() => {
                        self.begin(HomingStep::Clear, axis, hw, now)?;
                    }
                    HomingStep::Zero => {
                        let zero = if self.switch {
                            axis.raw - self.edge_raw
                        } else {
                            0
                        };
                        hw.set_position(axis.id, zero)?;
                        axis.raw = zero;
                        axis.position = axis.feedback_to_rad(zero);
                        axis.homed = true;
                        self.phase = HomingPhase::Complete;
                        info!(axis = %axis.id, "axis homed");
                        return Ok(HomingTickResult::Complete);
                    }
                    step => self.begin(step, axis, hw, now)?,
                }
            }
            HomingPhase::Run(step) => {
                let finished = match step {
                    HomingStep::Clear => !axis.home_active(),
                    HomingStep::Seek => axis.home_active(),
                    HomingStep::Backoff => {
                        let off = !axis.home_active();
                        if off {
                            self.edge_raw = axis.raw;
                        }
                        off
                    }
                    HomingStep::DeadReckon => now.secs_since(self.step_started) >= self.travel_time,
                    HomingStep::Zero => true,
                };
                if finished {
                    halt(axis, hw)?;
                    self.phase = HomingPhase::Settle(step.next());
                    debug!(axis = %axis.id, ?step, "homing step finished");
                }
            }
        }
        Ok(HomingTickResult::InProgress)
    }

    fn begin(
        &mut self,
        step: HomingStep,
        axis: &mut Axis,
        hw: &mut dyn HardwareBinding,
        now: Timestamp,
    ) -> Result<(), HardwareError> {
        let velocity = match step {
            HomingStep::Clear => -self.direction * self.speed,
            HomingStep::Seek | HomingStep::DeadReckon => self.direction * self.speed,
            HomingStep::Backoff => -self.direction * self.speed * BACKOFF_FRACTION,
            HomingStep::Zero => 0.0,
        };
        drive_at(axis, hw, velocity)?;
        self.step_started = now;
        self.phase = HomingPhase::Run(step);
        debug!(axis = %axis.id, ?step, velocity, "homing step started");
        Ok(())
    }
}

// ─── Aggregate Run ──────────────────────────────────────────────────

/// Homing of a set of axes; completes when all of them have.
#[derive(Debug, Clone)]
pub struct HomingRun {
    supervisors: heapless::Vec<HomingSupervisor, MAX_MOUNT_AXES>,
}

impl HomingRun {
    /// Home the axes named in `which` (all of `axes` when empty).
    pub fn enter(
        axes: &mut [Axis],
        which: &[AxisId],
        hw: &mut dyn HardwareBinding,
        now: Timestamp,
    ) -> Result<Self, ControlError> {
        let mut supervisors = heapless::Vec::new();
        for axis in axes.iter_mut().filter(|a| selected(which, a.id)) {
            let mut supervisor = HomingSupervisor::new(axis, now);
            supervisor.start(axis, hw)?;
            if supervisors.push(supervisor).is_err() {
                return Err(ControlError::rejected("too many axes to home at once"));
            }
        }
        if supervisors.is_empty() {
            return Err(ControlError::rejected("no axis to home"));
        }
        Ok(Self { supervisors })
    }

    pub fn axes(&self) -> impl Iterator<Item = AxisId> + '_ {
        self.supervisors.iter().map(|s| s.axis())
    }

    pub fn poll(
        &mut self,
        axes: &mut [Axis],
        hw: &mut dyn HardwareBinding,
        now: Timestamp,
    ) -> Result<Transition, HardwareError> {
        let mut all_complete = true;
        let mut newly_homed: Vec<AxisId> = Vec::new();
        for supervisor in self.supervisors.iter_mut() {
            let Some(axis) = axes.iter_mut().find(|a| a.id == supervisor.axis()) else {
                return Ok(Transition::Abort(ControlError::rejected(format!(
                    "axis {} missing while homing",
                    supervisor.axis()
                ))));
            };
            let was_complete = supervisor.is_complete();
            match supervisor.tick(axis, hw, now)? {
                HomingTickResult::Complete if !was_complete => newly_homed.push(axis.id),
                HomingTickResult::Complete => {}
                HomingTickResult::InProgress => all_complete = false,
            }
        }

        if all_complete {
            Ok(Transition::Done(format!("homed {}", axis_list(self.axes()))))
        } else if !newly_homed.is_empty() {
            Ok(Transition::Progress(format!(
                "{} homed",
                axis_list(newly_homed.into_iter())
            )))
        } else {
            Ok(Transition::Continue)
        }
    }
}

/// Axis filter: empty selects everything.
#[inline]
pub(crate) fn selected(which: &[AxisId], axis: AxisId) -> bool {
    which.is_empty() || which.contains(&axis)
}

pub(crate) fn axis_list(axes: impl Iterator<Item = AxisId>) -> String {
    axes.map(|a| a.as_str()).collect::<Vec<_>>().join(" ")
}
