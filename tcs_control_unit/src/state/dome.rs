//! Dome state machine.
//!
//! ```text
//! Idle/Stopped --dome <az>-->  Slewing   --on target-->  Idle
//! Idle/Stopped --auto-->       Hunting   --in slit-->    Tracking
//! Tracking     (follows the mount until `manual` or stop)
//! any          --shutter needs power-->  Slewing (power position)
//! ```
//!
//! The power-position move is requested by the shutter, not by a channel.
//! While it is held the dome refuses other motion; once the shutter is done
//! the dome resumes auto-follow if that was on.

use tcs_common::astro::coords::wrap_pi;
use tcs_common::control_unit::config::{DomeConfig, PowerPositionConfig};
use tcs_common::control_unit::state::{AxisId, OperationState, Subsystem};
use tcs_common::control_unit::telemetry::{PointingTelemetry, TelemetrySnapshot};
use tcs_common::hal::driver::{HardwareBinding, HardwareError};
use tcs_common::time::Timestamp;
use tracing::{debug, info, warn};

use super::homing::HomingRun;
use super::limits::{FoundLimits, LimitsRun};
use super::transition::{Accepted, Transition};
use super::{
    OperationStateMachine, TickContext, halt_axes, log_transition, publish_axis,
    publish_subsystem, stopped_state, supervise,
};
use crate::error::ControlError;
use crate::model::Axis;
use crate::planner::move_axis_to;
use crate::safety::{SafetyTimer, check_and_wrap, timer_expired, timer_started};

#[derive(Debug, Clone)]
enum DomeOp {
    None,
    Homing(HomingRun),
    Limits(LimitsRun),
    Goto { goal: f64 },
    /// `commanded` is the goal of the last move sent.
    Follow { locked: bool, commanded: Option<f64> },
    /// Held at the shutter power position until released.
    Power { goal: f64 },
}

/// Slit azimuth that puts the telescope beam through the slit.
///
/// The mount's axes intersection sits at `offset` from the dome centre;
/// the beam leaving it along (alt, az) meets the dome sphere of `radius`
/// at `P = O + t·d`. A zero radius means no parallax correction.
pub fn slit_azimuth(config: &DomeConfig, pointing: &PointingTelemetry) -> f64 {
    if config.radius <= 0.0 {
        return pointing.az;
    }
    let (sin_alt, cos_alt) = pointing.alt.sin_cos();
    let (sin_az, cos_az) = pointing.az.sin_cos();
    let d = [cos_alt * sin_az, cos_alt * cos_az, sin_alt];
    let o = [config.offset_east, config.offset_north, config.offset_up];
    let od = o[0] * d[0] + o[1] * d[1] + o[2] * d[2];
    let oo = o[0] * o[0] + o[1] * o[1] + o[2] * o[2];
    let t = -od + (od * od - (oo - config.radius * config.radius)).max(0.0).sqrt();
    let east = o[0] + t * d[0];
    let north = o[1] + t * d[1];
    east.atan2(north)
}

pub struct DomeMachine {
    config: DomeConfig,
    axis: Axis,
    state: OperationState,
    op: DomeOp,
    timer: SafetyTimer,
    /// Auto-follow requested by the operator.
    auto: bool,
    target: Option<String>,
    last_failure: Option<String>,
    found: Vec<FoundLimits>,
}

impl DomeMachine {
    pub fn new(config: &DomeConfig, now: Timestamp) -> Self {
        Self {
            config: config.clone(),
            axis: Axis::new(AxisId::DomeAz, config.az.clone()),
            state: OperationState::Idle,
            op: DomeOp::None,
            timer: SafetyTimer::unbounded(now),
            auto: false,
            target: None,
            last_failure: None,
            found: Vec::new(),
        }
    }

    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    pub fn axis_mut(&mut self) -> &mut Axis {
        &mut self.axis
    }

    pub fn auto(&self) -> bool {
        self.auto
    }

    pub fn take_found_limits(&mut self) -> Vec<FoundLimits> {
        std::mem::take(&mut self.found)
    }

    /// Slit centred on the power position and standing still.
    pub fn in_power_position(&self, power: &PowerPositionConfig) -> bool {
        wrap_pi(self.axis.position - power.azimuth).abs() <= power.tolerance && self.axis.at_rest()
    }

    fn check_free(&self) -> Result<(), ControlError> {
        if matches!(self.op, DomeOp::Power { .. }) {
            return Err(ControlError::rejected("dome held at shutter power position"));
        }
        Ok(())
    }

    /// Nearest goal equivalent to `azimuth` within travel.
    fn nearest(&self, azimuth: f64) -> Result<f64, ControlError> {
        let goal = self.axis.position + wrap_pi(azimuth - self.axis.position);
        Ok(check_and_wrap(self.axis.id, self.axis.limits, goal, true)?)
    }

    fn start(
        &mut self,
        state: OperationState,
        op: DomeOp,
        timeout: Option<f64>,
        now: Timestamp,
        label: String,
    ) {
        log_transition(Subsystem::Dome, self.state, state);
        info!(operation = %label, "dome operation started");
        self.state = state;
        self.op = op;
        self.timer = timer_started(now, timeout);
        self.target = Some(label);
        self.last_failure = None;
        self.axis.on_target_ticks = 0;
        self.axis.stall_ticks = 0;
    }

    // ─── Commands ───────────────────────────────────────────────────

    pub fn home(&mut self, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        self.check_free()?;
        self.auto = false;
        let run = HomingRun::enter(std::slice::from_mut(&mut self.axis), &[], ctx.hw, ctx.now)?;
        let timeout = self.config.timeouts.home;
        self.start(OperationState::Homing, DomeOp::Homing(run), Some(timeout), ctx.now, "home".into());
        Ok(Accepted::Operation)
    }

    pub fn limits_run(&mut self, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        self.check_free()?;
        self.auto = false;
        let run = LimitsRun::enter(std::slice::from_mut(&mut self.axis), &[], ctx.hw, ctx.now)?;
        let timeout = self.config.timeouts.limits;
        self.start(
            OperationState::FindingLimits,
            DomeOp::Limits(run),
            Some(timeout),
            ctx.now,
            "limits".into(),
        );
        Ok(Accepted::Operation)
    }

    /// Turn to an azimuth [rad] the short way round. Ends auto-follow.
    pub fn goto(&mut self, azimuth: f64, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        self.check_free()?;
        let goal = self.nearest(azimuth)?;
        self.auto = false;
        move_axis_to(&mut self.axis, ctx.hw, goal)?;
        let timeout = self.config.timeouts.slew;
        self.start(
            OperationState::Slewing,
            DomeOp::Goto { goal },
            Some(timeout),
            ctx.now,
            format!("az {:.2}", azimuth.to_degrees()),
        );
        Ok(Accepted::Operation)
    }

    /// Follow the mount. Replies once the slit has caught up.
    pub fn auto_follow(&mut self, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        self.check_free()?;
        self.auto = true;
        let timeout = self.config.timeouts.hunt;
        self.start(
            OperationState::Hunting,
            DomeOp::Follow {
                locked: false,
                commanded: None,
            },
            Some(timeout),
            ctx.now,
            "auto".into(),
        );
        Ok(Accepted::Operation)
    }

    /// Leave auto-follow and stand still.
    pub fn manual(&mut self, hw: &mut dyn HardwareBinding) -> Result<Accepted, ControlError> {
        self.auto = false;
        if !matches!(self.op, DomeOp::Power { .. }) {
            halt_axes(std::iter::once(&mut self.axis), hw)?;
            log_transition(Subsystem::Dome, self.state, OperationState::Idle);
            self.state = OperationState::Idle;
            self.op = DomeOp::None;
            self.target = None;
        }
        Ok(Accepted::Immediate("dome manual".into()))
    }

    /// Shutter asks for power. Returns true when this starts a new move,
    /// which pre-empts whatever the dome was doing.
    pub fn request_power(
        &mut self,
        power: &PowerPositionConfig,
        ctx: &mut TickContext<'_>,
    ) -> Result<bool, ControlError> {
        if matches!(self.op, DomeOp::Power { .. }) {
            return Ok(false);
        }
        let goal = self.nearest(power.azimuth)?;
        if !matches!(self.op, DomeOp::None) {
            halt_axes(std::iter::once(&mut self.axis), ctx.hw)?;
        }
        move_axis_to(&mut self.axis, ctx.hw, goal)?;
        let timeout = self.config.timeouts.slew;
        self.start(
            OperationState::Slewing,
            DomeOp::Power { goal },
            Some(timeout),
            ctx.now,
            "power position".into(),
        );
        Ok(true)
    }

    /// Shutter finished. Resume following if it was on.
    pub fn release_power(&mut self, ctx: &mut TickContext<'_>) {
        if !matches!(self.op, DomeOp::Power { .. }) {
            return;
        }
        if self.auto {
            let timeout = self.config.timeouts.hunt;
            self.start(
                OperationState::Hunting,
                DomeOp::Follow {
                    locked: false,
                    commanded: None,
                },
                Some(timeout),
                ctx.now,
                "auto".into(),
            );
        } else {
            log_transition(Subsystem::Dome, self.state, OperationState::Idle);
            self.state = OperationState::Idle;
            self.op = DomeOp::None;
            self.timer = SafetyTimer::unbounded(ctx.now);
        }
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// One tick. `pointing` is the mount's current pointing, used by
    /// auto-follow.
    pub fn advance(
        &mut self,
        ctx: &mut TickContext<'_>,
        pointing: &PointingTelemetry,
    ) -> Result<Transition, HardwareError> {
        if !self.state.is_active() {
            return Ok(Transition::Continue);
        }
        if timer_expired(&self.timer, ctx.now) {
            let elapsed = self.timer.elapsed(ctx.now);
            return self.abort(
                ctx.hw,
                ControlError::Timeout {
                    subsystem: Subsystem::Dome,
                    elapsed,
                },
            );
        }
        let check_switches = !matches!(self.op, DomeOp::Limits(_));
        if let Err(e) = supervise(std::iter::once(&mut self.axis), ctx, check_switches) {
            return self.abort(ctx.hw, e);
        }

        let mut op = std::mem::replace(&mut self.op, DomeOp::None);
        let result = self.poll(&mut op, ctx, pointing);
        self.op = op;
        match result {
            Ok(transition) => self.settle(transition, ctx),
            Err(ControlError::Hardware(e)) => Err(e),
            Err(e) => self.abort(ctx.hw, e),
        }
    }

    fn poll(
        &mut self,
        op: &mut DomeOp,
        ctx: &mut TickContext<'_>,
        pointing: &PointingTelemetry,
    ) -> Result<Transition, ControlError> {
        let axes = std::slice::from_mut(&mut self.axis);
        match op {
            DomeOp::None => Ok(Transition::Continue),
            DomeOp::Homing(run) => Ok(run.poll(axes, ctx.hw, ctx.now)?),
            DomeOp::Limits(run) => {
                let transition = run.poll(axes, ctx.hw, ctx.now)?;
                if matches!(transition, Transition::Done(_)) {
                    self.found.extend(run.found().iter().cloned());
                }
                Ok(transition)
            }
            DomeOp::Goto { goal } => {
                self.axis.target = Some(*goal);
                let step = self.axis.step_size();
                if self.axis.update_on_target(step) >= ctx.on_target_ticks && self.axis.at_rest() {
                    Ok(Transition::Done("dome on target".into()))
                } else {
                    Ok(Transition::Continue)
                }
            }
            DomeOp::Power { goal } => {
                self.axis.target = Some(*goal);
                if self.axis.at_rest() && self.timer.deadline.is_some() {
                    // Arrived; holding has no deadline.
                    self.timer = SafetyTimer::unbounded(ctx.now);
                    return Ok(Transition::Progress("dome at power position".into()));
                }
                Ok(Transition::Continue)
            }
            DomeOp::Follow { locked, commanded } => self.poll_follow(locked, commanded, ctx, pointing),
        }
    }

    fn poll_follow(
        &mut self,
        locked: &mut bool,
        commanded: &mut Option<f64>,
        ctx: &mut TickContext<'_>,
        pointing: &PointingTelemetry,
    ) -> Result<Transition, ControlError> {
        let desired = slit_azimuth(&self.config, pointing);
        let error = wrap_pi(desired - self.axis.position).abs();
        let tolerance = self.config.auto_follow_tolerance;
        let goal = self.nearest(desired)?;
        self.axis.target = Some(goal);

        if !*locked {
            let stale = commanded.is_none_or(|c| (c - goal).abs() > tolerance / 4.0);
            if error > tolerance / 2.0 && stale {
                move_axis_to(&mut self.axis, ctx.hw, goal)?;
                *commanded = Some(goal);
            }
            if self.axis.update_on_target(tolerance) >= ctx.on_target_ticks && self.axis.at_rest() {
                *locked = true;
                return Ok(Transition::Lock("dome following".into()));
            }
            return Ok(Transition::Continue);
        }
        // Hysteresis: start moving outside the tolerance, let the move
        // finish at the slit centre.
        if error > tolerance && self.axis.at_rest() {
            debug!(error, "dome catching up");
            move_axis_to(&mut self.axis, ctx.hw, goal)?;
            *commanded = Some(goal);
        }
        Ok(Transition::Continue)
    }

    fn settle(&mut self, transition: Transition, ctx: &mut TickContext<'_>) -> Result<Transition, HardwareError> {
        match &transition {
            Transition::Done(message) => {
                log_transition(Subsystem::Dome, self.state, OperationState::Idle);
                info!(%message, "dome operation complete");
                self.state = OperationState::Idle;
                self.op = DomeOp::None;
                self.timer = SafetyTimer::unbounded(ctx.now);
            }
            Transition::Lock(message) => {
                log_transition(Subsystem::Dome, self.state, OperationState::Tracking);
                info!(%message, "dome locked on slit");
                self.state = OperationState::Tracking;
                self.timer = SafetyTimer::unbounded(ctx.now);
            }
            Transition::Abort(e) => return self.abort(ctx.hw, e.clone()),
            Transition::Progress(message) => debug!(%message, "dome progress"),
            Transition::Unlock(_) | Transition::Continue => {}
        }
        Ok(transition)
    }

    fn abort(&mut self, hw: &mut dyn HardwareBinding, error: ControlError) -> Result<Transition, HardwareError> {
        warn!(state = %self.state, %error, "dome operation aborted");
        halt_axes(std::iter::once(&mut self.axis), hw)?;
        log_transition(Subsystem::Dome, self.state, OperationState::Stopped);
        self.state = OperationState::Stopped;
        self.op = DomeOp::None;
        self.auto = false;
        self.last_failure = Some(error.to_string());
        Ok(Transition::Abort(error))
    }
}

impl OperationStateMachine for DomeMachine {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Dome
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn axes(&self) -> &[Axis] {
        std::slice::from_ref(&self.axis)
    }

    fn axes_mut(&mut self) -> &mut [Axis] {
        std::slice::from_mut(&mut self.axis)
    }

    fn stop(&mut self, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
        halt_axes(std::iter::once(&mut self.axis), hw)?;
        let next = stopped_state(self.state);
        log_transition(Subsystem::Dome, self.state, next);
        self.state = next;
        self.op = DomeOp::None;
        self.auto = false;
        Ok(())
    }

    fn telemetry(&self, snapshot: &mut TelemetrySnapshot, on_target_ticks: u32) {
        publish_subsystem(
            snapshot,
            Subsystem::Dome,
            self.state,
            self.target.as_deref(),
            self.last_failure.as_deref(),
        );
        publish_axis(snapshot, &self.axis, on_target_ticks);
        snapshot.dome_auto = self.auto;
    }
}
