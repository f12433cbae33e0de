//! Single-axis positioners: the focuser and the filter wheel.
//!
//! Both run Homing, FindingLimits and a point-to-point move (Slewing).
//! Focus moves are relative, in microns, and never wrap. Filter moves go
//! to a named slot the short way round.

use tcs_common::astro::coords::wrap_pi;
use tcs_common::control_unit::config::{FilterConfig, FilterSlot, FocusConfig, OperationTimeouts};
use tcs_common::control_unit::state::{AxisId, OperationState, Subsystem};
use tcs_common::control_unit::telemetry::TelemetrySnapshot;
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
enum Kind {
    Focus { microns_per_rev: f64 },
    Filter { slots: Vec<FilterSlot> },
}

#[derive(Debug, Clone)]
enum PositionerOp {
    None,
    Homing(HomingRun),
    Limits(LimitsRun),
    Move { slot: Option<String> },
}

pub struct PositionerMachine {
    subsystem: Subsystem,
    kind: Kind,
    axis: Axis,
    timeouts: OperationTimeouts,
    state: OperationState,
    op: PositionerOp,
    timer: SafetyTimer,
    /// Filter in the beam, once a slot move has completed.
    slot: Option<String>,
    target: Option<String>,
    last_failure: Option<String>,
    found: Vec<FoundLimits>,
}

impl PositionerMachine {
    pub fn focus(config: &FocusConfig, now: Timestamp) -> Self {
        Self::new(
            Subsystem::Focus,
            Kind::Focus {
                microns_per_rev: config.microns_per_rev,
            },
            Axis::new(AxisId::Focus, config.axis.clone()),
            config.timeouts,
            now,
        )
    }

    pub fn filter(config: &FilterConfig, now: Timestamp) -> Self {
        Self::new(
            Subsystem::Filter,
            Kind::Filter {
                slots: config.slots.clone(),
            },
            Axis::new(AxisId::Filter, config.axis.clone()),
            config.timeouts,
            now,
        )
    }

    fn new(subsystem: Subsystem, kind: Kind, axis: Axis, timeouts: OperationTimeouts, now: Timestamp) -> Self {
        Self {
            subsystem,
            kind,
            axis,
            timeouts,
            state: OperationState::Idle,
            op: PositionerOp::None,
            timer: SafetyTimer::unbounded(now),
            slot: None,
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

    /// Name of the filter in the beam.
    pub fn slot(&self) -> Option<&str> {
        self.slot.as_deref()
    }

    pub fn take_found_limits(&mut self) -> Vec<FoundLimits> {
        std::mem::take(&mut self.found)
    }

    fn start(&mut self, state: OperationState, op: PositionerOp, timeout: f64, now: Timestamp, label: String) {
        log_transition(self.subsystem, self.state, state);
        info!(subsystem = %self.subsystem, operation = %label, "operation started");
        self.state = state;
        self.op = op;
        self.timer = timer_started(now, Some(timeout));
        self.target = Some(label);
        self.last_failure = None;
        self.axis.on_target_ticks = 0;
        self.axis.stall_ticks = 0;
    }

    // ─── Commands ───────────────────────────────────────────────────

    pub fn home(&mut self, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        let run = HomingRun::enter(std::slice::from_mut(&mut self.axis), &[], ctx.hw, ctx.now)?;
        self.slot = None;
        let timeout = self.timeouts.home;
        self.start(OperationState::Homing, PositionerOp::Homing(run), timeout, ctx.now, "home".into());
        Ok(Accepted::Operation)
    }

    pub fn limits_run(&mut self, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        let run = LimitsRun::enter(std::slice::from_mut(&mut self.axis), &[], ctx.hw, ctx.now)?;
        self.slot = None;
        let timeout = self.timeouts.limits;
        self.start(
            OperationState::FindingLimits,
            PositionerOp::Limits(run),
            timeout,
            ctx.now,
            "limits".into(),
        );
        Ok(Accepted::Operation)
    }

    /// Move the focuser by `microns` from where it is now.
    pub fn focus_by(&mut self, microns: f64, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        let Kind::Focus { microns_per_rev } = self.kind else {
            return Err(ControlError::rejected("not a focuser"));
        };
        let delta = microns / microns_per_rev * std::f64::consts::TAU;
        let goal = check_and_wrap(self.axis.id, self.axis.limits, self.axis.position + delta, false)?;
        self.move_to(goal, None, format!("focus {microns:+.1}um"), ctx)
    }

    /// Bring a named filter into the beam.
    pub fn select_filter(&mut self, name: &str, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        let Kind::Filter { slots } = &self.kind else {
            return Err(ControlError::rejected("not a filter wheel"));
        };
        let Some(slot) = slots.iter().find(|s| s.name.eq_ignore_ascii_case(name)) else {
            return Err(ControlError::rejected(format!("unknown filter {name}")));
        };
        let name = slot.name.clone();
        let nearest = self.axis.position + wrap_pi(slot.position - self.axis.position);
        let goal = check_and_wrap(self.axis.id, self.axis.limits, nearest, true)?;
        self.slot = None;
        self.move_to(goal, Some(name.clone()), format!("filter {name}"), ctx)
    }

    fn move_to(
        &mut self,
        goal: f64,
        slot: Option<String>,
        label: String,
        ctx: &mut TickContext<'_>,
    ) -> Result<Accepted, ControlError> {
        move_axis_to(&mut self.axis, ctx.hw, goal)?;
        let timeout = self.timeouts.slew;
        self.start(OperationState::Slewing, PositionerOp::Move { slot }, timeout, ctx.now, label);
        Ok(Accepted::Operation)
    }

    // ─── Tick ───────────────────────────────────────────────────────

    pub fn advance(&mut self, ctx: &mut TickContext<'_>) -> Result<Transition, HardwareError> {
        if !self.state.is_active() {
            return Ok(Transition::Continue);
        }
        if timer_expired(&self.timer, ctx.now) {
            let elapsed = self.timer.elapsed(ctx.now);
            let subsystem = self.subsystem;
            return self.abort(ctx.hw, ControlError::Timeout { subsystem, elapsed });
        }
        let check_switches = !matches!(self.op, PositionerOp::Limits(_));
        if let Err(e) = supervise(std::iter::once(&mut self.axis), ctx, check_switches) {
            return self.abort(ctx.hw, e);
        }

        let axes = std::slice::from_mut(&mut self.axis);
        let result: Result<Transition, ControlError> = match &mut self.op {
            PositionerOp::None => Ok(Transition::Continue),
            PositionerOp::Homing(run) => run.poll(axes, ctx.hw, ctx.now).map_err(Into::into),
            PositionerOp::Limits(run) => match run.poll(axes, ctx.hw, ctx.now) {
                Ok(transition) => {
                    if matches!(transition, Transition::Done(_)) {
                        self.found.extend(run.found().iter().cloned());
                    }
                    Ok(transition)
                }
                Err(e) => Err(e.into()),
            },
            PositionerOp::Move { slot } => {
                let step = self.axis.step_size();
                if self.axis.update_on_target(step) >= ctx.on_target_ticks && self.axis.at_rest() {
                    self.slot = slot.take();
                    Ok(Transition::Done(format!(
                        "{} at {}",
                        self.subsystem,
                        self.target.as_deref().unwrap_or("target")
                    )))
                } else {
                    Ok(Transition::Continue)
                }
            }
        };
        match result {
            Ok(Transition::Abort(e)) => self.abort(ctx.hw, e),
            Err(ControlError::Hardware(e)) => Err(e),
            Err(e) => self.abort(ctx.hw, e),
            Ok(transition) => {
                match &transition {
                    Transition::Done(message) => {
                        log_transition(self.subsystem, self.state, OperationState::Idle);
                        info!(subsystem = %self.subsystem, %message, "operation complete");
                        self.state = OperationState::Idle;
                        self.op = PositionerOp::None;
                        self.timer = SafetyTimer::unbounded(ctx.now);
                    }
                    Transition::Progress(message) => debug!(subsystem = %self.subsystem, %message, "progress"),
                    _ => {}
                }
                Ok(transition)
            }
        }
    }

    fn abort(&mut self, hw: &mut dyn HardwareBinding, error: ControlError) -> Result<Transition, HardwareError> {
        warn!(subsystem = %self.subsystem, state = %self.state, %error, "operation aborted");
        halt_axes(std::iter::once(&mut self.axis), hw)?;
        log_transition(self.subsystem, self.state, OperationState::Stopped);
        self.state = OperationState::Stopped;
        self.op = PositionerOp::None;
        self.last_failure = Some(error.to_string());
        Ok(Transition::Abort(error))
    }
}

impl OperationStateMachine for PositionerMachine {
    fn subsystem(&self) -> Subsystem {
        self.subsystem
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
        log_transition(self.subsystem, self.state, next);
        self.state = next;
        self.op = PositionerOp::None;
        Ok(())
    }

    fn telemetry(&self, snapshot: &mut TelemetrySnapshot, on_target_ticks: u32) {
        publish_subsystem(
            snapshot,
            self.subsystem,
            self.state,
            self.target.as_deref(),
            self.last_failure.as_deref(),
        );
        publish_axis(snapshot, &self.axis, on_target_ticks);
        if let Kind::Filter { .. } = self.kind {
            snapshot.filter = self.slot.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::StallMonitor;
    use crate::state::tests::{at, rig};
    use std::time::Duration;
    use tcs_hal::{SimHandle, SimulationBinding};

    struct Bench {
        machine: PositionerMachine,
        hw: SimulationBinding,
        handle: SimHandle,
        tick: usize,
    }

    impl Bench {
        fn focus() -> Self {
            let (config, hw, handle) = rig();
            let machine = PositionerMachine::focus(config.focus.as_ref().unwrap(), at(0));
            Self::with_machine(machine, hw, handle)
        }

        fn filter() -> Self {
            let (config, hw, handle) = rig();
            let machine = PositionerMachine::filter(config.filter.as_ref().unwrap(), at(0));
            Self::with_machine(machine, hw, handle)
        }

        fn with_machine(mut machine: PositionerMachine, mut hw: SimulationBinding, handle: SimHandle) -> Self {
            machine.readraw(&mut hw).unwrap();
            Self {
                machine,
                hw,
                handle,
                tick: 0,
            }
        }

        fn with<R>(&mut self, f: impl FnOnce(&mut PositionerMachine, &mut TickContext<'_>) -> R) -> R {
            let mut ctx = TickContext {
                now: at(self.tick),
                dt: 0.1,
                hw: &mut self.hw,
                on_target_ticks: 3,
                stall: StallMonitor::new(3),
            };
            f(&mut self.machine, &mut ctx)
        }

        fn run(&mut self, max: usize) -> Option<Transition> {
            for _ in 0..max {
                self.tick += 1;
                self.hw.poll(Duration::from_millis(100)).unwrap();
                self.machine.readraw(&mut self.hw).unwrap();
                let t = self.with(|m, ctx| m.advance(ctx)).unwrap();
                if t.is_terminal() {
                    return Some(t);
                }
            }
            None
        }
    }

    #[test]
    fn focus_moves_relative_microns() {
        let mut b = Bench::focus();
        b.with(|m, ctx| m.focus_by(250.0, ctx)).unwrap();
        assert_eq!(b.machine.state(), OperationState::Slewing);
        assert!(matches!(b.run(200), Some(Transition::Done(_))));
        let half_turn = std::f64::consts::PI;
        assert!((b.machine.axis().position - half_turn).abs() < 2.0 * b.machine.axis().step_size());

        b.with(|m, ctx| m.focus_by(-500.0, ctx)).unwrap();
        assert!(matches!(b.run(200), Some(Transition::Done(_))));
        assert!((b.machine.axis().position + half_turn).abs() < 2.0 * b.machine.axis().step_size());
    }

    #[test]
    fn focus_beyond_travel_is_refused() {
        let mut b = Bench::focus();
        let err = b.with(|m, ctx| m.focus_by(10_000.0, ctx)).unwrap_err();
        assert_eq!(err.response_code().code(), -3);
        assert_eq!(b.machine.state(), OperationState::Idle);
    }

    #[test]
    fn filter_selects_slot_by_name() {
        let mut b = Bench::filter();
        b.with(|m, ctx| m.select_filter("v", ctx)).unwrap();
        assert!(b.machine.slot().is_none());
        assert!(matches!(b.run(200), Some(Transition::Done(_))));
        assert_eq!(b.machine.slot(), Some("V"));
        assert!((b.machine.axis().position - 1.5).abs() < 2.0 * b.machine.axis().step_size());

        let mut snapshot = TelemetrySnapshot::default();
        b.machine.telemetry(&mut snapshot, 3);
        assert_eq!(snapshot.filter.as_deref(), Some("V"));
        assert_eq!(snapshot.state(Subsystem::Filter), OperationState::Idle);
    }

    #[test]
    fn unknown_filter_and_wrong_kind_are_rejected() {
        let mut b = Bench::filter();
        let err = b.with(|m, ctx| m.select_filter("Halpha", ctx)).unwrap_err();
        assert_eq!(err.response_code().code(), -2);
        let err = b.with(|m, ctx| m.focus_by(10.0, ctx)).unwrap_err();
        assert_eq!(err.response_code().code(), -2);
    }

    #[test]
    fn stalled_focuser_aborts() {
        let mut b = Bench::focus();
        b.with(|m, ctx| m.focus_by(2000.0, ctx)).unwrap();
        b.run(5);
        b.handle.set_stalled(AxisId::Focus, true);
        match b.run(20) {
            Some(Transition::Abort(e)) => assert_eq!(e.response_code().code(), -4),
            other => panic!("expected stall, got {other:?}"),
        }
        assert_eq!(b.machine.state(), OperationState::Stopped);
    }

    #[test]
    fn focuser_homes() {
        let mut b = Bench::focus();
        b.with(|m, ctx| m.home(ctx)).unwrap();
        assert!(matches!(b.run(600), Some(Transition::Done(_))));
        assert!(b.machine.axis().homed);
    }
}
