//! Mount state machine: x, y and the optional rotator.
//!
//! ```text
//! Idle/Stopped --home-->   Homing        --all homed-->   Idle
//! Idle/Stopped --limits--> FindingLimits --all found-->   Idle
//! Idle/Stopped --slew-->   Slewing       --on target-->   Idle
//! Idle/Stopped --track-->  Hunting       --locked-->      Tracking
//! Tracking     --lock lost-->  Hunting
//! Idle/Stopped --jog-->    Slewing (paddle) --jog 0, at rest--> Idle
//! any active   --stop | timeout | limit | stall-->  Stopped
//! ```
//!
//! A paddle jog during a slew, hunt or track is a nudge: it accumulates
//! raw-axis offsets on top of the running operation instead of replacing
//! it.

use tcs_common::astro::{Ephemeris, TargetObject};
use tcs_common::consts::MAX_MOUNT_AXES;
use tcs_common::control_unit::config::MountConfig;
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
use crate::model::{Axis, PointingMesh, TravelLimits};
use crate::planner::{
    AxisTargets, BlendMode, MotionPlanner, MountLimits, Offsets, advance, estimate_slew_time, halt,
};
use crate::safety::{SafetyTimer, check_and_wrap, timer_expired, timer_started};

// ─── Paddle ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogDirection {
    North,
    South,
    East,
    West,
}

/// One paddle button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddleJog {
    pub direction: JogDirection,
    pub fast: bool,
}

// ─── Operations ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum MountOp {
    None,
    Homing(HomingRun),
    Limits(LimitsRun),
    /// Fixed goal computed at entry; nudges are added every tick.
    Slew { targets: AxisTargets },
    /// Direct paddle drive [rad/s].
    Jog { x: f64, y: f64 },
    /// Paddle released; waiting for the axes to stand still.
    JogRelease,
    Hunt { object: TargetObject, first: bool },
    Track { object: TargetObject },
}

fn target_of(targets: &AxisTargets, axis: AxisId) -> Option<f64> {
    match axis {
        AxisId::MountX => Some(targets.x),
        AxisId::MountY => Some(targets.y),
        AxisId::MountR => targets.r,
        _ => None,
    }
}

fn nudge_of(offsets: &Offsets, axis: AxisId) -> f64 {
    match axis {
        AxisId::MountX => offsets.x,
        AxisId::MountY => offsets.y,
        AxisId::MountR => offsets.r,
        _ => 0.0,
    }
}

// ─── Machine ────────────────────────────────────────────────────────

pub struct MountMachine {
    config: MountConfig,
    planner: MotionPlanner,
    ephemeris: Box<dyn Ephemeris>,
    axes: heapless::Vec<Axis, MAX_MOUNT_AXES>,
    state: OperationState,
    op: MountOp,
    timer: SafetyTimer,
    offsets: Offsets,
    /// Paddle nudge rate (x, y) [rad/s] applied on top of the operation.
    nudge: Option<(f64, f64)>,
    target: Option<String>,
    last_failure: Option<String>,
    found: Vec<FoundLimits>,
}

impl MountMachine {
    pub fn new(
        config: &MountConfig,
        mesh: PointingMesh,
        ephemeris: Box<dyn Ephemeris>,
        now: Timestamp,
    ) -> Self {
        let mut axes = heapless::Vec::new();
        let fitted = [
            (AxisId::MountX, Some(&config.x)),
            (AxisId::MountY, Some(&config.y)),
            (AxisId::MountR, config.r.as_ref()),
        ];
        for (id, axis_config) in fitted {
            if let Some(cfg) = axis_config.filter(|c| c.present) {
                // Capacity covers x, y and r.
                let _ = axes.push(Axis::new(id, cfg.clone()));
            }
        }
        Self {
            config: config.clone(),
            planner: MotionPlanner::new(config, mesh),
            ephemeris,
            axes,
            state: OperationState::Idle,
            op: MountOp::None,
            timer: SafetyTimer::unbounded(now),
            offsets: Offsets::default(),
            nudge: None,
            target: None,
            last_failure: None,
            found: Vec::new(),
        }
    }

    pub fn axis(&self, id: AxisId) -> Option<&Axis> {
        self.axes.iter().find(|a| a.id == id)
    }

    pub fn axis_mut(&mut self, id: AxisId) -> Option<&mut Axis> {
        self.axes.iter_mut().find(|a| a.id == id)
    }

    pub fn offsets(&self) -> Offsets {
        self.offsets
    }

    /// Every fitted axis has been homed.
    pub fn homed(&self) -> bool {
        self.axes.iter().all(|a| a.homed)
    }

    /// Limits found by the last FindingLimits run, handed over once.
    pub fn take_found_limits(&mut self) -> Vec<FoundLimits> {
        std::mem::take(&mut self.found)
    }

    /// Where the mount points now, from axis feedback.
    pub fn pointing(&self) -> PointingTelemetry {
        let x = self.axis(AxisId::MountX).map_or(0.0, |a| a.position);
        let y = self.axis(AxisId::MountY).map_or(0.0, |a| a.position);
        self.planner.pointing(self.ephemeris.latitude(), x, y)
    }

    fn limits(&self) -> MountLimits {
        let of = |id: AxisId, fallback: &tcs_common::control_unit::config::AxisConfig| {
            self.axis(id)
                .map_or_else(|| TravelLimits::from_config(fallback), |a| a.limits)
        };
        MountLimits {
            x: of(AxisId::MountX, &self.config.x),
            y: of(AxisId::MountY, &self.config.y),
            r: self.axis(AxisId::MountR).map(|a| a.limits),
        }
    }

    fn check_axes(&self, which: &[AxisId]) -> Result<(), ControlError> {
        match which.iter().find(|id| self.axis(**id).is_none()) {
            Some(id) => Err(ControlError::rejected(format!("mount axis {id} not fitted"))),
            None => Ok(()),
        }
    }

    fn start(
        &mut self,
        state: OperationState,
        op: MountOp,
        timeout: Option<f64>,
        now: Timestamp,
        label: String,
    ) {
        log_transition(Subsystem::Mount, self.state, state);
        info!(operation = %label, "mount operation started");
        self.state = state;
        self.op = op;
        self.timer = timer_started(now, timeout);
        self.target = Some(label);
        self.last_failure = None;
        for axis in self.axes.iter_mut() {
            axis.on_target_ticks = 0;
            axis.stall_ticks = 0;
        }
    }

    // ─── Commands ───────────────────────────────────────────────────

    pub fn home(&mut self, which: &[AxisId], ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        self.check_axes(which)?;
        self.nudge = None;
        let run = HomingRun::enter(&mut self.axes, which, ctx.hw, ctx.now)?;
        let timeout = self.config.timeouts.home;
        self.start(OperationState::Homing, MountOp::Homing(run), Some(timeout), ctx.now, "home".into());
        Ok(Accepted::Operation)
    }

    pub fn limits_run(
        &mut self,
        which: &[AxisId],
        ctx: &mut TickContext<'_>,
    ) -> Result<Accepted, ControlError> {
        self.check_axes(which)?;
        self.nudge = None;
        let run = LimitsRun::enter(&mut self.axes, which, ctx.hw, ctx.now)?;
        let timeout = self.config.timeouts.limits;
        self.start(
            OperationState::FindingLimits,
            MountOp::Limits(run),
            Some(timeout),
            ctx.now,
            "limits".into(),
        );
        Ok(Accepted::Operation)
    }

    /// Go to a fixed place. The goal is computed once; a goal outside the
    /// travel limits is refused without disturbing the current state.
    pub fn slew(&mut self, object: TargetObject, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        let mut offsets = self.offsets;
        offsets.clear_nudges();
        let targets = self.planner.compute_axis_targets(
            &*self.ephemeris,
            &object,
            ctx.now,
            &offsets,
            &self.limits(),
        )?;
        self.offsets = offsets;
        self.nudge = None;
        for axis in self.axes.iter_mut() {
            axis.target = target_of(&targets, axis.id);
        }
        let timeout = self.config.timeouts.slew;
        self.start(
            OperationState::Slewing,
            MountOp::Slew { targets },
            Some(timeout),
            ctx.now,
            object.to_string(),
        );
        Ok(Accepted::Operation)
    }

    /// Follow a (possibly moving) object: hunt, then track.
    pub fn track(&mut self, object: TargetObject, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        let mut offsets = self.offsets;
        offsets.clear_nudges();
        self.planner.compute_axis_targets(
            &*self.ephemeris,
            &object,
            ctx.now,
            &offsets,
            &self.limits(),
        )?;
        self.offsets = offsets;
        self.nudge = None;
        let timeout = self.config.timeouts.hunt;
        self.start(
            OperationState::Hunting,
            MountOp::Hunt {
                object,
                first: true,
            },
            Some(timeout),
            ctx.now,
            object.to_string(),
        );
        Ok(Accepted::Operation)
    }

    /// Sky offsets [rad]; picked up by hunting/tracking on the next tick
    /// and by every later slew.
    pub fn offset(&mut self, ra: f64, dec: f64) -> Accepted {
        self.offsets.ra = ra;
        self.offsets.dec = dec;
        debug!(ra, dec, "sky offsets set");
        Accepted::Immediate(format!(
            "offset {:.2} {:.2} arcsec",
            ra.to_degrees() * 3600.0,
            dec.to_degrees() * 3600.0
        ))
    }

    fn jog_rate(&self, jog: PaddleJog) -> (f64, f64) {
        let speed = if jog.fast {
            self.config.jog_fast
        } else {
            self.config.jog_slow
        };
        match jog.direction {
            JogDirection::North => (0.0, speed),
            JogDirection::South => (0.0, -speed),
            JogDirection::East => (speed, 0.0),
            JogDirection::West => (-speed, 0.0),
        }
    }

    /// Paddle press (`Some`) or release (`None`).
    pub fn jog(&mut self, jog: Option<PaddleJog>, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        let following = matches!(
            self.op,
            MountOp::Slew { .. } | MountOp::Hunt { .. } | MountOp::Track { .. }
        );
        match jog {
            None if matches!(self.op, MountOp::Jog { .. }) => {
                halt_axes(self.axes.iter_mut(), ctx.hw)?;
                self.op = MountOp::JogRelease;
                Ok(Accepted::Operation)
            }
            None if self.nudge.is_some() => {
                self.nudge = None;
                Ok(Accepted::Immediate("nudge released".into()))
            }
            None => Ok(Accepted::Immediate("paddle released".into())),
            Some(jog) if following => {
                self.nudge = Some(self.jog_rate(jog));
                Ok(Accepted::Nudge)
            }
            Some(_) if matches!(self.op, MountOp::Homing(_) | MountOp::Limits(_)) => Err(
                ControlError::rejected(format!("mount busy: {}", self.state)),
            ),
            Some(jog) => {
                let (x, y) = self.jog_rate(jog);
                self.start(
                    OperationState::Slewing,
                    MountOp::Jog { x, y },
                    None,
                    ctx.now,
                    "paddle".into(),
                );
                for axis in self.axes.iter_mut() {
                    axis.target = None;
                }
                Ok(Accepted::Operation)
            }
        }
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// One tick: timer, stall and limit switches first, then the
    /// operation itself.
    pub fn advance(&mut self, ctx: &mut TickContext<'_>) -> Result<Transition, HardwareError> {
        if !self.state.is_active() {
            return Ok(Transition::Continue);
        }
        if timer_expired(&self.timer, ctx.now) {
            let elapsed = self.timer.elapsed(ctx.now);
            return self.abort(
                ctx.hw,
                ControlError::Timeout {
                    subsystem: Subsystem::Mount,
                    elapsed,
                },
            );
        }
        let check_switches = !matches!(self.op, MountOp::Limits(_));
        if let Err(e) = supervise(self.axes.iter_mut(), ctx, check_switches) {
            return self.abort(ctx.hw, e);
        }
        if let Some((vx, vy)) = self.nudge {
            self.offsets.x += vx * ctx.dt;
            self.offsets.y += vy * ctx.dt;
        }

        let mut op = std::mem::replace(&mut self.op, MountOp::None);
        let result = self.poll(&mut op, ctx);
        self.op = op;
        match result {
            Ok(transition) => self.settle(transition, ctx),
            Err(ControlError::Hardware(e)) => Err(e),
            Err(e) => self.abort(ctx.hw, e),
        }
    }

    fn poll(&mut self, op: &mut MountOp, ctx: &mut TickContext<'_>) -> Result<Transition, ControlError> {
        match op {
            MountOp::None => Ok(Transition::Continue),
            MountOp::Homing(run) => Ok(run.poll(&mut self.axes, ctx.hw, ctx.now)?),
            MountOp::Limits(run) => {
                let transition = run.poll(&mut self.axes, ctx.hw, ctx.now)?;
                if matches!(transition, Transition::Done(_)) {
                    self.found.extend(run.found().iter().cloned());
                }
                Ok(transition)
            }
            MountOp::Slew { targets } => self.poll_slew(targets, ctx),
            MountOp::Jog { x, y } => self.poll_jog(*x, *y, ctx),
            MountOp::JogRelease => {
                if self.axes.iter().all(Axis::at_rest) {
                    Ok(Transition::Done("paddle stopped".into()))
                } else {
                    Ok(Transition::Continue)
                }
            }
            MountOp::Hunt { object, first } => {
                let object = *object;
                let lead = std::mem::replace(first, false);
                let transition = self.poll_hunt(&object, lead, ctx)?;
                if matches!(transition, Transition::Lock(_)) {
                    *op = MountOp::Track { object };
                }
                Ok(transition)
            }
            MountOp::Track { object } => {
                let object = *object;
                let transition = self.poll_track(&object, ctx)?;
                if matches!(transition, Transition::Unlock(_)) {
                    *op = MountOp::Hunt {
                        object,
                        first: false,
                    };
                }
                Ok(transition)
            }
        }
    }

    fn poll_slew(&mut self, targets: &AxisTargets, ctx: &mut TickContext<'_>) -> Result<Transition, ControlError> {
        let mut arrived = true;
        for axis in self.axes.iter_mut() {
            let Some(base) = target_of(targets, axis.id) else {
                continue;
            };
            let goal = check_and_wrap(
                axis.id,
                axis.limits,
                base + nudge_of(&self.offsets, axis.id),
                false,
            )?;
            axis.target = Some(goal);
            advance(axis, ctx.hw, goal, goal, ctx.dt, BlendMode::Slew)?;
            if axis.update_on_target(axis.step_size()) < ctx.on_target_ticks {
                arrived = false;
            }
        }
        if arrived && self.nudge.is_none() {
            Ok(Transition::Done("slew complete".into()))
        } else {
            Ok(Transition::Continue)
        }
    }

    fn poll_jog(&mut self, x: f64, y: f64, ctx: &mut TickContext<'_>) -> Result<Transition, ControlError> {
        for axis in self.axes.iter_mut() {
            let rate = match axis.id {
                AxisId::MountX => x,
                AxisId::MountY => y,
                _ => 0.0,
            };
            if rate == 0.0 {
                if axis.last_commanded != 0.0 {
                    halt(axis, ctx.hw)?;
                }
                continue;
            }
            let next = axis.position + rate * ctx.dt;
            check_and_wrap(axis.id, axis.limits, next, false)?;
            advance(axis, ctx.hw, axis.position, next, ctx.dt, BlendMode::Slew)?;
        }
        Ok(Transition::Continue)
    }

    fn targets_at(&self, object: &TargetObject, t: Timestamp) -> Result<AxisTargets, ControlError> {
        self.planner
            .compute_axis_targets(&*self.ephemeris, object, t, &self.offsets, &self.limits())
    }

    fn poll_hunt(
        &mut self,
        object: &TargetObject,
        lead: bool,
        ctx: &mut TickContext<'_>,
    ) -> Result<Transition, ControlError> {
        let dt = ctx.dt;
        let now_targets = self.targets_at(object, ctx.now)?;
        let (drive_now, drive_next) = if lead {
            // Aim where the object will be when the mount can get there.
            let estimate = self
                .axes
                .iter()
                .filter_map(|a| target_of(&now_targets, a.id).map(|t| estimate_slew_time(a, t)))
                .fold(0.0, f64::max);
            let t_lead = ctx.now.add_secs(estimate.max(dt));
            debug!(estimate, "hunt leading the target");
            (
                self.targets_at(object, t_lead.add_secs(-dt))?,
                self.targets_at(object, t_lead)?,
            )
        } else {
            (now_targets, self.targets_at(object, ctx.now.add_secs(dt))?)
        };

        let mut locked = true;
        for axis in self.axes.iter_mut() {
            let (Some(goal), Some(tn), Some(tf)) = (
                target_of(&now_targets, axis.id),
                target_of(&drive_now, axis.id),
                target_of(&drive_next, axis.id),
            ) else {
                continue;
            };
            axis.target = Some(goal);
            advance(axis, ctx.hw, tn, tf, dt, BlendMode::Slew)?;
            let tolerance = self.config.tracking_tolerance(&axis.config);
            if axis.update_on_target(tolerance) < ctx.on_target_ticks {
                locked = false;
            }
        }
        if locked {
            Ok(Transition::Lock(format!(
                "tracking {}",
                self.target.as_deref().unwrap_or("target")
            )))
        } else {
            Ok(Transition::Continue)
        }
    }

    fn poll_track(&mut self, object: &TargetObject, ctx: &mut TickContext<'_>) -> Result<Transition, ControlError> {
        let dt = ctx.dt;
        let now_targets = self.targets_at(object, ctx.now)?;
        let next_targets = self.targets_at(object, ctx.now.add_secs(dt))?;
        let mut lost = None;
        for axis in self.axes.iter_mut() {
            let (Some(tn), Some(tf)) = (
                target_of(&now_targets, axis.id),
                target_of(&next_targets, axis.id),
            ) else {
                continue;
            };
            axis.target = Some(tn);
            let tolerance = self.config.tracking_tolerance(&axis.config);
            if axis.update_on_target(tolerance) == 0 && lost.is_none() {
                lost = Some(axis.id);
            }
            advance(axis, ctx.hw, tn, tf, dt, BlendMode::Track)?;
        }
        match lost {
            Some(id) => Ok(Transition::Unlock(format!("axis {id} lost lock"))),
            None => Ok(Transition::Continue),
        }
    }

    fn settle(&mut self, transition: Transition, ctx: &mut TickContext<'_>) -> Result<Transition, HardwareError> {
        match &transition {
            Transition::Done(message) => {
                log_transition(Subsystem::Mount, self.state, OperationState::Idle);
                info!(%message, "mount operation complete");
                self.state = OperationState::Idle;
                self.op = MountOp::None;
                self.timer = SafetyTimer::unbounded(ctx.now);
            }
            Transition::Lock(message) => {
                log_transition(Subsystem::Mount, self.state, OperationState::Tracking);
                info!(%message, "mount locked on target");
                self.state = OperationState::Tracking;
                self.timer = SafetyTimer::unbounded(ctx.now);
            }
            Transition::Unlock(message) => {
                log_transition(Subsystem::Mount, self.state, OperationState::Hunting);
                warn!(%message, "mount hunting again");
                self.state = OperationState::Hunting;
                self.timer = timer_started(ctx.now, Some(self.config.timeouts.hunt));
                for axis in self.axes.iter_mut() {
                    axis.on_target_ticks = 0;
                }
            }
            Transition::Abort(e) => return self.abort(ctx.hw, e.clone()),
            Transition::Progress(message) => debug!(%message, "mount progress"),
            Transition::Continue => {}
        }
        Ok(transition)
    }

    fn abort(&mut self, hw: &mut dyn HardwareBinding, error: ControlError) -> Result<Transition, HardwareError> {
        warn!(state = %self.state, %error, "mount operation aborted");
        halt_axes(self.axes.iter_mut(), hw)?;
        log_transition(Subsystem::Mount, self.state, OperationState::Stopped);
        self.state = OperationState::Stopped;
        self.op = MountOp::None;
        self.nudge = None;
        self.last_failure = Some(error.to_string());
        Ok(Transition::Abort(error))
    }
}

impl OperationStateMachine for MountMachine {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Mount
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn axes(&self) -> &[Axis] {
        &self.axes
    }

    fn axes_mut(&mut self) -> &mut [Axis] {
        &mut self.axes
    }

    fn stop(&mut self, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
        halt_axes(self.axes.iter_mut(), hw)?;
        let next = stopped_state(self.state);
        log_transition(Subsystem::Mount, self.state, next);
        self.state = next;
        self.op = MountOp::None;
        self.nudge = None;
        Ok(())
    }

    fn telemetry(&self, snapshot: &mut TelemetrySnapshot, on_target_ticks: u32) {
        publish_subsystem(
            snapshot,
            Subsystem::Mount,
            self.state,
            self.target.as_deref(),
            self.last_failure.as_deref(),
        );
        for axis in self.axes.iter() {
            publish_axis(snapshot, axis, on_target_ticks);
        }
        snapshot.offsets = self.offsets.telemetry();
        snapshot.pointing = self.pointing();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::StallMonitor;
    use crate::state::tests::{at, rig};
    use std::time::Duration;
    use tcs_common::astro::SiteEphemeris;
    use tcs_hal::{SimHandle, SimulationBinding};

    struct Bench {
        mount: MountMachine,
        hw: SimulationBinding,
        handle: SimHandle,
        on_target_ticks: u32,
        stall: StallMonitor,
        tick: usize,
    }

    impl Bench {
        fn new() -> Self {
            let (config, mut hw, handle) = rig();
            let mut mount = MountMachine::new(
                &config.mount,
                PointingMesh::empty(),
                Box::new(SiteEphemeris::new(&config.site)),
                at(0),
            );
            mount.readraw(&mut hw).unwrap();
            Self {
                mount,
                hw,
                handle,
                on_target_ticks: config.cycle.on_target_ticks,
                stall: StallMonitor::new(config.cycle.stall_ticks),
                tick: 0,
            }
        }

        /// Run `f` against the machine with a context for the current tick.
        fn with<R>(&mut self, f: impl FnOnce(&mut MountMachine, &mut TickContext<'_>) -> R) -> R {
            let mut ctx = TickContext {
                now: at(self.tick),
                dt: 0.1,
                hw: &mut self.hw,
                on_target_ticks: self.on_target_ticks,
                stall: self.stall,
            };
            f(&mut self.mount, &mut ctx)
        }

        fn tick(&mut self) -> Transition {
            self.tick += 1;
            self.hw.poll(Duration::from_millis(100)).unwrap();
            self.mount.readraw(&mut self.hw).unwrap();
            self.with(|m, ctx| m.advance(ctx)).unwrap()
        }

        fn run_until(&mut self, max: usize, stop: impl Fn(&Transition) -> bool) -> Option<Transition> {
            for _ in 0..max {
                let t = self.tick();
                if stop(&t) {
                    return Some(t);
                }
            }
            None
        }
    }

    fn hadec(ha_h: f64, dec_deg: f64) -> TargetObject {
        TargetObject::HourAngle {
            ha: (ha_h * 15.0).to_radians(),
            dec: dec_deg.to_radians(),
        }
    }

    #[test]
    fn slew_reaches_fixed_target() {
        let mut b = Bench::new();
        let accepted = b.with(|m, ctx| m.slew(hadec(-0.2, 35.0), ctx)).unwrap();
        assert_eq!(accepted, Accepted::Operation);
        assert_eq!(b.mount.state(), OperationState::Slewing);
        let done = b.run_until(600, Transition::is_terminal).unwrap();
        assert!(matches!(done, Transition::Done(_)));
        assert_eq!(b.mount.state(), OperationState::Idle);
        let x = b.mount.axis(AxisId::MountX).unwrap();
        // x = -HA
        assert!((x.position - (0.2f64 * 15.0).to_radians()).abs() < 2.0 * x.step_size());
    }

    #[test]
    fn slew_outside_limits_is_refused_without_state_change() {
        let mut b = Bench::new();
        b.mount.axis_mut(AxisId::MountY).unwrap().limits = TravelLimits { neg: -0.5, pos: 0.5 };
        let err = b.with(|m, ctx| m.slew(hadec(0.0, 60.0), ctx)).unwrap_err();
        assert_eq!(err.response_code().code(), -3);
        assert_eq!(b.mount.state(), OperationState::Idle);
    }

    #[test]
    fn stop_is_idempotent_and_keeps_targets() {
        let mut b = Bench::new();
        b.mount.stop(&mut b.hw).unwrap();
        assert_eq!(b.mount.state(), OperationState::Idle);

        b.with(|m, ctx| m.slew(hadec(-0.5, 20.0), ctx)).unwrap();
        b.tick();
        let target = b.mount.axis(AxisId::MountX).unwrap().target;
        b.mount.stop(&mut b.hw).unwrap();
        assert_eq!(b.mount.state(), OperationState::Stopped);
        b.mount.stop(&mut b.hw).unwrap();
        assert_eq!(b.mount.state(), OperationState::Stopped);
        assert_eq!(b.mount.axis(AxisId::MountX).unwrap().target, target);
    }

    #[test]
    fn track_hunts_then_locks() {
        let mut b = Bench::new();
        // An object on the meridian now, drifting west at sidereal rate.
        let lst = tcs_common::astro::sidereal::lst(at(0), 0.0);
        let object = TargetObject::Equatorial {
            ra: lst + 0.05,
            dec: 0.4,
        };
        b.with(|m, ctx| m.track(object, ctx)).unwrap();
        assert_eq!(b.mount.state(), OperationState::Hunting);
        let lock = b.run_until(900, |t| t.is_terminal()).unwrap();
        assert!(matches!(lock, Transition::Lock(_)), "{lock:?}");
        assert_eq!(b.mount.state(), OperationState::Tracking);

        // Tracking has no timeout.
        for _ in 0..200 {
            let t = b.tick();
            assert!(!matches!(t, Transition::Abort(_)));
        }
    }

    #[test]
    fn perturbed_tracking_reverts_to_hunting_and_relocks() {
        let mut b = Bench::new();
        let lst = tcs_common::astro::sidereal::lst(at(0), 0.0);
        let object = TargetObject::Equatorial { ra: lst, dec: 0.3 };
        b.with(|m, ctx| m.track(object, ctx)).unwrap();
        b.run_until(900, |t| matches!(t, Transition::Lock(_))).unwrap();

        let x = b.handle.user_angle(AxisId::MountX).unwrap();
        b.handle.set_physical_angle(AxisId::MountX, x + 0.01);
        let unlock = b.tick();
        assert!(matches!(unlock, Transition::Unlock(_)), "{unlock:?}");
        assert_eq!(b.mount.state(), OperationState::Hunting);
        let relock = b.run_until(600, |t| matches!(t, Transition::Lock(_)));
        assert!(relock.is_some());
        assert_eq!(b.mount.state(), OperationState::Tracking);
    }

    #[test]
    fn paddle_jog_drives_and_releases() {
        let mut b = Bench::new();
        let jog = PaddleJog {
            direction: JogDirection::North,
            fast: true,
        };
        assert_eq!(b.with(|m, ctx| m.jog(Some(jog), ctx)).unwrap(), Accepted::Operation);
        assert_eq!(b.mount.state(), OperationState::Slewing);
        for _ in 0..20 {
            b.tick();
        }
        let y = b.mount.axis(AxisId::MountY).unwrap().position;
        assert!(y > 0.01);
        assert_eq!(b.with(|m, ctx| m.jog(None, ctx)).unwrap(), Accepted::Operation);
        let done = b.run_until(100, Transition::is_terminal).unwrap();
        assert!(matches!(done, Transition::Done(_)));
        assert_eq!(b.mount.state(), OperationState::Idle);
    }

    #[test]
    fn jog_during_slew_is_a_nudge() {
        let mut b = Bench::new();
        b.with(|m, ctx| m.slew(hadec(-0.1, 30.0), ctx)).unwrap();
        let jog = PaddleJog {
            direction: JogDirection::East,
            fast: false,
        };
        assert_eq!(b.with(|m, ctx| m.jog(Some(jog), ctx)).unwrap(), Accepted::Nudge);
        for _ in 0..10 {
            b.tick();
        }
        assert!(b.mount.offsets().x > 0.0);
        assert_eq!(b.mount.state(), OperationState::Slewing);
        assert!(matches!(
            b.with(|m, ctx| m.jog(None, ctx)).unwrap(),
            Accepted::Immediate(_)
        ));
    }

    #[test]
    fn stall_aborts_slew() {
        let mut b = Bench::new();
        b.with(|m, ctx| m.slew(hadec(-1.0, 30.0), ctx)).unwrap();
        for _ in 0..10 {
            b.tick();
        }
        b.handle.set_stalled(AxisId::MountX, true);
        let abort = b.run_until(20, Transition::is_terminal).unwrap();
        match abort {
            Transition::Abort(e) => assert_eq!(e.response_code().code(), -4),
            other => panic!("expected stall abort, got {other:?}"),
        }
        assert_eq!(b.mount.state(), OperationState::Stopped);
    }

    #[test]
    fn stall_during_homing_stops_every_axis() {
        let mut b = Bench::new();
        b.handle.set_physical_angle(AxisId::MountX, -0.3);
        b.handle.set_physical_angle(AxisId::MountY, -0.3);
        b.tick();
        b.with(|m, ctx| m.home(&[], ctx)).unwrap();
        for _ in 0..5 {
            assert_eq!(b.tick(), Transition::Continue);
        }
        assert_eq!(b.mount.state(), OperationState::Homing);

        b.handle.set_stalled(AxisId::MountY, true);
        let abort = b.run_until(20, Transition::is_terminal).unwrap();
        match abort {
            Transition::Abort(e) => assert_eq!(e.response_code().code(), -4),
            other => panic!("expected stall abort, got {other:?}"),
        }
        assert_eq!(b.mount.state(), OperationState::Stopped);
        // The healthy axis is stopped too and neither counts as homed.
        for axis in b.mount.axes() {
            assert_eq!(axis.last_commanded, 0.0, "axis {}", axis.id);
            assert!(!axis.homed, "axis {}", axis.id);
        }
    }

    #[test]
    fn slew_times_out() {
        let mut b = Bench::new();
        b.mount.config.timeouts.slew = 0.5;
        b.with(|m, ctx| m.slew(hadec(-2.0, 10.0), ctx)).unwrap();
        let abort = b.run_until(20, Transition::is_terminal).unwrap();
        match abort {
            Transition::Abort(e) => assert_eq!(e.response_code().code(), -5),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn homing_the_mount() {
        let mut b = Bench::new();
        b.handle.set_physical_angle(AxisId::MountX, -0.02);
        b.handle.set_physical_angle(AxisId::MountY, -0.02);
        b.with(|m, ctx| m.home(&[], ctx)).unwrap();
        assert_eq!(b.mount.state(), OperationState::Homing);
        let done = b.run_until(800, |t| t.is_terminal()).unwrap();
        assert!(matches!(done, Transition::Done(_)));
        assert!(b.mount.homed());
        assert!(b.with(|m, ctx| m.home(&[AxisId::MountR], ctx)).is_err());
    }
}
