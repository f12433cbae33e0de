//! OperationStateMachine: one machine per subsystem.
//!
//! Each machine owns its axes exclusively. Operations are modelled as run
//! handles built by `enter` and advanced by `poll`; a machine's `advance`
//! first applies the safety checks (timer, stall, limit switches) and only
//! then the operation logic.

pub mod dome;
pub mod homing;
pub mod limits;
pub mod mount;
pub mod positioner;
pub mod shutter;
pub mod transition;

pub use dome::DomeMachine;
pub use homing::{HomingPhase, HomingRun, HomingSupervisor};
pub use limits::{FoundLimits, LimitsRun};
pub use mount::MountMachine;
pub use positioner::PositionerMachine;
pub use shutter::ShutterMachine;
pub use transition::{Accepted, Transition};

use tcs_common::control_unit::state::{AxisId, OperationState, Subsystem};
use tcs_common::control_unit::telemetry::TelemetrySnapshot;
use tcs_common::hal::driver::{HardwareBinding, HardwareError};
use tcs_common::time::Timestamp;

use tracing::info;

use crate::error::ControlError;
use crate::model::Axis;
use crate::safety::{StallMonitor, StallVerdict, check_limit_switches};

/// Everything a machine needs for one tick besides its own state.
pub struct TickContext<'a> {
    pub now: Timestamp,
    /// Tick period [s].
    pub dt: f64,
    pub hw: &'a mut dyn HardwareBinding,
    pub on_target_ticks: u32,
    pub stall: StallMonitor,
}

/// Behaviour shared by every subsystem machine.
///
/// Advancing is machine-specific (the dome follows the mount, the shutter
/// waits on the dome), so only the uniform parts live here.
pub trait OperationStateMachine {
    fn subsystem(&self) -> Subsystem;

    fn state(&self) -> OperationState;

    /// Axes owned by this machine.
    fn axes(&self) -> &[Axis];

    fn axes_mut(&mut self) -> &mut [Axis];

    fn axis_ids(&self) -> Vec<AxisId> {
        self.axes().iter().map(|a| a.id).collect()
    }

    /// Read position, velocity and switches of every axis once.
    fn readraw(&mut self, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
        for axis in self.axes_mut() {
            read_axis(axis, hw)?;
        }
        Ok(())
    }

    /// Operator stop. Harmless when nothing is running; targets are kept.
    fn stop(&mut self, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError>;

    /// Forced stop (e-stop, hardware fault). Halts and enters Stopped if
    /// an operation was active.
    fn halt(&mut self, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
        self.stop(hw)
    }

    /// Copy state into the telemetry snapshot.
    fn telemetry(&self, snapshot: &mut TelemetrySnapshot, on_target_ticks: u32);
}

/// Replace (or add) one axis entry of a snapshot.
pub(crate) fn publish_axis(snapshot: &mut TelemetrySnapshot, axis: &Axis, on_target_ticks: u32) {
    let entry = axis.telemetry(on_target_ticks);
    match snapshot.axis_mut(axis.id) {
        Some(slot) => *slot = entry,
        None => snapshot.axes.push(entry),
    }
}

/// Common subsystem fields of a snapshot.
pub(crate) fn publish_subsystem(
    snapshot: &mut TelemetrySnapshot,
    subsystem: Subsystem,
    state: OperationState,
    target: Option<&str>,
    last_failure: Option<&str>,
) {
    if let Some(entry) = snapshot.subsystem_mut(subsystem) {
        entry.state = state;
        entry.target = target.map(str::to_string);
        entry.last_failure = last_failure.map(str::to_string);
    }
}

/// Log a state change.
pub(crate) fn log_transition(subsystem: Subsystem, from: OperationState, to: OperationState) {
    if from != to {
        info!(%subsystem, %from, %to, "state transition");
    }
}

/// Read one axis from the hardware.
pub(crate) fn read_axis(
    axis: &mut Axis,
    hw: &mut dyn HardwareBinding,
) -> Result<(), HardwareError> {
    let raw = hw.read_position(axis.id)?;
    let velocity = hw.read_velocity(axis.id)?;
    let switches = hw.read_switches(axis.id)?;
    axis.apply_sample(raw, velocity, switches);
    Ok(())
}

/// Stall and limit-switch checks for axes under way.
///
/// The first failure wins; stall warnings are logged by the monitor.
pub(crate) fn supervise<'a>(
    axes: impl IntoIterator<Item = &'a mut Axis>,
    ctx: &TickContext<'_>,
    check_switches: bool,
) -> Result<(), ControlError> {
    for axis in axes {
        if let StallVerdict::Abort(stall) = ctx.stall.evaluate(axis, ctx.dt) {
            return Err(stall.into());
        }
        if check_switches {
            check_limit_switches(axis)?;
        }
    }
    Ok(())
}

/// Stop every axis and forget commanded velocity.
pub(crate) fn halt_axes<'a>(
    axes: impl IntoIterator<Item = &'a mut Axis>,
    hw: &mut dyn HardwareBinding,
) -> Result<(), HardwareError> {
    for axis in axes {
        hw.stop(axis.id)?;
        axis.last_commanded = 0.0;
        axis.on_target_ticks = 0;
    }
    Ok(())
}

/// State after a stop: active operations end in Stopped, rest states stay.
#[inline]
pub(crate) fn stopped_state(current: OperationState) -> OperationState {
    if current.is_active() {
        OperationState::Stopped
    } else {
        current
    }
}
