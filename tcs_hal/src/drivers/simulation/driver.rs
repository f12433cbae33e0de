//! `SimulationBinding` - `HardwareBinding` over the simulated models.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tcs_common::astro::coords::wrap_pi;
use tcs_common::control_unit::config::{ObservatoryConfig, PowerPositionConfig};
use tcs_common::control_unit::state::AxisId;
use tcs_common::consts::MAX_AXES;
use tcs_common::hal::driver::{HardwareBinding, HardwareError};
use tcs_common::hal::types::{ShutterDrive, ShutterSense, SwitchState};
use tracing::{debug, info, warn};

use super::axis::AxisSimulator;
use super::shutter::ShutterSimulator;

/// Shared simulator state. The binding and any [`SimHandle`] see the same
/// instance.
#[derive(Debug)]
struct SimState {
    axes: [Option<AxisSimulator>; MAX_AXES],
    initialized: [bool; MAX_AXES],
    shutter: ShutterSimulator,
    power_position: Option<PowerPositionConfig>,
    estop: bool,
    fault: bool,
    cycles: u64,
}

impl SimState {
    fn check_fault(&self) -> Result<(), HardwareError> {
        if self.fault {
            return Err(HardwareError::CommunicationError(
                "simulated transport fault".to_string(),
            ));
        }
        Ok(())
    }

    fn axis(&self, axis: AxisId) -> Result<&AxisSimulator, HardwareError> {
        self.check_fault()?;
        match self.axes[axis.index()] {
            Some(ref sim) if self.initialized[axis.index()] => Ok(sim),
            _ => Err(HardwareError::AxisUnavailable(axis)),
        }
    }

    fn axis_mut(&mut self, axis: AxisId) -> Result<&mut AxisSimulator, HardwareError> {
        self.check_fault()?;
        let ready = self.initialized[axis.index()];
        match self.axes[axis.index()] {
            Some(ref mut sim) if ready => Ok(sim),
            _ => Err(HardwareError::AxisUnavailable(axis)),
        }
    }

    fn shutter_powered(&self) -> bool {
        match (self.power_position, &self.axes[AxisId::DomeAz.index()]) {
            (Some(pp), Some(dome)) => wrap_pi(dome.user_angle() - pp.azimuth).abs() <= pp.tolerance,
            _ => true,
        }
    }

    fn halt_all(&mut self) {
        for sim in self.axes.iter_mut().flatten() {
            sim.halt();
        }
        self.shutter.halt();
    }
}

/// Software simulation of every configured axis, the shutter and the
/// e-stop line.
pub struct SimulationBinding {
    state: Arc<Mutex<SimState>>,
}

impl SimulationBinding {
    /// Build simulators for every axis present in `config`.
    pub fn new(config: &ObservatoryConfig) -> Self {
        let mut axes: [Option<AxisSimulator>; MAX_AXES] = Default::default();
        let mut place = |id: AxisId, cfg: Option<&tcs_common::control_unit::config::AxisConfig>| {
            if let Some(cfg) = cfg.filter(|c| c.present) {
                axes[id.index()] = Some(AxisSimulator::new(cfg));
            }
        };
        place(AxisId::MountX, Some(&config.mount.x));
        place(AxisId::MountY, Some(&config.mount.y));
        place(AxisId::MountR, config.mount.r.as_ref());
        place(AxisId::DomeAz, config.dome.as_ref().map(|d| &d.az));
        place(AxisId::Focus, config.focus.as_ref().map(|f| &f.axis));
        place(AxisId::Filter, config.filter.as_ref().map(|f| &f.axis));

        Self {
            state: Arc::new(Mutex::new(SimState {
                axes,
                initialized: [false; MAX_AXES],
                shutter: ShutterSimulator::default(),
                power_position: config.shutter.as_ref().and_then(|s| s.power_position),
                estop: false,
                fault: false,
                cycles: 0,
            })),
        }
    }

    /// Handle for inspecting and perturbing the simulation from tests.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl HardwareBinding for SimulationBinding {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn init(&mut self, axes: &[AxisId]) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        state.check_fault()?;
        for &axis in axes {
            if state.axes[axis.index()].is_none() {
                return Err(HardwareError::InitFailed(format!(
                    "axis {axis} has no simulator"
                )));
            }
            state.initialized[axis.index()] = true;
        }
        info!(axes = axes.len(), "simulation binding initialized");
        Ok(())
    }

    fn poll(&mut self, dt: Duration) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        state.check_fault()?;
        let dt = dt.as_secs_f64();
        if state.estop {
            state.halt_all();
        }
        for sim in state.axes.iter_mut().flatten() {
            sim.update(dt);
        }
        let powered = state.shutter_powered();
        state.shutter.update(dt, powered);
        state.cycles += 1;
        Ok(())
    }

    fn move_to(
        &mut self,
        axis: AxisId,
        raw_target: i64,
        raw_velocity: f64,
        raw_accel: f64,
    ) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        if state.estop {
            return Ok(());
        }
        state
            .axis_mut(axis)?
            .move_to(raw_target, raw_velocity, raw_accel);
        Ok(())
    }

    fn jog_at(
        &mut self,
        axis: AxisId,
        raw_velocity: f64,
        raw_accel: f64,
    ) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        if state.estop {
            return Ok(());
        }
        state.axis_mut(axis)?.jog_at(raw_velocity, raw_accel);
        Ok(())
    }

    fn stop(&mut self, axis: AxisId) -> Result<(), HardwareError> {
        self.state.lock().axis_mut(axis)?.stop();
        Ok(())
    }

    fn read_position(&mut self, axis: AxisId) -> Result<i64, HardwareError> {
        Ok(self.state.lock().axis(axis)?.read_position())
    }

    fn read_velocity(&mut self, axis: AxisId) -> Result<f64, HardwareError> {
        Ok(self.state.lock().axis(axis)?.read_velocity())
    }

    fn read_switches(&mut self, axis: AxisId) -> Result<SwitchState, HardwareError> {
        Ok(self.state.lock().axis(axis)?.read_switches())
    }

    fn set_position(&mut self, axis: AxisId, raw: i64) -> Result<(), HardwareError> {
        self.state.lock().axis_mut(axis)?.set_position(raw);
        debug!(%axis, raw, "simulated position redefined");
        Ok(())
    }

    fn shutter(&mut self, drive: ShutterDrive) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        state.check_fault()?;
        if state.estop && drive != ShutterDrive::Halt {
            return Ok(());
        }
        state.shutter.command(drive);
        Ok(())
    }

    fn read_shutter(&mut self) -> Result<ShutterSense, HardwareError> {
        let state = self.state.lock();
        state.check_fault()?;
        Ok(state.shutter.sense())
    }

    fn read_estop(&mut self) -> Result<bool, HardwareError> {
        let state = self.state.lock();
        state.check_fault()?;
        Ok(state.estop)
    }

    fn reset(&mut self) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        if state.fault {
            warn!("simulated transport fault cleared by reset");
        }
        state.fault = false;
        state.halt_all();
        state.initialized = [false; MAX_AXES];
        Ok(())
    }
}

/// Test-side view of a running [`SimulationBinding`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Assert or release the e-stop line.
    pub fn set_estop(&self, asserted: bool) {
        self.state.lock().estop = asserted;
    }

    /// Make every binding call fail until `reset()`.
    pub fn inject_fault(&self) {
        self.state.lock().fault = true;
    }

    /// Freeze or release an axis shaft.
    pub fn set_stalled(&self, axis: AxisId, stalled: bool) {
        if let Some(sim) = self.state.lock().axes[axis.index()].as_mut() {
            sim.set_stalled(stalled);
        }
    }

    /// Teleport an axis to a physical angle [rad].
    pub fn set_physical_angle(&self, axis: AxisId, angle: f64) {
        if let Some(sim) = self.state.lock().axes[axis.index()].as_mut() {
            sim.set_physical_angle(angle);
        }
    }

    /// Axis angle relative to its user origin [rad].
    pub fn user_angle(&self, axis: AxisId) -> Option<f64> {
        self.state.lock().axes[axis.index()]
            .as_ref()
            .map(|s| s.user_angle())
    }

    /// Axis angular velocity [rad/s].
    pub fn omega(&self, axis: AxisId) -> Option<f64> {
        self.state.lock().axes[axis.index()]
            .as_ref()
            .map(|s| s.omega())
    }

    /// Shutter open fraction.
    pub fn shutter_fraction(&self) -> f64 {
        self.state.lock().shutter.fraction()
    }

    /// Override the shutter travel time [s].
    pub fn set_shutter_travel(&self, secs: f64) {
        self.state.lock().shutter.set_travel_secs(secs);
    }

    /// Number of `poll()` calls so far.
    pub fn cycles(&self) -> u64 {
        self.state.lock().cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::tests::test_config;

    fn binding() -> (SimulationBinding, SimHandle) {
        let mut b = SimulationBinding::new(&test_config());
        b.init(&[AxisId::MountX, AxisId::MountY, AxisId::DomeAz])
            .unwrap();
        let h = b.handle();
        (b, h)
    }

    #[test]
    fn uninitialized_axis_unavailable() {
        let mut b = SimulationBinding::new(&test_config());
        assert!(matches!(
            b.read_position(AxisId::MountX),
            Err(HardwareError::AxisUnavailable(AxisId::MountX))
        ));
        assert!(b.init(&[AxisId::Focus]).is_err());
    }

    #[test]
    fn fault_until_reset() {
        let (mut b, h) = binding();
        h.inject_fault();
        assert!(b.read_estop().is_err());
        b.reset().unwrap();
        assert!(b.read_estop().is_ok());
        // reset requires re-init
        assert!(b.read_position(AxisId::MountX).is_err());
        b.init(&[AxisId::MountX]).unwrap();
        assert!(b.read_position(AxisId::MountX).is_ok());
    }

    #[test]
    fn estop_halts_motion() {
        let (mut b, h) = binding();
        b.jog_at(AxisId::MountX, 1000.0, 1.0e6).unwrap();
        b.poll(Duration::from_millis(100)).unwrap();
        assert!(h.omega(AxisId::MountX).unwrap() > 0.0);
        h.set_estop(true);
        b.poll(Duration::from_millis(100)).unwrap();
        assert_eq!(h.omega(AxisId::MountX), Some(0.0));
        assert!(b.read_estop().unwrap());
    }

    #[test]
    fn shutter_needs_power_position() {
        let (mut b, h) = binding();
        h.set_shutter_travel(1.0);
        h.set_physical_angle(AxisId::DomeAz, 1.0);
        b.shutter(ShutterDrive::Open).unwrap();
        for _ in 0..20 {
            b.poll(Duration::from_millis(100)).unwrap();
        }
        assert_eq!(h.shutter_fraction(), 0.0);

        h.set_physical_angle(AxisId::DomeAz, 0.01);
        for _ in 0..20 {
            b.poll(Duration::from_millis(100)).unwrap();
        }
        assert!(b.read_shutter().unwrap().open_limit);
    }
}
