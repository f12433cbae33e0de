//! Simulation binding.
//!
//! Deterministic software model of the observatory hardware. Physics only
//! advance inside `poll(dt)`, so tests drive time explicitly.

mod axis;
mod driver;
mod shutter;

pub use axis::{AxisSimulator, LIMIT_SWITCH_OVERTRAVEL, MotionMode};
pub use driver::{SimHandle, SimulationBinding};
pub use shutter::{SHUTTER_TRAVEL_SECS, ShutterSimulator};

use tcs_common::control_unit::config::ObservatoryConfig;
use tcs_common::hal::driver::HardwareBinding;

/// Factory function to create a simulation binding instance.
pub fn create_binding(config: &ObservatoryConfig) -> Box<dyn HardwareBinding> {
    Box::new(SimulationBinding::new(config))
}
