//! Hardware binding trait and error type.
//!
//! This module defines:
//! - `HardwareBinding` trait - primitive motor verbs in raw units
//! - `HardwareError` enum - failures reported by a binding
//! - `BindingFactory` type alias - constructor used by the binding registry

use crate::control_unit::config::ObservatoryConfig;
use crate::control_unit::state::AxisId;
use crate::hal::types::{ShutterDrive, ShutterSense, SwitchState};
use std::time::Duration;
use thiserror::Error;

/// Error types for hardware operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HardwareError {
    /// Binding initialization failed
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Transport-level failure
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),

    /// Axis not wired to this binding
    #[error("Axis not available: {0}")]
    AxisUnavailable(AxisId),

    /// Binding not registered
    #[error("Hardware driver not found: {0}")]
    DriverNotFound(String),

    /// Device reported a fault
    #[error("Device fault on {axis}: {reason}")]
    DeviceFault { axis: AxisId, reason: String },
}

/// Factory function type for creating binding instances.
pub type BindingFactory = fn(&ObservatoryConfig) -> Box<dyn HardwareBinding>;

/// Primitive motor interface in raw units (steps, steps/s, steps/s²).
///
/// Every call is synchronous and must return within a small bounded time;
/// the control loop never blocks on anything else.
///
/// # Lifecycle
///
/// 1. `init()` - once before the loop starts, and again after `reset()`
/// 2. `poll()` then reads and commands - every tick
/// 3. `stop()` on every axis at shutdown
pub trait HardwareBinding: Send {
    /// Binding identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    /// Prepare the listed axes.
    fn init(&mut self, axes: &[AxisId]) -> Result<(), HardwareError>;

    /// Refresh cached inputs once per tick.
    fn poll(&mut self, _dt: Duration) -> Result<(), HardwareError> {
        Ok(())
    }

    /// Move to an absolute raw position.
    fn move_to(
        &mut self,
        axis: AxisId,
        raw_target: i64,
        raw_velocity: f64,
        raw_accel: f64,
    ) -> Result<(), HardwareError>;

    /// Run at a signed raw velocity until told otherwise.
    fn jog_at(&mut self, axis: AxisId, raw_velocity: f64, raw_accel: f64)
    -> Result<(), HardwareError>;

    /// Decelerate to rest.
    fn stop(&mut self, axis: AxisId) -> Result<(), HardwareError>;

    /// Raw position (encoder counts when fitted, else motor steps).
    fn read_position(&mut self, axis: AxisId) -> Result<i64, HardwareError>;

    /// Raw velocity as reported by the controller [counts/s].
    fn read_velocity(&mut self, axis: AxisId) -> Result<f64, HardwareError>;

    fn read_switches(&mut self, axis: AxisId) -> Result<SwitchState, HardwareError>;

    /// Redefine the current raw position.
    fn set_position(&mut self, axis: AxisId, raw: i64) -> Result<(), HardwareError>;

    fn shutter(&mut self, drive: ShutterDrive) -> Result<(), HardwareError>;

    fn read_shutter(&mut self) -> Result<ShutterSense, HardwareError>;

    /// Emergency-stop line asserted.
    fn read_estop(&mut self) -> Result<bool, HardwareError>;

    /// Full controller reset; the caller re-runs `init()` afterwards.
    fn reset(&mut self) -> Result<(), HardwareError>;
}
