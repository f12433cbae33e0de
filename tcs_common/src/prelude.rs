//! Prelude module for common re-exports.
//!
//! ```rust
//! use tcs_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel};
pub use crate::control_unit::config::{AxisConfig, ObservatoryConfig};

// ─── State & Telemetry ──────────────────────────────────────────────
pub use crate::control_unit::state::{AxisId, OperationState, ResponseCode, Subsystem};
pub use crate::control_unit::telemetry::{AlertFlags, TelemetrySnapshot};

// ─── Collaborators ──────────────────────────────────────────────────
pub use crate::astro::{ApparentPlace, Ephemeris, EphemerisError, TargetObject};
pub use crate::hal::driver::{HardwareBinding, HardwareError};

// ─── Constants & Time ───────────────────────────────────────────────
pub use crate::consts::{CYCLE_TIME_MS, TWO_PI};
pub use crate::time::Timestamp;
