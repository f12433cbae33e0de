//! System-wide constants for the telescope-control workspace.
//!
//! Single source of truth for numeric limits and defaults.

use static_assertions::const_assert;

/// Full revolution [rad].
pub const TWO_PI: f64 = std::f64::consts::TAU;

/// Default control-loop period [ms].
pub const CYCLE_TIME_MS: u64 = 100;

/// Minimum allowed control-loop period [ms].
pub const CYCLE_TIME_MS_MIN: u64 = 10;

/// Maximum allowed control-loop period [ms].
pub const CYCLE_TIME_MS_MAX: u64 = 2000;

/// Consecutive in-tolerance ticks required before declaring "on target".
pub const ON_TARGET_TICKS_DEFAULT: u32 = 3;

/// Consecutive stalled ticks before a stall warning escalates to an abort.
pub const STALL_TICKS_DEFAULT: u32 = 5;

/// Default per-operation timeout [s].
pub const OPERATION_TIMEOUT_DEFAULT: f64 = 120.0;

/// Default shutter open/close timeout [s].
pub const SHUTTER_TIMEOUT_DEFAULT: f64 = 90.0;

/// Upper bound on whole-revolution corrections in one wrap pass.
pub const MAX_WRAP_REVOLUTIONS: u32 = 4;

/// Number of command channels a daemon instance owns.
pub const MAX_CHANNELS: usize = 8;

/// Number of axes a daemon instance can own (mount x/y/r, dome, focus, filter).
pub const MAX_AXES: usize = 6;

/// Mount axes (x, y, rotator).
pub const MAX_MOUNT_AXES: usize = 3;

/// Mesh points used for pointing-correction interpolation.
pub const MESH_NEIGHBOURS: usize = 4;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tcs/observatory.toml";

/// Default directory for channel FIFOs.
pub const DEFAULT_FIFO_DIR: &str = "/tmp/tcs";

const_assert!(MAX_MOUNT_AXES <= MAX_AXES);
const_assert!(CYCLE_TIME_MS_MIN <= CYCLE_TIME_MS && CYCLE_TIME_MS <= CYCLE_TIME_MS_MAX);
const_assert!(MAX_CHANNELS >= 8);
