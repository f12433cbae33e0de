//! MotionPlanner: axis targets from the ephemeris, slew-time estimate and
//! the per-tick velocity blend.

pub mod slew;
pub mod targets;
pub mod velocity;

pub use slew::estimate_slew_time;
pub use targets::{AxisTargets, MotionPlanner, MountLimits, Offsets};
pub use velocity::{BlendMode, advance, drive_at, halt, move_axis_to};
