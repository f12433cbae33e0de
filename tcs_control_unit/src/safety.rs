//! SafetyGuard: travel-limit wrapping, stall detection and operation
//! timers. Nothing here mutates hardware; callers decide how to react.

pub mod limits;
pub mod stall;
pub mod timer;

pub use limits::{LimitExceeded, check_and_wrap, check_limit_switches};
pub use stall::{StallDetected, StallMonitor, StallVerdict, detect_stall};
pub use timer::{SafetyTimer, timer_expired, timer_started};
