//! # TCS Control Unit Library
//!
//! Real-time control core of the observatory daemon. Accepts asynchronous
//! commands on named channels, turns them into motor commands for the
//! mount, dome, shutter, focuser and filter wheel, and supervises every
//! motion against encoder feedback, travel limits and timeouts.
//!
//! ## Layers
//!
//! 1. **model** - raw/radian conversion, mount geometry, pointing mesh
//! 2. **safety** - limit wrap, stall detection, operation timers
//! 3. **planner** - axis targets from the ephemeris, slew estimate, velocity blend
//! 4. **state** - one operation state machine per subsystem
//! 5. **command** - parsing, channel ownership, reply routing, transports
//! 6. **cycle** - the single-threaded control loop
//!
//! ## Scheduling
//!
//! Exactly one thread runs the loop. Every tick reads hardware once, runs
//! the preemptions (e-stop, weather), handles at most one inbound command,
//! advances each subsystem and publishes one telemetry snapshot. Nothing in
//! a tick blocks.

pub mod command;
pub mod config;
pub mod cycle;
pub mod error;
pub mod model;
pub mod persist;
pub mod planner;
pub mod safety;
pub mod state;
pub mod telemetry;
