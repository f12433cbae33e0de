//! TCS Common Library
//!
//! Shared constants, configuration types and collaborator interfaces for
//! all telescope-control workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - System-wide numeric limits and defaults
//! - [`config`] - TOML loading trait and error type
//! - [`control_unit`] - Observatory configuration, operation states, telemetry
//! - [`hal`] - `HardwareBinding` trait and raw hardware types
//! - [`astro`] - Ephemeris collaborator: targets, sidereal time, apparent place
//! - [`time`] - Explicit `Timestamp` passed through the control loop
//! - [`prelude`] - Common re-exports for convenience

pub mod astro;
pub mod config;
pub mod consts;
pub mod control_unit;
pub mod hal;
pub mod prelude;
pub mod time;
