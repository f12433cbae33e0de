//! Control unit shared types.
//!
//! Configuration structures, state enums, response codes and the
//! telemetry snapshot published once per control tick.

pub mod config;
pub mod state;
pub mod telemetry;
