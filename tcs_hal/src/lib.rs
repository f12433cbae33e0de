//! # TCS HAL Library
//!
//! Hardware bindings for the telescope control unit. Every binding
//! implements `HardwareBinding` from `tcs_common::hal::driver` and is
//! constructed by name through the [`BindingRegistry`].
//!
//! # Module Structure
//!
//! - [`driver_registry`] - Binding factory registration
//! - [`drivers`] - Binding implementations

#![deny(missing_docs)]

pub mod driver_registry;
pub mod drivers;

pub use crate::driver_registry::BindingRegistry;
pub use crate::drivers::simulation::{SimHandle, SimulationBinding};
