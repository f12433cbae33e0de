//! Hardware binding implementations.
//!
//! - [`simulation`] - deterministic software model used by `--no-hardware` and tests

pub mod simulation;

use crate::driver_registry::BindingRegistry;

/// Register every built-in binding.
pub fn register_all(registry: &mut BindingRegistry) {
    // Names are unique by construction, registration cannot collide here.
    let _ = registry.register("simulation", simulation::create_binding);
}
