//! Registry of hardware binding factories.
//!
//! The daemon looks up `[hardware].driver` here at startup and on reset.
//! Constructed explicitly and passed by value; there is no global state.

use std::collections::HashMap;
use tcs_common::control_unit::config::ObservatoryConfig;
use tcs_common::hal::driver::{BindingFactory, HardwareBinding, HardwareError};

/// Name to factory map of available bindings.
pub struct BindingRegistry {
    factories: HashMap<&'static str, BindingFactory>,
}

impl BindingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry pre-populated with every binding shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_all(&mut registry);
        registry
    }

    /// Register a binding factory.
    ///
    /// # Errors
    /// Returns `HardwareError::InitFailed` if the name is already taken.
    pub fn register(
        &mut self,
        name: &'static str,
        factory: BindingFactory,
    ) -> Result<(), HardwareError> {
        if self.factories.contains_key(name) {
            return Err(HardwareError::InitFailed(format!(
                "binding '{name}' is already registered"
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Create a binding instance by name.
    ///
    /// # Errors
    /// Returns `HardwareError::DriverNotFound` for an unknown name.
    pub fn create(
        &self,
        name: &str,
        config: &ObservatoryConfig,
    ) -> Result<Box<dyn HardwareBinding>, HardwareError> {
        let factory = self
            .factories
            .get(name)
            .copied()
            .ok_or_else(|| HardwareError::DriverNotFound(name.to_string()))?;
        Ok(factory(config))
    }

    /// List all registered binding names (sorted).
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::tests::test_config;

    #[test]
    fn builtin_contains_simulation() {
        let reg = BindingRegistry::with_builtin();
        assert_eq!(reg.names(), vec!["simulation"]);
        let binding = reg.create("simulation", &test_config()).unwrap();
        assert_eq!(binding.name(), "simulation");
    }

    #[test]
    fn unknown_binding_is_an_error() {
        let reg = BindingRegistry::with_builtin();
        let result = reg.create("serial-stepper", &test_config());
        assert!(matches!(result, Err(HardwareError::DriverNotFound(_))));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = BindingRegistry::with_builtin();
        let result = reg.register("simulation", crate::drivers::simulation::create_binding);
        assert!(matches!(result, Err(HardwareError::InitFailed(_))));
    }
}
