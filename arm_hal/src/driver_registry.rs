//! Registry of EtherCAT master backends.
//!
//! Factories are registered by name at startup and looked up by the
//! `--master` argument. Constructor-injected, no global state.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use arm_common::fieldbus::{EthercatMaster, MasterFactory};

use crate::error::StartupError;

/// Master backends by name, kept in name order.
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<&'static str, MasterFactory>,
}

impl DriverRegistry {
    /// Registry without any backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_all(&mut registry);
        registry
    }

    /// Register a master factory.
    ///
    /// # Panics
    /// Panics if a backend with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: MasterFactory) {
        match self.factories.entry(name) {
            Entry::Occupied(_) => panic!("Master driver '{name}' is already registered"),
            Entry::Vacant(slot) => {
                slot.insert(factory);
            }
        }
    }

    /// Factory registered as `name`.
    pub fn factory(&self, name: &str) -> Option<MasterFactory> {
        self.factories.get(name).copied()
    }

    /// Create a master instance by name.
    ///
    /// # Errors
    /// `StartupError::DriverNotFound` if no backend is registered as `name`.
    pub fn create_master(&self, name: &str) -> Result<Box<dyn EthercatMaster>, StartupError> {
        self.factory(name)
            .map(|make| make())
            .ok_or_else(|| StartupError::DriverNotFound(name.to_string()))
    }

    /// Registered backend names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}
