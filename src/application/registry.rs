//! Object Registry
//!
//! Applications and modifiers register their descriptors by name at
//! startup. The engine resolves every plugin reference through this
//! registry; no runtime type introspection is involved.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{RambleError, Result};

use super::modifier::ModifierDefinition;
use super::types::ApplicationDefinition;

#[derive(Debug, Default)]
pub struct ObjectRegistry {
    applications: IndexMap<String, Arc<ApplicationDefinition>>,
    modifiers: IndexMap<String, Arc<ModifierDefinition>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_application(&mut self, definition: ApplicationDefinition) {
        self.applications
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn register_modifier(&mut self, definition: ModifierDefinition) {
        self.modifiers
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn application(&self, name: &str) -> Result<Arc<ApplicationDefinition>> {
        self.applications
            .get(name)
            .cloned()
            .ok_or_else(|| RambleError::UnknownApplication {
                name: name.to_string(),
            })
    }

    pub fn modifier(&self, name: &str) -> Result<Arc<ModifierDefinition>> {
        self.modifiers
            .get(name)
            .cloned()
            .ok_or_else(|| RambleError::UnknownModifier {
                name: name.to_string(),
            })
    }

    pub fn application_names(&self) -> impl Iterator<Item = &String> {
        self.applications.keys()
    }

    pub fn modifier_names(&self) -> impl Iterator<Item = &String> {
        self.modifiers.keys()
    }
}
