use ahash::AHashMap;
use std::sync::Arc;

use crate::domain::{GuardDefinition, OperationBinding};

use super::loader::GuardConfig;

/// Guards and operation bindings of one configuration generation.
#[derive(Debug, Clone)]
pub struct GuardTable {
    guards: AHashMap<String, Arc<GuardDefinition>>,
    operations: AHashMap<String, Arc<OperationBinding>>,
    version: String,
}

impl GuardTable {
    /// Build a table from a loaded configuration.
    pub fn from_config(config: GuardConfig) -> Self {
        let guards = config
            .guards
            .into_iter()
            .map(|guard| (guard.id.clone(), Arc::new(guard)))
            .collect();

        let operations = config
            .operations
            .into_iter()
            .map(|(operation, binding)| (operation, Arc::new(binding)))
            .collect();

        GuardTable {
            guards,
            operations,
            version: config.version,
        }
    }

    /// Create an empty table.
    pub fn empty() -> Self {
        GuardTable {
            guards: AHashMap::new(),
            operations: AHashMap::new(),
            version: "0.0.0".to_string(),
        }
    }

    /// Builder-style insert of a guard definition.
    pub fn with_guard(mut self, guard: GuardDefinition) -> Self {
        self.guards.insert(guard.id.clone(), Arc::new(guard));
        self
    }

    /// Builder-style insert of an operation binding.
    pub fn with_operation(mut self, operation_id: impl Into<String>, binding: OperationBinding) -> Self {
        self.operations.insert(operation_id.into(), Arc::new(binding));
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn guard(&self, guard_id: &str) -> Option<&Arc<GuardDefinition>> {
        self.guards.get(guard_id)
    }

    pub fn operation(&self, operation_id: &str) -> Option<&Arc<OperationBinding>> {
        self.operations.get(operation_id)
    }

    pub fn guard_count(&self) -> usize {
        self.guards.len()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

impl Default for GuardTable {
    fn default() -> Self {
        GuardTable::empty()
    }
}
