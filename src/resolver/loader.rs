use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::domain::{GuardDefinition, InvocationContext, OperationBinding};

/// Errors that can occur during guard configuration loading.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Guard configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    pub version: String,

    #[serde(default)]
    pub guards: Vec<GuardDefinition>,

    /// Operation id -> span settings and ordered guard ids
    #[serde(default)]
    pub operations: HashMap<String, OperationBinding>,
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<GuardConfig, LoadError> {
    let config: GuardConfig = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Load a guard configuration from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<GuardConfig, LoadError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Structural validation.
///
/// Rejects the document only for problems that make it ambiguous. Bad
/// guard parameters and dangling references are reported and left to fail
/// open at call time.
fn validate_config(config: &GuardConfig) -> Result<(), LoadError> {
    if config.version.is_empty() {
        return Err(LoadError::Validation(
            "Configuration version cannot be empty".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for guard in &config.guards {
        if guard.id.is_empty() {
            return Err(LoadError::Validation("Guard ID cannot be empty".to_string()));
        }
        if !seen_ids.insert(guard.id.as_str()) {
            return Err(LoadError::Validation(format!(
                "Duplicate guard ID: {}",
                guard.id
            )));
        }

        // Parameter checks only; discriminant requirements are per call
        let probe = InvocationContext::new("").with_discriminant("");
        if let Err(detail) = guard.policy.as_policy().validate(&probe) {
            warn!(guard = %guard.id, %detail, "Guard has invalid parameters");
        }
    }

    for (operation, binding) in &config.operations {
        for guard_id in &binding.guards {
            if !seen_ids.contains(guard_id.as_str()) {
                warn!(%operation, guard = %guard_id, "Operation references unknown guard");
            }
        }
    }

    Ok(())
}

/// Loads guard configuration from a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigLoader { path: path.into() }
    }

    pub fn load(&self) -> Result<GuardConfig, LoadError> {
        load_config(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
