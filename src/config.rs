//! Run configuration documents.
//!
//! A run document has three sections:
//!
//! - `config`: keys naming a module listed in `registry.modules` hold that
//!   module's static configuration (an object); every other key is a global
//!   parameter seeded into the root context
//! - `registry.modules`: module types to enable for this run
//! - `engine.enginePool`: the engine definitions
//!
//! The same type is written back as the used-config snapshot, filtered down to
//! what the run actually uses.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::engine::{EngineDefinition, ModuleRef};
use crate::error::ConfigurationError;
use crate::schema::Params;

fn default_true() -> bool {
    true
}

/// Top-level run document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Global parameters and static module configurations
    #[serde(default)]
    pub config: Params,

    #[serde(default)]
    pub registry: RegistrySection,

    #[serde(default)]
    pub engine: EngineSection,
}

/// Module types taking part in a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySection {
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

/// One `registry.modules` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleEntry {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ModuleEntry {
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }
}

/// Engine definitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default)]
    pub engine_pool: Vec<EngineDefinition>,
}

/// `config` split into its two roles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitConfig {
    /// Parameters seeded into the root context
    pub globals: Params,
    /// Static configuration per module name
    pub modules: BTreeMap<String, Params>,
}

impl RunConfig {
    /// Load a run document from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse configuration JSON in {:?}", path.as_ref()))?;

        debug!(
            path = %path.as_ref().display(),
            modules = config.registry.modules.len(),
            engines = config.engine.engine_pool.len(),
            "loaded run configuration"
        );
        Ok(config)
    }

    /// Save the document as pretty JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Names of enabled modules, in declaration order
    pub fn enabled_modules(&self) -> impl Iterator<Item = &str> {
        self.registry
            .modules
            .iter()
            .filter(|m| m.enabled)
            .map(|m| m.name.as_str())
    }

    /// Separate global parameters from static module configurations.
    ///
    /// # Errors
    ///
    /// `Malformed` if a listed module's configuration is not an object.
    pub fn split(&self) -> Result<SplitConfig, ConfigurationError> {
        let listed: BTreeSet<&str> = self.registry.modules.iter().map(|m| m.name.as_str()).collect();
        let mut split = SplitConfig::default();

        for (key, value) in &self.config {
            if !listed.contains(key.as_str()) {
                split.globals.insert(key.clone(), value.clone());
                continue;
            }
            let Some(object) = value.as_object() else {
                return Err(ConfigurationError::Malformed {
                    reason: format!(
                        "configuration of module '{}' must be an object, found {}",
                        key,
                        crate::schema::json_kind(value)
                    ),
                });
            };
            split.modules.insert(key.clone(), object.clone());
        }

        Ok(split)
    }

    /// The subset of this document a run actually uses.
    ///
    /// Keeps enabled module types, globals and the configurations of enabled
    /// modules, enabled engines, enabled module references and sub-engine
    /// references to enabled engines.
    pub fn used_snapshot(&self) -> Self {
        let disabled: BTreeSet<&str> = self
            .registry
            .modules
            .iter()
            .filter(|m| !m.enabled)
            .map(|m| m.name.as_str())
            .collect();
        let live_engines: BTreeSet<&str> = self
            .engine
            .engine_pool
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.name.as_str())
            .collect();

        let config = self
            .config
            .iter()
            .filter(|(key, _)| !disabled.contains(key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let modules = self
            .registry
            .modules
            .iter()
            .filter(|m| m.enabled)
            .cloned()
            .collect();

        let engine_pool = self
            .engine
            .engine_pool
            .iter()
            .filter(|e| e.enabled)
            .map(|e| EngineDefinition {
                subengine_pool: e
                    .subengine_pool
                    .iter()
                    .filter(|s| live_engines.contains(s.as_str()))
                    .cloned()
                    .collect(),
                modules: e
                    .modules
                    .iter()
                    .filter(|m| m.enabled)
                    .cloned()
                    .collect::<Vec<ModuleRef>>(),
                ..e.clone()
            })
            .collect();

        Self {
            config,
            registry: RegistrySection { modules },
            engine: EngineSection { engine_pool },
        }
    }
}
