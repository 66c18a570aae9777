//! Schema and default document export.
//!
//! `--write-config <dir>` produces:
//!
//! ```text
//! <dir>/register.json             every registered schema, keyed by type name
//! <dir>/defaults/<type>.json      default parameters of one type
//! <dir>/config.json               run document enabling every type once
//! ```
//!
//! The template run document passes [`Orchestrator::prepare`] against the
//! registry it was generated from.
//!
//! [`Orchestrator::prepare`]: crate::orchestrator::Orchestrator::prepare

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{EngineSection, ModuleEntry, RegistrySection, RunConfig};
use crate::engine::{EngineDefinition, ModuleRef};
use crate::registry::Registry;
use crate::schema::Params;

pub const REGISTER_FILE: &str = "register.json";
pub const DEFAULTS_DIR: &str = "defaults";
pub const TEMPLATE_FILE: &str = "config.json";

/// Paths written by [`write_all`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub register: PathBuf,
    pub defaults: Vec<PathBuf>,
    pub template: PathBuf,
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {:?}", path))?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    debug!(path = %path.display(), "wrote export");
    Ok(())
}

/// Default parameters of every registered type, keyed by type name
pub fn default_documents(registry: &Registry) -> Vec<(String, Params)> {
    registry
        .schemas()
        .into_iter()
        .map(|(name, schema)| (name.to_string(), schema.defaults()))
        .collect()
}

/// Run document that enables every registered type, configures it with its
/// defaults and invokes it once from a single `root` engine
pub fn template_config(registry: &Registry, root: &str) -> RunConfig {
    let mut config = Params::new();
    let mut modules = Vec::new();
    let mut engine = EngineDefinition::new(root);

    for (name, defaults) in default_documents(registry) {
        config.insert(name.clone(), defaults.into());
        modules.push(ModuleEntry::enabled(name.clone()));
        engine = engine.module(ModuleRef::new(name));
    }

    RunConfig {
        config,
        registry: RegistrySection { modules },
        engine: EngineSection {
            engine_pool: vec![engine],
        },
    }
}

/// Write `register.json`, one defaults file per type and the template
/// `config.json` under `dir`, creating directories as needed
pub fn write_all(registry: &Registry, dir: &Path, root: &str) -> Result<ExportSummary> {
    let defaults_dir = dir.join(DEFAULTS_DIR);
    fs::create_dir_all(&defaults_dir)
        .with_context(|| format!("Failed to create directory {:?}", defaults_dir))?;

    let register = dir.join(REGISTER_FILE);
    write_json(&register, &registry.schemas())?;

    let mut defaults = Vec::new();
    for (name, document) in default_documents(registry) {
        let path = defaults_dir.join(format!("{}.json", name));
        write_json(&path, &document)?;
        defaults.push(path);
    }

    let template = dir.join(TEMPLATE_FILE);
    template_config(registry, root).save_to_file(&template)?;

    info!(
        dir = %dir.display(),
        types = defaults.len(),
        "exported schemas and defaults"
    );
    Ok(ExportSummary {
        register,
        defaults,
        template,
    })
}
