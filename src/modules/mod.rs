//! Built-in module types.
//!
//! Each subsystem contributes a [`LocalCatalog`]; [`builtin_registry`] exports
//! all of them into a fresh [`Registry`]. The modules model a small flow
//! simulation pipeline: they check and log their parameters and keep a little
//! state between lifecycle stages, but do no numerical work.

pub mod mesh;
pub mod output;
pub mod solver;

use anyhow::Context;
use serde::de::DeserializeOwned;

use crate::error::StructuralError;
use crate::registry::{LocalCatalog, Registry};
use crate::schema::Params;

/// Catalogs of every built-in subsystem
pub fn builtin_catalogs() -> Vec<LocalCatalog> {
    vec![mesh::catalog(), solver::catalog(), output::catalog()]
}

/// Registry holding every built-in module type
pub fn builtin_registry() -> Result<Registry, StructuralError> {
    Registry::with_catalogs(builtin_catalogs())
}

/// Read and deserialize parameter `key`
pub(crate) fn param<T: DeserializeOwned>(params: &Params, key: &str) -> anyhow::Result<T> {
    let value = params
        .get(key)
        .cloned()
        .with_context(|| format!("parameter '{}' is missing", key))?;
    serde_json::from_value(value).with_context(|| format!("parameter '{}' has the wrong shape", key))
}
