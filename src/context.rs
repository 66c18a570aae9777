//! Execution Contexts
//!
//! An [`ExecutionContext`] is the scope of one engine invocation. It maps
//! module names to the handles it created, carries a flat parameter bag, and
//! forwards every lifecycle call to the [`Registry`].
//!
//! Contexts borrow the registry mutably. A nested engine either gets a
//! [`child`](ExecutionContext::child) context (which reborrows the same
//! registry, copies the parameter bag and starts with no modules) or shares
//! its parent's context outright; which one is decided by the engine's
//! `shareContext` flag.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::{Handle, Registry};
use crate::schema::{ParamSchema, Params};

/// Lookup failures inside a context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Module '{name}' was never created in context of engine '{engine}'")]
    ModuleNotFound { engine: String, name: String },

    #[error("Parameter '{key}' is not set in context of engine '{engine}'")]
    ParameterNotFound { engine: String, key: String },
}

/// Scope of one engine invocation
#[derive(Debug)]
pub struct ExecutionContext<'r> {
    registry: &'r mut Registry,
    engine: String,
    parent: Option<String>,
    parameters: Params,
    modules: BTreeMap<String, Handle>,
}

impl<'r> ExecutionContext<'r> {
    /// Create a root context for `engine`
    pub fn new(registry: &'r mut Registry, engine: impl Into<String>) -> Self {
        Self {
            registry,
            engine: engine.into(),
            parent: None,
            parameters: Params::new(),
            modules: BTreeMap::new(),
        }
    }

    /// Create an isolated context for a nested engine.
    ///
    /// The child sees a copy of this context's parameters; its own writes and
    /// the modules it creates stay local.
    pub fn child(&mut self, engine: impl Into<String>) -> ExecutionContext<'_> {
        ExecutionContext {
            registry: &mut *self.registry,
            engine: engine.into(),
            parent: Some(self.engine.clone()),
            parameters: self.parameters.clone(),
            modules: BTreeMap::new(),
        }
    }

    /// Engine this context was created for
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Engine that created this context, if nested
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn registry(&self) -> &Registry {
        &*self.registry
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Construct module `name` with `params`.
    ///
    /// If `name` already has a live handle in this context, that instance is
    /// released first and replaced.
    pub fn create_module(&mut self, name: &str, params: &Params) -> Result<Handle> {
        if let Some(&previous) = self.modules.get(name) {
            warn!(
                engine = %self.engine,
                module = %name,
                handle = %previous,
                "module already live in this context, releasing it before re-creating"
            );
            self.registry.release(previous)?;
            self.modules.remove(name);
        }

        let handle = self.registry.create(name, params)?;
        self.modules.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub fn initialize_module(&mut self, name: &str) -> Result<()> {
        let handle = self.handle_of(name)?;
        self.registry.initialize(handle)?;
        Ok(())
    }

    pub fn execute_module(&mut self, name: &str) -> Result<()> {
        let handle = self.handle_of(name)?;
        self.registry.execute(handle)?;
        Ok(())
    }

    /// Release module `name` and forget it.
    ///
    /// On failure the name stays mapped so the caller can inspect or retry.
    pub fn release_module(&mut self, name: &str) -> Result<()> {
        let handle = self.handle_of(name)?;
        self.registry.release(handle)?;
        self.modules.remove(name);
        debug!(engine = %self.engine, module = %name, "released");
        Ok(())
    }

    /// Handle currently mapped to `name`
    pub fn handle(&self, name: &str) -> Option<Handle> {
        self.modules.get(name).copied()
    }

    /// Names of modules created here and not yet released
    pub fn live_modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    fn handle_of(&self, name: &str) -> std::result::Result<Handle, ContextError> {
        self.handle(name).ok_or_else(|| ContextError::ModuleNotFound {
            engine: self.engine.clone(),
            name: name.to_string(),
        })
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.parameters.insert(key.into(), value.into());
    }

    pub fn get_parameter(&self, key: &str) -> std::result::Result<&Value, ContextError> {
        self.parameters
            .get(key)
            .ok_or_else(|| ContextError::ParameterNotFound {
                engine: self.engine.clone(),
                key: key.to_string(),
            })
    }

    pub fn parameters(&self) -> &Params {
        &self.parameters
    }

    /// Parameters explicitly supplied for one module invocation.
    ///
    /// Merge order, later wins: context parameters the schema declares,
    /// the module's static configuration, the per-invocation overrides.
    pub fn supplied_params(
        &self,
        schema: &ParamSchema,
        static_config: Option<&Params>,
        overrides: Option<&Params>,
    ) -> Params {
        merge_supplied(&self.parameters, schema, static_config, overrides)
    }

    /// Supplied parameters on top of the schema defaults
    pub fn effective_params(
        &self,
        schema: &ParamSchema,
        static_config: Option<&Params>,
        overrides: Option<&Params>,
    ) -> Params {
        schema.with_defaults(&self.supplied_params(schema, static_config, overrides))
    }
}

/// Merge a parameter bag, static module config and overrides for `schema`.
pub fn merge_supplied(
    bag: &Params,
    schema: &ParamSchema,
    static_config: Option<&Params>,
    overrides: Option<&Params>,
) -> Params {
    let mut supplied: Params = bag
        .iter()
        .filter(|(key, _)| schema.declares(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for layer in [static_config, overrides].into_iter().flatten() {
        for (key, value) in layer {
            supplied.insert(key.clone(), value.clone());
        }
    }
    supplied
}
