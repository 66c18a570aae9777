//! Engine Graph
//!
//! Name-indexed table of [`EngineDefinition`]s. Building the graph performs
//! every structural check up front, before any module is constructed:
//!
//! | Check | Error |
//! |-------|-------|
//! | Engine names are unique | `DuplicateEngine` |
//! | Root engine exists | `MissingRoot` |
//! | Root engine is enabled | `RootDisabled` |
//! | Sub-engine references resolve | `UnknownEngine` |
//! | Enabled module references are enabled registry modules | `UnknownModule` |
//! | Sub-engine references form no cycle | `CyclicDependency` |
//!
//! Cycle detection walks the whole graph (every defined engine, enabled or
//! not), not just the path the root would execute.
//!
//! # Design
//!
//! - **Pure logic**: no registry access, no side effects
//! - **Deterministic**: engines and references are visited in declaration order

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::StructuralError;
use crate::schema::Params;

/// Root engine name used when none is configured
pub const DEFAULT_ROOT: &str = "mainProcess";

fn default_true() -> bool {
    true
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ============================================================================
// Definition Types
// ============================================================================

/// A module invocation inside an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModuleRef {
    /// Registry module (type) name
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-invocation overrides; win over the module's static configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl ModuleRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            params: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }
}

/// A named composition of sub-engines and modules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineDefinition {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sub-engines, executed in order before this engine's modules
    #[serde(default)]
    pub subengine_pool: Vec<String>,

    /// Module invocations, executed in order
    #[serde(default)]
    pub modules: Vec<ModuleRef>,

    /// Parameters written into the engine's context when it starts
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub parameters: Params,

    /// Run in the invoking engine's context instead of a fresh child context
    #[serde(default, skip_serializing_if = "is_false")]
    pub share_context: bool,
}

impl EngineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            subengine_pool: Vec::new(),
            modules: Vec::new(),
            parameters: Params::new(),
            share_context: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn sub_engine(mut self, name: impl Into<String>) -> Self {
        self.subengine_pool.push(name.into());
        self
    }

    pub fn module(mut self, module: ModuleRef) -> Self {
        self.modules.push(module);
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn shared(mut self) -> Self {
        self.share_context = true;
        self
    }
}

/// One module invocation the root engine would perform, in execution order
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedInvocation {
    pub engine: String,
    pub module: String,
    /// Context parameters visible to the invocation
    pub parameters: Params,
    pub overrides: Option<Params>,
}

// ============================================================================
// Graph
// ============================================================================

/// Structurally validated engine table
#[derive(Debug, Clone)]
pub struct EngineGraph {
    engines: Vec<EngineDefinition>,
    index: HashMap<String, usize>,
    root: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

impl EngineGraph {
    /// Validate `definitions` and build the graph.
    ///
    /// # Errors
    ///
    /// The first structural violation found, in the order listed in the
    /// module documentation.
    ///
    /// # What This Explicitly Refuses To Do
    ///
    /// - Check module parameters: that needs the registry's schemas
    /// - Skip disabled engines during cycle detection
    pub fn build(
        definitions: Vec<EngineDefinition>,
        enabled_modules: &BTreeSet<String>,
        root: &str,
    ) -> Result<Self, StructuralError> {
        let mut index = HashMap::with_capacity(definitions.len());
        for (i, engine) in definitions.iter().enumerate() {
            if index.insert(engine.name.clone(), i).is_some() {
                return Err(StructuralError::DuplicateEngine {
                    name: engine.name.clone(),
                });
            }
        }

        let graph = Self {
            engines: definitions,
            index,
            root: root.to_string(),
        };

        match graph.get(root) {
            None => {
                return Err(StructuralError::MissingRoot {
                    name: root.to_string(),
                });
            }
            Some(engine) if !engine.enabled => {
                return Err(StructuralError::RootDisabled {
                    name: root.to_string(),
                });
            }
            Some(_) => {}
        }

        for engine in &graph.engines {
            if let Some(reference) = engine
                .subengine_pool
                .iter()
                .find(|sub| !graph.index.contains_key(sub.as_str()))
            {
                return Err(StructuralError::UnknownEngine {
                    engine: engine.name.clone(),
                    reference: reference.clone(),
                });
            }
        }

        for engine in &graph.engines {
            if let Some(module) = engine
                .modules
                .iter()
                .filter(|m| m.enabled)
                .find(|m| !enabled_modules.contains(&m.name))
            {
                return Err(StructuralError::UnknownModule {
                    engine: engine.name.clone(),
                    module: module.name.clone(),
                });
            }
        }

        graph.detect_cycles()?;
        Ok(graph)
    }

    fn detect_cycles(&self) -> Result<(), StructuralError> {
        let mut marks = vec![Mark::Unvisited; self.engines.len()];
        let mut path = Vec::new();

        for i in 0..self.engines.len() {
            if marks[i] == Mark::Unvisited {
                self.visit(i, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        i: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Result<(), StructuralError> {
        marks[i] = Mark::Visiting;
        path.push(i);

        for sub in &self.engines[i].subengine_pool {
            let Some(&j) = self.index.get(sub) else {
                continue;
            };
            match marks[j] {
                Mark::Visiting => {
                    let start = path.iter().position(|&p| p == j).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..]
                        .iter()
                        .map(|&p| self.engines[p].name.clone())
                        .collect();
                    cycle.push(self.engines[j].name.clone());
                    return Err(StructuralError::CyclicDependency { path: cycle });
                }
                Mark::Unvisited => self.visit(j, marks, path)?,
                Mark::Done => {}
            }
        }

        path.pop();
        marks[i] = Mark::Done;
        Ok(())
    }

    /// Look up an engine by name
    pub fn get(&self, name: &str) -> Option<&EngineDefinition> {
        self.index.get(name).map(|&i| &self.engines[i])
    }

    /// Name of the root engine
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Engines in declaration order
    pub fn engines(&self) -> &[EngineDefinition] {
        &self.engines
    }

    /// Every module invocation the root would perform, in execution order.
    ///
    /// Mirrors the runner's traversal (engine parameters, then enabled
    /// sub-engines with shared or copied parameters, then enabled modules)
    /// without touching the registry, so invocations can be validated before
    /// anything is constructed.
    pub fn plan(&self, parameters: &Params) -> Vec<PlannedInvocation> {
        let mut invocations = Vec::new();
        if let Some(root) = self.get(&self.root) {
            let mut bag = parameters.clone();
            self.plan_engine(root, &mut bag, &mut invocations);
        }
        invocations
    }

    fn plan_engine(
        &self,
        engine: &EngineDefinition,
        bag: &mut Params,
        invocations: &mut Vec<PlannedInvocation>,
    ) {
        for (key, value) in &engine.parameters {
            bag.insert(key.clone(), value.clone());
        }

        for sub in &engine.subengine_pool {
            match self.get(sub) {
                Some(def) if def.enabled && def.share_context => {
                    self.plan_engine(def, bag, invocations);
                }
                Some(def) if def.enabled => {
                    let mut child = bag.clone();
                    self.plan_engine(def, &mut child, invocations);
                }
                _ => {}
            }
        }

        for module in engine.modules.iter().filter(|m| m.enabled) {
            invocations.push(PlannedInvocation {
                engine: engine.name.clone(),
                module: module.name.clone(),
                parameters: bag.clone(),
                overrides: module.params.clone(),
            });
        }
    }

    /// Build without structural checks, for exercising the runner's own guards
    #[cfg(test)]
    pub(crate) fn unchecked(definitions: Vec<EngineDefinition>, root: &str) -> Self {
        let index = definitions
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Self {
            engines: definitions,
            index,
            root: root.to_string(),
        }
    }
}
