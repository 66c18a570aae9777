//! Engine Runner
//!
//! Executes an [`EngineGraph`] depth first. For each engine:
//!
//! 1. Its `parameters` are written into the current context
//! 2. Each sub-engine in `subenginePool` runs, in order. Disabled sub-engines
//!    are skipped with a warning; `shareContext` sub-engines reuse the
//!    current context, all others get a child context
//! 3. Each enabled module runs its full quartet (create, initialize,
//!    execute, release) before the next one starts
//!
//! Any error aborts the run immediately. The runner keeps its own visiting
//! path and refuses to re-enter an engine already on it, independent of the
//! checks [`EngineGraph::build`] performs.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::engine::graph::{EngineDefinition, EngineGraph, ModuleRef};
use crate::error::{Result, StructuralError};
use crate::lifecycle::LifecycleError;
use crate::schema::Params;

/// One completed module quartet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub engine: String,
    pub module: String,
}

/// What a run did, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Engines entered
    pub engines: Vec<String>,
    /// Module quartets completed
    pub invocations: Vec<Invocation>,
    /// Disabled sub-engines that were skipped
    pub skipped: Vec<String>,
}

impl RunReport {
    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        format!(
            "{} engine(s), {} module invocation(s), {} skipped",
            self.engines.len(),
            self.invocations.len(),
            self.skipped.len()
        )
    }
}

/// Depth-first executor over a validated engine graph
#[derive(Debug)]
pub struct EngineRunner<'g> {
    graph: &'g EngineGraph,
    static_configs: &'g BTreeMap<String, Params>,
    visiting: Vec<String>,
    report: RunReport,
}

impl<'g> EngineRunner<'g> {
    /// `static_configs` maps module names to their static configuration
    pub fn new(graph: &'g EngineGraph, static_configs: &'g BTreeMap<String, Params>) -> Self {
        Self {
            graph,
            static_configs,
            visiting: Vec::new(),
            report: RunReport::default(),
        }
    }

    /// Execute the graph's root engine in `ctx` and return what happened
    pub fn run(mut self, ctx: &mut ExecutionContext<'_>) -> Result<RunReport> {
        let root = self.graph.root().to_string();
        self.execute_engine(&root, ctx)?;
        info!(summary = %self.report.summary(), "run complete");
        Ok(self.report)
    }

    /// Execute engine `name` in `ctx`.
    ///
    /// # Errors
    ///
    /// - `CyclicDependency` if `name` is already being executed
    /// - `NotFoundOrDisabled` if `name` is undefined or disabled
    /// - `UnknownEngine` if a sub-engine is undefined
    /// - Any lifecycle, context or hook error from a module
    pub fn execute_engine(&mut self, name: &str, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        if self.visiting.iter().any(|v| v == name) {
            let mut path = self.visiting.clone();
            path.push(name.to_string());
            return Err(StructuralError::CyclicDependency { path }.into());
        }

        let graph = self.graph;
        let engine = graph
            .get(name)
            .filter(|e| e.enabled)
            .ok_or_else(|| StructuralError::NotFoundOrDisabled {
                name: name.to_string(),
            })?;

        self.visiting.push(name.to_string());
        let result = self.execute_body(engine, ctx);
        self.visiting.pop();
        result
    }

    fn execute_body(&mut self, engine: &'g EngineDefinition, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        info!(
            engine = %engine.name,
            parent = ctx.parent().unwrap_or("-"),
            depth = self.visiting.len(),
            "executing engine"
        );
        self.report.engines.push(engine.name.clone());

        for (key, value) in &engine.parameters {
            ctx.set_parameter(key.clone(), value.clone());
        }

        let graph = self.graph;
        for sub in &engine.subengine_pool {
            let def = graph.get(sub).ok_or_else(|| StructuralError::UnknownEngine {
                engine: engine.name.clone(),
                reference: sub.clone(),
            })?;

            if !def.enabled {
                warn!(engine = %engine.name, subengine = %sub, "sub-engine is disabled, skipping");
                self.report.skipped.push(sub.clone());
                continue;
            }

            if def.share_context {
                self.execute_engine(sub, ctx)?;
            } else {
                let mut child = ctx.child(sub.as_str());
                self.execute_engine(sub, &mut child)?;
            }
        }

        for module in engine.modules.iter() {
            if !module.enabled {
                debug!(engine = %engine.name, module = %module.name, "module disabled, skipping");
                continue;
            }
            self.run_module(engine, module, ctx)?;
        }

        Ok(())
    }

    fn run_module(
        &mut self,
        engine: &EngineDefinition,
        module: &ModuleRef,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let name = module.name.as_str();
        let params = {
            let schema = ctx
                .registry()
                .schema(name)
                .ok_or_else(|| LifecycleError::NotFound {
                    type_name: name.to_string(),
                })?;
            ctx.effective_params(schema, self.static_configs.get(name), module.params.as_ref())
        };

        debug!(engine = %engine.name, module = %name, "running module");
        ctx.create_module(name, &params)?;
        ctx.initialize_module(name)?;
        ctx.execute_module(name)?;
        ctx.release_module(name)?;

        self.report.invocations.push(Invocation {
            engine: engine.name.clone(),
            module: name.to_string(),
        });
        Ok(())
    }
}
