//! Run orchestration.
//!
//! Ties a [`RunConfig`] to a [`Registry`]:
//!
//! 1. [`Orchestrator::prepare`] checks everything that can be checked without
//!    constructing a module: the enabled module set, the `config` section,
//!    the engine graph and every invocation's parameters (collected into one
//!    [`ConfigurationError`])
//! 2. [`Orchestrator::execute`] runs the root engine in a fresh root context
//!    seeded with the global parameters, then fails the run if the registry
//!    still tracks any instance
//!
//! [`Orchestrator::run_with_snapshot`] does both and writes the used-config
//! snapshot in between.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::context::{merge_supplied, ExecutionContext};
use crate::engine::{EngineGraph, EngineRunner, RunReport, DEFAULT_ROOT};
use crate::error::{ConfigIssue, ConfigurationError, IntegrityError, Result, StructuralError};
use crate::registry::Registry;
use crate::schema::{ParamErrorKind, Params};

/// Everything a run needs, validated
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub graph: EngineGraph,
    pub globals: Params,
    pub static_configs: BTreeMap<String, Params>,
    pub enabled_modules: BTreeSet<String>,
}

/// Drives one configuration document against a registry
#[derive(Debug)]
pub struct Orchestrator<'r> {
    registry: &'r mut Registry,
    root: String,
}

impl<'r> Orchestrator<'r> {
    pub fn new(registry: &'r mut Registry) -> Self {
        Self {
            registry,
            root: DEFAULT_ROOT.to_string(),
        }
    }

    /// Use `root` instead of `mainProcess` as the root engine
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Validate `config` without side effects.
    ///
    /// # Errors
    ///
    /// - `Structural` for duplicate or unknown module types and any
    ///   [`EngineGraph::build`] failure
    /// - `Configuration` for a malformed `config` section or, in one batch,
    ///   every parameter violation of every invocation
    pub fn prepare(&self, config: &RunConfig) -> Result<RunPlan> {
        let enabled_modules = self.enabled_module_set(config)?;
        let split = config.split()?;
        self.unclaimed_globals(&split.globals);
        let graph = EngineGraph::build(
            config.engine.engine_pool.clone(),
            &enabled_modules,
            &self.root,
        )?;

        let plan = RunPlan {
            graph,
            globals: split.globals,
            static_configs: split.modules,
            enabled_modules,
        };
        self.validate_parameters(&plan)?;

        info!(
            root = %self.root,
            modules = plan.enabled_modules.len(),
            engines = plan.graph.engines().len(),
            "configuration validated"
        );
        Ok(plan)
    }

    fn enabled_module_set(&self, config: &RunConfig) -> Result<BTreeSet<String>> {
        let mut seen = BTreeSet::new();
        for entry in &config.registry.modules {
            if !seen.insert(entry.name.as_str()) {
                return Err(StructuralError::DuplicateModule {
                    name: entry.name.clone(),
                }
                .into());
            }
        }

        let mut enabled = BTreeSet::new();
        for name in config.enabled_modules() {
            if !self.registry.contains(name) {
                return Err(StructuralError::UnknownModuleType {
                    name: name.to_string(),
                }
                .into());
            }
            enabled.insert(name.to_string());
        }
        Ok(enabled)
    }

    /// Object-valued globals that look like misplaced module configurations.
    ///
    /// A key naming a registered type that is not enabled, or one that no
    /// registered schema declares, can never reach a module.
    fn unclaimed_globals(&self, globals: &Params) -> Vec<String> {
        let schemas = self.registry.schemas();
        let mut unclaimed = Vec::new();

        for (key, value) in globals {
            if !value.is_object() {
                continue;
            }
            if self.registry.contains(key) {
                warn!(
                    module = %key,
                    "configuration of a module type missing from registry.modules is treated as a global"
                );
            } else if !schemas.values().any(|schema| schema.declares(key)) {
                warn!(key = %key, "global object is not declared by any module schema");
            } else {
                continue;
            }
            unclaimed.push(key.clone());
        }
        unclaimed
    }

    fn validate_parameters(&self, plan: &RunPlan) -> Result<()> {
        let mut issues: Vec<ConfigIssue> = Vec::new();
        let mut invoked = BTreeSet::new();

        for invocation in plan.graph.plan(&plan.globals) {
            let Some(schema) = self.registry.schema(&invocation.module) else {
                continue;
            };
            invoked.insert(invocation.module.clone());

            let supplied = merge_supplied(
                &invocation.parameters,
                schema,
                plan.static_configs.get(&invocation.module),
                invocation.overrides.as_ref(),
            );
            let scope = format!(
                "module '{}' in engine '{}'",
                invocation.module, invocation.engine
            );
            for error in schema.validate(&supplied) {
                let issue = ConfigIssue {
                    scope: scope.clone(),
                    error,
                };
                if !issues.contains(&issue) {
                    issues.push(issue);
                }
            }
        }

        // Enabled but never invoked: the static config still has to make sense.
        for (module, static_config) in &plan.static_configs {
            if invoked.contains(module) || !plan.enabled_modules.contains(module) {
                continue;
            }
            let Some(schema) = self.registry.schema(module) else {
                continue;
            };
            issues.extend(
                schema
                    .validate(static_config)
                    .into_iter()
                    .filter(|e| e.kind != ParamErrorKind::MissingRequired)
                    .map(|error| ConfigIssue {
                        scope: format!("configuration of module '{}'", module),
                        error,
                    }),
            );
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Parameters { issues }.into())
        }
    }

    /// Execute a prepared plan.
    ///
    /// # Errors
    ///
    /// The first error raised while running, or `Integrity` if the run
    /// succeeded but module instances are still tracked afterwards.
    pub fn execute(&mut self, plan: &RunPlan) -> Result<RunReport> {
        let outcome = {
            let mut ctx = ExecutionContext::new(&mut *self.registry, plan.graph.root());
            for (key, value) in &plan.globals {
                ctx.set_parameter(key.clone(), value.clone());
            }
            EngineRunner::new(&plan.graph, &plan.static_configs).run(&mut ctx)
        };

        let leaks = self.registry.check_leaks();
        match outcome {
            Ok(_) if !leaks.is_empty() => Err(IntegrityError::Leaked { leaks }.into()),
            Ok(report) => Ok(report),
            Err(err) => {
                for (module, stage) in &leaks {
                    warn!(
                        module = %module,
                        %stage,
                        "left unreleased by failed run ({})",
                        stage.description()
                    );
                }
                Err(err)
            }
        }
    }

    /// Prepare and execute `config`
    pub fn run(&mut self, config: &RunConfig) -> Result<RunReport> {
        let plan = self.prepare(config)?;
        self.execute(&plan)
    }

    /// Prepare `config`, write its used-config snapshot to `snapshot`, then
    /// execute it
    pub fn run_with_snapshot(
        &mut self,
        config: &RunConfig,
        snapshot: &Path,
    ) -> anyhow::Result<RunReport> {
        let plan = self.prepare(config)?;
        config.used_snapshot().save_to_file(snapshot)?;
        info!(path = %snapshot.display(), "wrote used configuration");
        Ok(self.execute(&plan)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineKitError;
    use crate::registry::Module;
    use crate::schema::{ParamSchema, ParamSpec};
    use serde_json::json;

    struct Gauge;

    impl Module for Gauge {
        fn param_schema() -> ParamSchema {
            ParamSchema::builder()
                .param("x", ParamSpec::number().with_range(0.0, 10.0).with_default(5))
                .param("label", ParamSpec::string().with_default("g"))
                .build()
        }

        fn construct(_params: &Params) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn execute(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Sticky;

    impl Module for Sticky {
        fn param_schema() -> ParamSchema {
            ParamSchema::new()
        }

        fn construct(_params: &Params) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn execute(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn release(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("still holding the mesh")
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register::<Gauge>("gauge").unwrap();
        registry.register::<Sticky>("sticky").unwrap();
        registry
    }

    fn document(value: serde_json::Value) -> RunConfig {
        serde_json::from_value(value).unwrap()
    }

    // =========================================================================
    // Preparation Tests
    // =========================================================================

    #[test]
    fn test_unclaimed_object_globals_reported() {
        let mut registry = registry();
        let orchestrator = Orchestrator::new(&mut registry);
        let globals: Params = json!({
            "gauge": { "x": 1 },
            "gaueg": { "x": 1 },
            "label": "shared",
            "x": 3
        })
        .as_object()
        .cloned()
        .unwrap();

        assert_eq!(orchestrator.unclaimed_globals(&globals), vec!["gauge", "gaueg"]);
    }

    #[test]
    fn test_declared_object_global_not_reported() {
        let mut registry = Registry::new();
        registry.register::<Gauge>("gauge").unwrap();
        let orchestrator = Orchestrator::new(&mut registry);
        let globals: Params = json!({ "label": { "nested": true } })
            .as_object()
            .cloned()
            .unwrap();

        assert!(orchestrator.unclaimed_globals(&globals).is_empty());
    }

    #[test]
    fn test_valid_document_runs() {
        let mut registry = registry();
        let config = document(json!({
            "config": { "gauge": { "x": 2 } },
            "registry": { "modules": [{ "name": "gauge" }] },
            "engine": { "enginePool": [
                { "name": "mainProcess", "modules": [{ "name": "gauge" }] }
            ] }
        }));

        let report = Orchestrator::new(&mut registry).run(&config).unwrap();
        assert_eq!(report.invocations.len(), 1);
    }

    #[test]
    fn test_unknown_module_type() {
        let mut registry = registry();
        let config = document(json!({
            "registry": { "modules": [{ "name": "warpDrive" }] },
            "engine": { "enginePool": [{ "name": "mainProcess" }] }
        }));

        let err = Orchestrator::new(&mut registry).prepare(&config).unwrap_err();
        assert!(matches!(
            err,
            EngineKitError::Structural(StructuralError::UnknownModuleType { .. })
        ));
    }

    #[test]
    fn test_duplicate_module_entry() {
        let mut registry = registry();
        let config = document(json!({
            "registry": { "modules": [{ "name": "gauge" }, { "name": "gauge", "enabled": false }] },
            "engine": { "enginePool": [{ "name": "mainProcess" }] }
        }));

        let err = Orchestrator::new(&mut registry).prepare(&config).unwrap_err();
        assert!(matches!(
            err,
            EngineKitError::Structural(StructuralError::DuplicateModule { .. })
        ));
    }

    #[test]
    fn test_reference_to_disabled_module_type() {
        let mut registry = registry();
        let config = document(json!({
            "registry": { "modules": [{ "name": "gauge", "enabled": false }] },
            "engine": { "enginePool": [
                { "name": "mainProcess", "modules": [{ "name": "gauge" }] }
            ] }
        }));

        let err = Orchestrator::new(&mut registry).prepare(&config).unwrap_err();
        assert!(matches!(
            err,
            EngineKitError::Structural(StructuralError::UnknownModule { .. })
        ));
    }

    #[test]
    fn test_custom_root() {
        let mut registry = registry();
        let config = document(json!({
            "engine": { "enginePool": [{ "name": "postprocess" }] }
        }));

        let orchestrator = Orchestrator::new(&mut registry).with_root("postprocess");
        assert_eq!(orchestrator.root(), "postprocess");
        assert!(orchestrator.prepare(&config).is_ok());
    }

    // =========================================================================
    // Batch Validation Tests
    // =========================================================================

    #[test]
    fn test_all_parameter_errors_reported_together() {
        let mut registry = registry();
        let config = document(json!({
            "config": { "gauge": { "x": 15 } },
            "registry": { "modules": [{ "name": "gauge" }] },
            "engine": { "enginePool": [
                { "name": "mainProcess", "modules": [
                    { "name": "gauge" },
                    { "name": "gauge", "params": { "x": 3, "label": 7 } },
                    { "name": "gauge", "params": { "speed": 1 } }
                ] }
            ] }
        }));

        let err = Orchestrator::new(&mut registry).prepare(&config).unwrap_err();
        let EngineKitError::Configuration(err) = err else {
            panic!("expected configuration error, got {err}");
        };

        let issues = err.issues();
        // x=15 from the first and third invocation is reported once
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().any(|i| matches!(i.error.kind, ParamErrorKind::AboveMaximum { .. })));
        assert!(issues.iter().any(|i| matches!(i.error.kind, ParamErrorKind::TypeMismatch { .. })));
        assert!(issues.iter().any(|i| i.error.kind == ParamErrorKind::Unsupported));
        assert_eq!(registry.tracked_count(), 0);
    }

    #[test]
    fn test_globals_validated_where_declared() {
        let mut registry = registry();
        let config = document(json!({
            "config": { "label": 3, "unrelated": "ignored" },
            "registry": { "modules": [{ "name": "gauge" }] },
            "engine": { "enginePool": [
                { "name": "mainProcess", "modules": [{ "name": "gauge" }] }
            ] }
        }));

        let err = Orchestrator::new(&mut registry).prepare(&config).unwrap_err();
        let EngineKitError::Configuration(err) = err else {
            panic!("expected configuration error, got {err}");
        };
        assert_eq!(err.issues().len(), 1);
        assert_eq!(err.issues()[0].error.path, "label");
    }

    #[test]
    fn test_uninvoked_static_config_checked() {
        let mut registry = registry();
        let config = document(json!({
            "config": { "gauge": { "bogus": true } },
            "registry": { "modules": [{ "name": "gauge" }] },
            "engine": { "enginePool": [{ "name": "mainProcess" }] }
        }));

        let err = Orchestrator::new(&mut registry).prepare(&config).unwrap_err();
        assert!(err.to_string().contains("configuration of module 'gauge'"));
    }

    // =========================================================================
    // Integrity Tests
    // =========================================================================

    #[test]
    fn test_release_failure_aborts_and_leaks() {
        let mut registry = registry();
        let config = document(json!({
            "registry": { "modules": [{ "name": "sticky" }] },
            "engine": { "enginePool": [
                { "name": "mainProcess", "modules": [{ "name": "sticky" }] }
            ] }
        }));

        let err = Orchestrator::new(&mut registry).run(&config).unwrap_err();
        assert!(matches!(err, EngineKitError::Lifecycle(_)));
        assert_eq!(registry.check_leaks().len(), 1);
    }

    #[test]
    fn test_preexisting_instance_fails_integrity_check() {
        let mut registry = registry();
        registry.create("gauge", &Params::new()).unwrap();
        let config = document(json!({
            "engine": { "enginePool": [{ "name": "mainProcess" }] }
        }));

        let err = Orchestrator::new(&mut registry).run(&config).unwrap_err();
        assert!(matches!(err, EngineKitError::Integrity(_)));
    }
}
