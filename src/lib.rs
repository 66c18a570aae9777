//! enginekit Library
//!
//! A type-erased module registry with a four-stage lifecycle, declarative
//! parameter schemas and a hierarchical engine runner, all driven by one JSON
//! configuration document.

pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod logging;
pub mod modules;
pub mod orchestrator;
pub mod registry;
pub mod schema;

// Re-export main types for convenience
pub use config::{ModuleEntry, RunConfig};
pub use context::{ContextError, ExecutionContext};
pub use engine::{EngineDefinition, EngineGraph, EngineRunner, ModuleRef, RunReport};
pub use error::{
    ConfigIssue, ConfigurationError, EngineKitError, IntegrityError, Result, StructuralError,
};
pub use lifecycle::{LifecycleError, LifecycleStage, Operation};
pub use orchestrator::{Orchestrator, RunPlan};
pub use registry::{Handle, LocalCatalog, Module, Registry};
pub use schema::{ParamError, ParamErrorKind, ParamSchema, ParamSpec, ParamType, Params};
