//! Engines: named compositions of sub-engines and module invocations.
//!
//! The engine layer sits between configuration (which engines exist and what
//! they invoke) and the registry (which owns module instances). [`graph`]
//! validates the composition up front; [`runner`] walks it.

pub mod graph;
pub mod runner;

pub use graph::{DEFAULT_ROOT, EngineDefinition, EngineGraph, ModuleRef, PlannedInvocation};
pub use runner::{EngineRunner, Invocation, RunReport};
