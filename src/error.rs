//! Error handling for enginekit
//!
//! Each layer owns a typed error (`LifecycleError` in [`crate::lifecycle`],
//! `SchemaError` in [`crate::schema`], `ContextError` in [`crate::context`]).
//! The cross-cutting categories live here, and [`EngineKitError`] wraps them
//! all so callers can propagate with `?`. File access stays on `anyhow` at
//! the loader and binary boundary.
//!
//! | Category | Fatal to run | Collected in batch |
//! |----------|--------------|--------------------|
//! | Configuration | yes, before construction | yes |
//! | Structural | yes, before construction | no |
//! | Lifecycle | yes, aborts the module quartet | no |
//! | Integrity | yes, after execution | lists every leak |

use thiserror::Error;

use crate::context::ContextError;
use crate::lifecycle::{LifecycleError, LifecycleStage};
use crate::schema::{ParamError, SchemaError};

/// One parameter violation together with where in the document it was found
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    /// Location, e.g. `module 'flowSolver' in engine 'mainProcess'`
    pub scope: String,
    pub error: ParamError,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.scope, self.error)
    }
}

/// Malformed or constraint-violating configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// Every parameter violation found in the document
    #[error("{} parameter error(s):\n  - {}", .issues.len(), join_issues(.issues))]
    Parameters { issues: Vec<ConfigIssue> },

    /// A section of the document has the wrong shape
    #[error("{reason}")]
    Malformed { reason: String },
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  - ")
}

impl ConfigurationError {
    /// Issues carried by a batch error (empty for `Malformed`)
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            Self::Parameters { issues } => issues,
            Self::Malformed { .. } => &[],
        }
    }
}

/// Problems in the shape of the registry or engine graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("Module '{name}' is declared more than once")]
    DuplicateModule { name: String },

    #[error("Engine '{name}' is defined more than once")]
    DuplicateEngine { name: String },

    #[error("Root engine '{name}' is not defined")]
    MissingRoot { name: String },

    #[error("Root engine '{name}' is disabled")]
    RootDisabled { name: String },

    #[error("Engine '{engine}' references undefined sub-engine '{reference}'")]
    UnknownEngine { engine: String, reference: String },

    #[error("Engine '{engine}' references module '{module}' which is not an enabled registry module")]
    UnknownModule { engine: String, module: String },

    #[error("Module '{name}' is not a known module type")]
    UnknownModuleType { name: String },

    #[error("Cyclic engine dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Engine '{name}' is not defined or is disabled")]
    NotFoundOrDisabled { name: String },

    #[error("Module type '{type_name}' has an invalid schema: {source}")]
    InvalidSchema {
        type_name: String,
        source: SchemaError,
    },
}

/// End-of-run integrity failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("{} module instance(s) were never released: {}", .leaks.len(), describe_leaks(.leaks))]
    Leaked { leaks: Vec<(String, LifecycleStage)> },
}

fn describe_leaks(leaks: &[(String, LifecycleStage)]) -> String {
    leaks
        .iter()
        .map(|(name, stage)| format!("{} ({})", name, stage))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Main error type for enginekit
#[derive(Error, Debug)]
pub enum EngineKitError {
    /// Parameter and document errors (loading, validation)
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Registry and engine graph shape errors
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Illegal lifecycle transitions and hook failures
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Lookups inside an execution context
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// Post-run leak check failures
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),
}

/// Result type alias for enginekit operations
pub type Result<T> = std::result::Result<T, EngineKitError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParamErrorKind;

    #[test]
    fn test_cycle_display() {
        let err = StructuralError::CyclicDependency {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "Cyclic engine dependency: A -> B -> A");
    }

    #[test]
    fn test_batch_display_lists_every_issue() {
        let err = ConfigurationError::Parameters {
            issues: vec![
                ConfigIssue {
                    scope: "module 'a'".into(),
                    error: ParamError {
                        path: "x".into(),
                        kind: ParamErrorKind::Unsupported,
                    },
                },
                ConfigIssue {
                    scope: "module 'b'".into(),
                    error: ParamError {
                        path: "y".into(),
                        kind: ParamErrorKind::MissingRequired,
                    },
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 parameter error(s)"));
        assert!(msg.contains("module 'a': parameter 'x': unsupported parameter"));
        assert!(msg.contains("module 'b': parameter 'y': missing required parameter"));
    }

    #[test]
    fn test_leak_display() {
        let err = IntegrityError::Leaked {
            leaks: vec![("meshReader".into(), LifecycleStage::Initialized)],
        };
        assert!(err.to_string().contains("meshReader (INITIALIZED)"));
    }

    #[test]
    fn test_structural_conversion() {
        let err: EngineKitError = StructuralError::MissingRoot {
            name: "mainProcess".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Structural error: Root engine 'mainProcess' is not defined"
        );
    }
}
