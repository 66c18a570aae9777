//! Property-Based Tests for enginekit
//!
//! These tests verify:
//! - Enum string round-trips (to_string → parse)
//! - Schema defaults always validate against their own schema
//! - Validation is idempotent and always reports missing required keys
//! - The registry's lifecycle bookkeeping matches the stage model

use proptest::prelude::*;
use serde_json::Value;

use enginekit::lifecycle::{LifecycleError, LifecycleStage, Operation};
use enginekit::registry::{Module, Registry};
use enginekit::schema::{ParamErrorKind, ParamSchema, ParamSpec, ParamType, Params};

// =============================================================================
// Enum Property Tests
// =============================================================================

fn stage_strategy() -> impl Strategy<Value = LifecycleStage> {
    prop_oneof![
        Just(LifecycleStage::Constructed),
        Just(LifecycleStage::Initialized),
        Just(LifecycleStage::Executed),
        Just(LifecycleStage::Released),
    ]
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Initialize),
        Just(Operation::Execute),
        Just(Operation::Release),
    ]
}

fn param_type_strategy() -> impl Strategy<Value = ParamType> {
    prop_oneof![
        Just(ParamType::String),
        Just(ParamType::Number),
        Just(ParamType::Integer),
        Just(ParamType::Boolean),
        Just(ParamType::Array),
        Just(ParamType::Object),
    ]
}

proptest! {
    /// LifecycleStage: to_string → parse round-trip is identity
    #[test]
    fn stage_roundtrip(stage in stage_strategy()) {
        let parsed: LifecycleStage = stage.to_string().parse().expect("Should parse");
        prop_assert_eq!(stage, parsed);
    }

    /// ParamType: Display matches the JSON schema spelling
    #[test]
    fn param_type_roundtrip(kind in param_type_strategy()) {
        let s = kind.to_string();
        prop_assert_eq!(&s, &s.to_lowercase());
        let from_json: ParamType = serde_json::from_value(Value::from(s.clone())).expect("Should parse");
        prop_assert_eq!(kind, from_json);
    }

    /// Released never has a successor
    #[test]
    fn released_is_terminal(op in operation_strategy()) {
        prop_assert_eq!(LifecycleStage::Released.after(op), None);
    }
}

// =============================================================================
// Schema Property Tests
// =============================================================================

/// Strategy for leaves whose default satisfies their own constraints
fn leaf_strategy() -> impl Strategy<Value = ParamSpec> {
    prop_oneof![
        "[a-z]{0,6}".prop_map(|s| ParamSpec::string().with_default(s)),
        (-1000i64..1000, 0i64..100, 0i64..100).prop_map(|(d, below, above)| {
            ParamSpec::integer()
                .with_range((d - below) as f64, (d + above) as f64)
                .with_default(d)
        }),
        (-1000.0f64..1000.0).prop_map(|d| ParamSpec::number().with_minimum(d - 1.0).with_default(d)),
        any::<bool>().prop_map(|b| ParamSpec::boolean().with_default(b)),
        prop::collection::vec("[a-z]{1,4}", 0..4).prop_map(|v| {
            ParamSpec::array()
                .with_items(ParamSpec::string())
                .with_default(Value::from(v))
        }),
        "[a-z]{1,6}".prop_map(|s| {
            ParamSpec::string()
                .with_enum([s.clone(), "fallback".to_string()])
                .with_default(s)
        }),
    ]
}

fn schema_strategy() -> impl Strategy<Value = ParamSchema> {
    prop::collection::btree_map("[a-z]{1,8}", (leaf_strategy(), any::<bool>()), 0..8).prop_map(
        |leaves| {
            leaves
                .into_iter()
                .fold(ParamSchema::builder(), |builder, (name, (spec, required))| {
                    builder.param(name, if required { spec.required() } else { spec })
                })
                .build()
        },
    )
}

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        (-1.0e6f64..1.0e6).prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
        prop::collection::vec(any::<i32>(), 0..3).prop_map(Value::from),
    ]
}

fn params_strategy() -> impl Strategy<Value = Params> {
    prop::collection::btree_map("[a-z]{1,8}", value_strategy(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    /// Generated schemas are structurally valid
    #[test]
    fn generated_schemas_are_consistent(schema in schema_strategy()) {
        prop_assert!(schema.check_structure().is_ok());
    }

    /// defaults() is complete and valid for its own schema
    #[test]
    fn defaults_validate(schema in schema_strategy()) {
        let defaults = schema.defaults();
        prop_assert_eq!(defaults.len(), schema.len());
        prop_assert!(schema.validate(&defaults).is_empty());
    }

    /// Schemas survive a JSON round-trip unchanged
    #[test]
    fn schema_json_roundtrip(schema in schema_strategy()) {
        let json = serde_json::to_string(&schema).expect("Should serialize");
        let parsed = ParamSchema::from_json(&json).expect("Should parse");
        prop_assert_eq!(schema, parsed);
    }

    /// Validating the same parameters twice gives the same errors
    #[test]
    fn validate_is_idempotent(schema in schema_strategy(), params in params_strategy()) {
        prop_assert_eq!(schema.validate(&params), schema.validate(&params));
    }

    /// Every required key left out is reported, and nothing else is missing
    #[test]
    fn missing_required_always_reported(schema in schema_strategy()) {
        let required: Vec<String> = schema
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.clone())
            .collect();

        let mut params = schema.defaults();
        for name in &required {
            params.remove(name);
        }

        let missing: Vec<String> = schema
            .validate(&params)
            .into_iter()
            .filter(|e| e.kind == ParamErrorKind::MissingRequired)
            .map(|e| e.path)
            .collect();
        prop_assert_eq!(missing, required);
    }

    /// Keys the schema does not declare are always rejected
    #[test]
    fn undeclared_keys_rejected(schema in schema_strategy(), params in params_strategy()) {
        let errors = schema.validate(&params);
        for key in params.keys().filter(|k| !schema.declares(k)) {
            prop_assert!(errors
                .iter()
                .any(|e| &e.path == key && e.kind == ParamErrorKind::Unsupported));
        }
    }
}

// =============================================================================
// Lifecycle Property Tests
// =============================================================================

struct Inert;

impl Module for Inert {
    fn param_schema() -> ParamSchema {
        ParamSchema::new()
    }

    fn construct(_params: &Params) -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn execute(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

proptest! {
    /// The registry follows the stage model for any sequence of operations,
    /// and reports a leak exactly while the instance is tracked
    #[test]
    fn registry_follows_stage_model(ops in prop::collection::vec(operation_strategy(), 0..12)) {
        let mut registry = Registry::new();
        registry.register::<Inert>("inert").expect("Should register");
        let handle = registry.create("inert", &Params::new()).expect("Should create");

        let mut model = Some(LifecycleStage::Constructed);
        for op in ops {
            let result = match op {
                Operation::Initialize => registry.initialize(handle),
                Operation::Execute => registry.execute(handle),
                Operation::Release => registry.release(handle),
            };

            match model.map(|stage| (stage, stage.after(op))) {
                None => {
                    let is_not_tracked = matches!(result, Err(LifecycleError::NotTracked { .. }));
                    prop_assert!(is_not_tracked);
                }
                Some((_, Some(LifecycleStage::Released))) => {
                    prop_assert!(result.is_ok());
                    model = None;
                }
                Some((_, Some(next))) => {
                    prop_assert!(result.is_ok());
                    model = Some(next);
                }
                Some((stage, None)) => {
                    let is_invalid = matches!(
                        result,
                        Err(LifecycleError::InvalidState { stage: s, operation, .. })
                            if s == stage && operation == op
                    );
                    prop_assert!(is_invalid);
                }
            }

            prop_assert_eq!(registry.stage(handle), model);
            prop_assert_eq!(registry.check_leaks().is_empty(), model.is_none());
        }
    }
}
