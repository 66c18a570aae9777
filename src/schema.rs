//! Parameter Schemas
//!
//! Every module type publishes a [`ParamSchema`] describing the parameters it
//! accepts. The schema is the contract between the configuration document and
//! the module constructor:
//!
//! - Unknown parameter names are rejected
//! - Supplied values are type-checked, then checked against enum, minimum and
//!   maximum constraints
//! - Required parameters must be supplied
//! - Everything else falls back to the declared default
//!
//! Validation never stops at the first problem. [`ParamSchema::validate`]
//! returns every violation so a whole configuration can be fixed in one pass.
//!
//! # Schema Format
//!
//! ```json
//! {
//!   "cfl": { "type": "number", "minimum": 0.01, "maximum": 10, "default": 0.8 },
//!   "scheme": { "type": "string", "enum": ["upwind", "central"], "default": "upwind" },
//!   "turbulence": {
//!     "type": "object",
//!     "default": { "model": "none" },
//!     "properties": {
//!       "model": { "type": "string", "enum": ["none", "kEpsilon"], "default": "none" }
//!     }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// Parameter document handed to module constructors.
pub type Params = serde_json::Map<String, Value>;

/// Declared type of a schema leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Returns true if `value` is of this type.
    ///
    /// `number` accepts any JSON number, `integer` only whole numbers.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Returns true for types that accept minimum/maximum bounds
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Integer)
    }
}

/// Name of a JSON value's type, as used in error messages
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single parameter constraint violation
#[derive(Error, Debug, Clone, PartialEq)]
#[error("parameter '{path}': {kind}")]
pub struct ParamError {
    /// Dotted path to the offending value (`turbulence.model`, `fields[1]`)
    pub path: String,
    pub kind: ParamErrorKind,
}

/// What went wrong with a parameter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamErrorKind {
    #[error("unsupported parameter")]
    Unsupported,

    #[error("expected {expected}, found {actual}")]
    TypeMismatch {
        expected: ParamType,
        actual: &'static str,
    },

    #[error("value {actual} is not one of [{}]", join_values(.allowed))]
    NotInEnum { allowed: Vec<Value>, actual: Value },

    #[error("value {actual} is below minimum {minimum}")]
    BelowMinimum { minimum: f64, actual: Value },

    #[error("value {actual} exceeds maximum {maximum}")]
    AboveMaximum { maximum: f64, actual: Value },

    #[error("missing required parameter")]
    MissingRequired,
}

/// Errors in the schema itself (as opposed to the parameters it validates)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A leaf declares contradictory or impossible constraints
    #[error("invalid schema for parameter '{path}': {reason}")]
    InvalidSpec { path: String, reason: String },

    /// The schema document is not valid JSON for a schema
    #[error("invalid schema format: {reason}")]
    InvalidFormat { reason: String },
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        SchemaError::InvalidFormat {
            reason: err.to_string(),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Constraints for one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    /// Declared JSON type
    #[serde(rename = "type")]
    pub kind: ParamType,

    /// Human-readable description for tooling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Allowed values
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,

    /// Inclusive lower bound (numeric types only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Inclusive upper bound (numeric types only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Value used when the parameter is not supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Whether the parameter must be supplied explicitly
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,

    /// Element constraints for arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParamSpec>>,

    /// Nested schema for objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<ParamSchema>,
}

impl ParamSpec {
    /// Complete `value` with the defaults of nested properties and array items
    fn fill_defaults(&self, value: &mut Value) {
        match value {
            Value::Object(members) => {
                if let Some(ref properties) = self.properties {
                    properties.fill_members(members);
                }
            }
            Value::Array(elements) => {
                if let Some(ref items) = self.items {
                    for element in elements {
                        items.fill_defaults(element);
                    }
                }
            }
            _ => {}
        }
    }

    /// Create an unconstrained leaf of the given type
    pub fn new(kind: ParamType) -> Self {
        Self {
            kind,
            description: None,
            allowed: None,
            minimum: None,
            maximum: None,
            default: None,
            required: false,
            items: None,
            properties: None,
        }
    }

    pub fn string() -> Self {
        Self::new(ParamType::String)
    }

    pub fn number() -> Self {
        Self::new(ParamType::Number)
    }

    pub fn integer() -> Self {
        Self::new(ParamType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(ParamType::Boolean)
    }

    pub fn array() -> Self {
        Self::new(ParamType::Array)
    }

    pub fn object() -> Self {
        Self::new(ParamType::Object)
    }

    /// Set the default value
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set inclusive bounds
    pub fn with_range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    /// Set an inclusive lower bound only
    pub fn with_minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    /// Restrict to a set of values
    pub fn with_enum<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach a description
    pub fn described(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Constrain array elements
    pub fn with_items(mut self, items: ParamSpec) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    /// Constrain object members
    pub fn with_properties(mut self, properties: ParamSchema) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Check one supplied value, appending every violation to `errors`.
    ///
    /// A type mismatch stops the checks for this value; the remaining
    /// constraints only make sense for a value of the declared type.
    pub fn check(&self, path: &str, value: &Value, errors: &mut Vec<ParamError>) {
        if !self.kind.accepts(value) {
            errors.push(ParamError {
                path: path.to_string(),
                kind: ParamErrorKind::TypeMismatch {
                    expected: self.kind,
                    actual: json_kind(value),
                },
            });
            return;
        }

        if let Some(ref allowed) = self.allowed {
            if !allowed.contains(value) {
                errors.push(ParamError {
                    path: path.to_string(),
                    kind: ParamErrorKind::NotInEnum {
                        allowed: allowed.clone(),
                        actual: value.clone(),
                    },
                });
            }
        }

        if self.kind.is_numeric() {
            if let Some(actual) = value.as_f64() {
                if let Some(minimum) = self.minimum {
                    if actual < minimum {
                        errors.push(ParamError {
                            path: path.to_string(),
                            kind: ParamErrorKind::BelowMinimum {
                                minimum,
                                actual: value.clone(),
                            },
                        });
                    }
                }
                if let Some(maximum) = self.maximum {
                    if actual > maximum {
                        errors.push(ParamError {
                            path: path.to_string(),
                            kind: ParamErrorKind::AboveMaximum {
                                maximum,
                                actual: value.clone(),
                            },
                        });
                    }
                }
            }
        }

        match (self.kind, value) {
            (ParamType::Array, Value::Array(elements)) => {
                if let Some(ref items) = self.items {
                    for (i, element) in elements.iter().enumerate() {
                        items.check(&format!("{}[{}]", path, i), element, errors);
                    }
                }
            }
            (ParamType::Object, Value::Object(members)) => {
                if let Some(ref properties) = self.properties {
                    properties.validate_into(path, members, errors);
                }
            }
            _ => {}
        }
    }

    fn check_structure(&self, path: &str) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidSpec {
            path: path.to_string(),
            reason,
        };

        if !self.kind.is_numeric() && (self.minimum.is_some() || self.maximum.is_some()) {
            return Err(invalid(format!(
                "minimum/maximum are only allowed on numeric types, not {}",
                self.kind
            )));
        }
        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(invalid(format!("minimum {} is greater than maximum {}", min, max)));
            }
        }
        if let Some(ref allowed) = self.allowed {
            if allowed.is_empty() {
                return Err(invalid("enum must list at least one value".to_string()));
            }
            if let Some(bad) = allowed.iter().find(|v| !self.kind.accepts(v)) {
                return Err(invalid(format!("enum value {} is not a {}", bad, self.kind)));
            }
        }
        if self.items.is_some() && self.kind != ParamType::Array {
            return Err(invalid("items is only allowed on arrays".to_string()));
        }
        if self.properties.is_some() && self.kind != ParamType::Object {
            return Err(invalid("properties is only allowed on objects".to_string()));
        }
        if self.required && self.default.is_none() {
            return Err(invalid("required parameters must declare a default".to_string()));
        }

        if let Some(ref items) = self.items {
            items.check_structure(&format!("{}[]", path))?;
        }
        if let Some(ref properties) = self.properties {
            properties.check_structure_at(path)?;
        }

        if let Some(ref default) = self.default {
            let mut errors = Vec::new();
            self.check(path, default, &mut errors);
            if let Some(first) = errors.first() {
                return Err(invalid(format!("default is not valid: {}", first.kind)));
            }
        }

        Ok(())
    }
}

/// Mapping from parameter name to its constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSchema {
    params: BTreeMap<String, ParamSpec>,
}

impl ParamSchema {
    /// Create an empty schema (a module without parameters)
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a schema
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parse a schema from JSON and check its structure
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let schema: Self = serde_json::from_str(json)?;
        schema.check_structure()?;
        Ok(schema)
    }

    /// Look up one parameter's constraints
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    /// Returns true if the schema declares `name`
    pub fn declares(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Iterate parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamSpec)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Validate supplied parameters, returning every violation found.
    ///
    /// Pass one walks the supplied keys (unsupported names, types, enum and
    /// range constraints, nested values); pass two walks the schema for
    /// required parameters that were not supplied.
    pub fn validate(&self, params: &Params) -> Vec<ParamError> {
        let mut errors = Vec::new();
        self.validate_into("", params, &mut errors);
        errors
    }

    fn validate_into(&self, prefix: &str, params: &Params, errors: &mut Vec<ParamError>) {
        for (key, value) in params {
            let path = join_path(prefix, key);
            match self.params.get(key) {
                Some(spec) => spec.check(&path, value, errors),
                None => errors.push(ParamError {
                    path,
                    kind: ParamErrorKind::Unsupported,
                }),
            }
        }

        for (key, spec) in &self.params {
            if spec.required && !params.contains_key(key) {
                errors.push(ParamError {
                    path: join_path(prefix, key),
                    kind: ParamErrorKind::MissingRequired,
                });
            }
        }
    }

    /// Direct default values of this schema.
    ///
    /// Only top-level leaves contribute; an object leaf contributes its own
    /// `default`, never the defaults of its nested `properties`.
    pub fn defaults(&self) -> Params {
        self.params
            .iter()
            .filter_map(|(name, spec)| spec.default.clone().map(|d| (name.clone(), d)))
            .collect()
    }

    /// Defaults overlaid with the supplied parameters.
    ///
    /// A supplied object keeps its own members and gains the defaults of any
    /// nested `properties` it leaves out, at every depth.
    pub fn with_defaults(&self, params: &Params) -> Params {
        let mut effective = self.defaults();
        for (key, value) in params {
            let mut value = value.clone();
            if let Some(spec) = self.params.get(key) {
                spec.fill_defaults(&mut value);
            }
            effective.insert(key.clone(), value);
        }
        effective
    }

    fn fill_members(&self, members: &mut Params) {
        for (name, spec) in &self.params {
            match members.get_mut(name) {
                Some(value) => spec.fill_defaults(value),
                None => {
                    if let Some(default) = &spec.default {
                        let mut default = default.clone();
                        spec.fill_defaults(&mut default);
                        members.insert(name.clone(), default);
                    }
                }
            }
        }
    }

    /// Check that every leaf's constraints are consistent and its default valid
    pub fn check_structure(&self) -> Result<(), SchemaError> {
        self.check_structure_at("")
    }

    fn check_structure_at(&self, prefix: &str) -> Result<(), SchemaError> {
        for (name, spec) in &self.params {
            spec.check_structure(&join_path(prefix, name))?;
        }
        Ok(())
    }
}

/// Builder for [`ParamSchema`]
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    params: BTreeMap<String, ParamSpec>,
}

impl SchemaBuilder {
    /// Declare a parameter (a later declaration of the same name wins)
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    /// Finish the schema.
    ///
    /// Structure is checked when the schema is registered, see
    /// [`ParamSchema::check_structure`].
    pub fn build(self) -> ParamSchema {
        ParamSchema {
            params: self.params,
        }
    }
}
