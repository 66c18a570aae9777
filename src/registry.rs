//! Type-Erased Module Registry
//!
//! The registry maps type names to [`ComponentDescriptor`]s and owns every
//! constructed module instance until it is released.
//!
//! # Design
//!
//! - **Capability set as a trait**: any type implementing [`Module`] can be
//!   registered. The bound is checked by the compiler at the `register` call,
//!   not on first use.
//! - **Erased storage**: descriptors hold a monomorphised constructor function
//!   pointer; instances are stored as `Box<dyn ErasedModule>`.
//! - **Sole owner**: callers only ever see a [`Handle`]. Every lifecycle
//!   transition goes through the registry, which checks it against
//!   [`LifecycleStage`].
//! - **No global state**: subsystems fill [`LocalCatalog`]s which are exported
//!   into an explicitly constructed registry at startup.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::StructuralError;
use crate::lifecycle::{LifecycleError, LifecycleStage, Operation};
use crate::schema::{ParamSchema, Params};

/// Capability set required of every pluggable module type.
///
/// `execute` is mandatory; `initialize` and `release` default to no-ops.
/// Hook errors are reported through the registry as
/// [`LifecycleError::HookFailed`].
///
/// # Example
///
/// ```
/// use enginekit::registry::{Module, Registry};
/// use enginekit::schema::{ParamSchema, ParamSpec, Params};
///
/// struct Probe {
///     depth: i64,
/// }
///
/// impl Module for Probe {
///     fn param_schema() -> ParamSchema {
///         ParamSchema::builder()
///             .param("depth", ParamSpec::integer().with_default(3))
///             .build()
///     }
///
///     fn construct(params: &Params) -> anyhow::Result<Self> {
///         let depth = params.get("depth").and_then(|v| v.as_i64()).unwrap_or(3);
///         Ok(Self { depth })
///     }
///
///     fn execute(&mut self) -> anyhow::Result<()> {
///         self.depth -= 1;
///         Ok(())
///     }
/// }
///
/// let mut registry = Registry::new();
/// registry.register::<Probe>("probe").unwrap();
///
/// let handle = registry.create("probe", &Params::new()).unwrap();
/// registry.initialize(handle).unwrap();
/// registry.execute(handle).unwrap();
/// registry.release(handle).unwrap();
/// assert!(registry.check_leaks().is_empty());
/// ```
pub trait Module: Sized + 'static {
    /// Parameters accepted by this type; callable without an instance
    fn param_schema() -> ParamSchema;

    /// Build an instance from its effective parameters
    fn construct(params: &Params) -> anyhow::Result<Self>;

    fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn execute(&mut self) -> anyhow::Result<()>;

    fn release(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Object-safe view of a constructed [`Module`]
pub trait ErasedModule {
    fn apply(&mut self, op: Operation) -> anyhow::Result<()>;
}

impl<M: Module> ErasedModule for M {
    fn apply(&mut self, op: Operation) -> anyhow::Result<()> {
        match op {
            Operation::Initialize => Module::initialize(self),
            Operation::Execute => Module::execute(self),
            Operation::Release => Module::release(self),
        }
    }
}

type ConstructFn = fn(&Params) -> anyhow::Result<Box<dyn ErasedModule>>;

fn construct_erased<M: Module>(params: &Params) -> anyhow::Result<Box<dyn ErasedModule>> {
    Ok(Box::new(M::construct(params)?))
}

/// Everything the registry knows about one module type
#[derive(Clone)]
pub struct ComponentDescriptor {
    type_name: String,
    schema: ParamSchema,
    construct: ConstructFn,
}

impl ComponentDescriptor {
    /// Describe `M` under `type_name`; the schema is produced once, here.
    pub fn of<M: Module>(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            schema: M::param_schema(),
            construct: construct_erased::<M>,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("type_name", &self.type_name)
            .field("params", &self.schema.len())
            .finish()
    }
}

/// Opaque reference to a tracked module instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Handle(u64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct InstanceRecord {
    type_name: String,
    stage: LifecycleStage,
    instance: Box<dyn ErasedModule>,
}

/// Descriptors gathered by one subsystem before export into the registry
#[derive(Debug, Default)]
pub struct LocalCatalog {
    subsystem: String,
    descriptors: Vec<ComponentDescriptor>,
}

impl LocalCatalog {
    /// Create an empty catalog for a subsystem
    pub fn new(subsystem: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            descriptors: Vec::new(),
        }
    }

    /// Add `M` under `type_name`
    pub fn register<M: Module>(mut self, type_name: impl Into<String>) -> Self {
        self.descriptors.push(ComponentDescriptor::of::<M>(type_name));
        self
    }

    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// Type names in registration order
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(ComponentDescriptor::type_name)
    }

    /// Move every descriptor into `registry`, returning how many were added.
    ///
    /// # Errors
    ///
    /// - `DuplicateModule` if a name is already registered
    /// - `InvalidSchema` if a type's schema is inconsistent
    pub fn export_into(self, registry: &mut Registry) -> Result<usize, StructuralError> {
        let count = self.descriptors.len();
        for descriptor in self.descriptors {
            registry.insert_descriptor(descriptor)?;
        }
        debug!(subsystem = %self.subsystem, count, "exported module catalog");
        Ok(count)
    }
}

/// Registry of module types and owner of their live instances
#[derive(Default)]
pub struct Registry {
    descriptors: BTreeMap<String, ComponentDescriptor>,
    instances: BTreeMap<Handle, InstanceRecord>,
    next_handle: u64,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.descriptors.keys().collect::<Vec<_>>())
            .field("tracked", &self.instances.len())
            .finish()
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from several subsystem catalogs
    pub fn with_catalogs(
        catalogs: impl IntoIterator<Item = LocalCatalog>,
    ) -> Result<Self, StructuralError> {
        let mut registry = Self::new();
        for catalog in catalogs {
            catalog.export_into(&mut registry)?;
        }
        Ok(registry)
    }

    /// Register `M` under `type_name`
    pub fn register<M: Module>(&mut self, type_name: impl Into<String>) -> Result<(), StructuralError> {
        self.insert_descriptor(ComponentDescriptor::of::<M>(type_name))
    }

    fn insert_descriptor(&mut self, descriptor: ComponentDescriptor) -> Result<(), StructuralError> {
        if self.descriptors.contains_key(&descriptor.type_name) {
            return Err(StructuralError::DuplicateModule {
                name: descriptor.type_name,
            });
        }
        descriptor
            .schema
            .check_structure()
            .map_err(|source| StructuralError::InvalidSchema {
                type_name: descriptor.type_name.clone(),
                source,
            })?;

        debug!(module = %descriptor.type_name, "registered module type");
        self.descriptors
            .insert(descriptor.type_name.clone(), descriptor);
        Ok(())
    }

    /// Returns true if `type_name` is registered
    pub fn contains(&self, type_name: &str) -> bool {
        self.descriptors.contains_key(type_name)
    }

    /// Registered type names in name order
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    /// Schema of a registered type
    pub fn schema(&self, type_name: &str) -> Option<&ParamSchema> {
        self.descriptors.get(type_name).map(ComponentDescriptor::schema)
    }

    /// Every registered schema keyed by type name
    pub fn schemas(&self) -> BTreeMap<&str, &ParamSchema> {
        self.descriptors
            .iter()
            .map(|(name, d)| (name.as_str(), &d.schema))
            .collect()
    }

    /// Construct an instance of `type_name`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the type is not registered
    /// - `ConstructionError` if the constructor fails
    pub fn create(&mut self, type_name: &str, params: &Params) -> Result<Handle, LifecycleError> {
        let construct = self
            .descriptors
            .get(type_name)
            .map(|d| d.construct)
            .ok_or_else(|| LifecycleError::NotFound {
                type_name: type_name.to_string(),
            })?;

        let instance = construct(params).map_err(|e| LifecycleError::ConstructionError {
            type_name: type_name.to_string(),
            reason: format!("{:#}", e),
        })?;

        let handle = self.allocate_handle();
        let record = InstanceRecord {
            type_name: type_name.to_string(),
            stage: LifecycleStage::Constructed,
            instance,
        };

        if let Some(previous) = self.instances.insert(handle, record) {
            warn!(
                %handle,
                previous = %previous.type_name,
                stage = %previous.stage,
                "handle collided with a live instance, previous record overwritten"
            );
        }

        debug!(module = %type_name, %handle, "constructed");
        Ok(handle)
    }

    pub fn initialize(&mut self, handle: Handle) -> Result<(), LifecycleError> {
        self.drive(handle, Operation::Initialize)
    }

    pub fn execute(&mut self, handle: Handle) -> Result<(), LifecycleError> {
        self.drive(handle, Operation::Execute)
    }

    /// Run the release hook and stop tracking the instance.
    ///
    /// If the hook fails the instance stays tracked in its current stage.
    pub fn release(&mut self, handle: Handle) -> Result<(), LifecycleError> {
        self.drive(handle, Operation::Release)
    }

    fn drive(&mut self, handle: Handle, op: Operation) -> Result<(), LifecycleError> {
        let record = self
            .instances
            .get_mut(&handle)
            .ok_or(LifecycleError::NotTracked { handle })?;

        let next = record.stage.transition(&record.type_name, op)?;

        if let Err(e) = record.instance.apply(op) {
            return Err(LifecycleError::HookFailed {
                module: record.type_name.clone(),
                operation: op,
                reason: format!("{:#}", e),
            });
        }

        debug!(module = %record.type_name, %handle, from = %record.stage, to = %next, "transition");
        record.stage = next;

        if next.is_terminal() {
            self.instances.remove(&handle);
        }
        Ok(())
    }

    /// Current stage of a tracked instance
    pub fn stage(&self, handle: Handle) -> Option<LifecycleStage> {
        self.instances.get(&handle).map(|r| r.stage)
    }

    /// Number of instances currently tracked
    pub fn tracked_count(&self) -> usize {
        self.instances.len()
    }

    /// Every tracked instance that has not been released, in handle order.
    pub fn check_leaks(&self) -> Vec<(String, LifecycleStage)> {
        self.instances
            .values()
            .filter(|r| r.stage.is_live())
            .map(|r| (r.type_name.clone(), r.stage))
            .collect()
    }

    fn allocate_handle(&mut self) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        handle
    }
}
