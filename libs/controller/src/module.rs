//! Modules
//!
//! A module is a named unit of functionality. During `init_modules` the
//! controller creates one instance per enabled name from the
//! [`ModuleCatalog`], applies its configured parameters, then lets it
//! register operation and subscription handlers in the [`Registry`].

use crate::error::{ControllerError, Result};
use crate::registry::Registry;
use schedule::Schedule;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use transit_config::ModuleParams;

/// Declared configuration parameter of a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    /// Rendered default, shown in introspection only
    pub default: Option<String>,
}

impl ParamSpec {
    pub fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, description: &'static str, default: impl ToString) -> Self {
        Self {
            name,
            description,
            required: false,
            default: Some(default.to_string()),
        }
    }
}

/// Read-only view handed to [`Module::init`]
#[derive(Clone)]
pub struct InitContext {
    schedule: Option<Arc<Schedule>>,
    thread_hint: usize,
    module_id: String,
}

impl InitContext {
    pub fn new(schedule: Option<Arc<Schedule>>, thread_hint: usize) -> Self {
        Self {
            schedule,
            thread_hint,
            module_id: String::new(),
        }
    }

    pub(crate) fn for_module(&self, module_id: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            ..self.clone()
        }
    }

    /// Id of the module being initialized
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Schedule loaded at the time modules are initialized, if any
    pub fn schedule(&self) -> Option<&Arc<Schedule>> {
        self.schedule.as_ref()
    }

    /// Suggested parallelism for any precomputation a module performs
    pub fn thread_hint(&self) -> usize {
        self.thread_hint.max(1)
    }
}

pub trait Module: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Identifier used in configuration and `init_modules`
    fn id(&self) -> &str;

    fn params(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// Apply one parameter value; only called for declared names
    fn set_param(&mut self, name: &str, _value: &str) -> std::result::Result<(), String> {
        Err(format!("parameter {} is not settable", name))
    }

    fn init(&mut self, registry: &mut Registry, ctx: &InitContext) -> Result<()>;
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// Validate and apply `params` against the module's declared parameters.
///
/// Unknown keys, missing required parameters and values the module rejects
/// are all configuration errors.
pub fn configure_module(module: &mut dyn Module, params: &ModuleParams) -> Result<()> {
    let specs = module.params();
    let id = module.id().to_string();

    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    for key in keys {
        if !specs.iter().any(|spec| spec.name == key.as_str()) {
            return Err(ControllerError::configuration(&id, format!("unknown parameter {}", key)));
        }
    }

    for spec in specs.iter().filter(|spec| spec.required) {
        if !params.contains_key(spec.name) {
            return Err(ControllerError::configuration(
                &id,
                format!("missing required parameter {}", spec.name),
            ));
        }
    }

    for spec in &specs {
        if let Some(value) = params.get(spec.name) {
            module
                .set_param(spec.name, value)
                .map_err(|reason| ControllerError::configuration(&id, format!("{}: {}", spec.name, reason)))?;
            debug!(module = %id, param = spec.name, "Applied module parameter");
        }
    }

    Ok(())
}

pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Known module constructors, keyed by module id
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: Vec<(String, ModuleFactory)>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constructor; a later registration under the same id replaces it
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        let id = id.into();
        let factory: ModuleFactory = Arc::new(factory);
        match self.factories.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = factory,
            None => self.factories.push((id, factory)),
        }
        self
    }

    pub fn with<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.register(id, factory);
        self
    }

    pub fn create(&self, id: &str) -> Option<Box<dyn Module>> {
        self.factories
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, factory)| factory())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.iter().any(|(existing, _)| existing == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.factories.iter().map(|(id, _)| id.as_str()).collect()
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog").field("ids", &self.ids()).finish()
    }
}
