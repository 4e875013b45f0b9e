//! Plugin host
//!
//! Plugins are compiled-in [`PluginModule`] implementations looked up by
//! name in a catalog of factories. Loading instantiates the module; the
//! functions named in configuration are then registered one by one. A
//! function is resolved again on every invocation, so callouts never keep a
//! reference to a plugin that has since been unloaded or reloaded.

use crate::callout::{Callout, CalloutReply};
use crate::error::{PluginError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// A named attribute of a plugin module
#[derive(Clone)]
pub enum PluginAttribute {
    Function(Arc<dyn Callout>),
    /// A non-callable attribute, e.g. a version string
    Value(Value),
}

/// An instantiated plugin
pub trait PluginModule: Send + Sync {
    fn attribute(&self, name: &str) -> Option<PluginAttribute>;
}

/// Builds a fresh module instance, or reports why it cannot be built
pub type PluginFactory = fn() -> std::result::Result<Box<dyn PluginModule>, String>;

struct LoadedPlugin {
    module: Box<dyn PluginModule>,
    functions: HashMap<String, Arc<dyn Callout>>,
}

/// Catalog of available plugins plus the currently loaded ones
#[derive(Default)]
pub struct PluginHost {
    catalog: HashMap<String, PluginFactory>,
    loaded: RwLock<HashMap<String, LoadedPlugin>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host whose catalog holds the built-in plugins
    pub fn with_builtins() -> Self {
        let mut host = Self::new();
        crate::builtin::register(&mut host);
        host
    }

    /// Make a module available under `name`
    pub fn register_module(&mut self, name: &str, factory: PluginFactory) {
        debug!("Registering plugin module: {}", name);
        self.catalog.insert(name.to_string(), factory);
    }

    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.catalog.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Instantiate `name`, replacing (and dropping the functions of) any
    /// previously loaded instance.
    pub fn load_plugin(&self, name: &str) -> Result<()> {
        let factory = self
            .catalog
            .get(name)
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;
        let module = factory().map_err(|reason| PluginError::PluginSyntaxError {
            plugin: name.to_string(),
            reason,
        })?;

        let mut loaded = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        if loaded.remove(name).is_some() {
            info!("Reloading plugin: {}", name);
        } else {
            info!("Loaded plugin: {}", name);
        }
        loaded.insert(
            name.to_string(),
            LoadedPlugin {
                module,
                functions: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Returns whether the plugin was loaded
    pub fn unload_plugin(&self, name: &str) -> bool {
        let removed = self
            .loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            info!("Unloaded plugin: {}", name);
        }
        removed
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Expose `function` of the loaded `plugin` to callouts
    pub fn register_function(&self, plugin: &str, function: &str) -> Result<()> {
        let mut loaded = self.loaded.write().unwrap_or_else(PoisonError::into_inner);
        let entry = loaded
            .get_mut(plugin)
            .ok_or_else(|| PluginError::PluginNotLoaded(plugin.to_string()))?;
        match entry.module.attribute(function) {
            Some(PluginAttribute::Function(callout)) => {
                entry.functions.insert(function.to_string(), callout);
                debug!(plugin, function, "registered plugin function");
                Ok(())
            }
            Some(PluginAttribute::Value(_)) => Err(PluginError::FunctionNotCallable(function.to_string())),
            None => Err(PluginError::function_not_found(plugin, function)),
        }
    }

    pub fn unregister_function(&self, plugin: &str, function: &str) -> bool {
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(plugin)
            .is_some_and(|entry| entry.functions.remove(function).is_some())
    }

    /// Currently registered function, if any
    pub fn lookup(&self, plugin: &str, function: &str) -> Result<Arc<dyn Callout>> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(plugin)
            .and_then(|entry| entry.functions.get(function).cloned())
            .ok_or_else(|| PluginError::function_not_found(plugin, function))
    }

    /// Resolve and call a registered function
    pub async fn invoke(&self, plugin: &str, function: &str, input: &Value) -> Result<CalloutReply> {
        // the lock is released before awaiting the callout
        let callout = self.lookup(plugin, function)?;
        debug!(plugin, function, "invoking callout");
        Ok(callout.call(input).await?)
    }
}
