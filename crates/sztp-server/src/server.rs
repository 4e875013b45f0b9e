//! The shared server context
//!
//! One [`Server`] is built at startup and shared as `Arc<Server>` by both
//! planes, the scheduler and the listener restart loop. The callback
//! registry is populated here and frozen afterwards.

use crate::callbacks::{register_builtin_callbacks, BuiltinContext};
use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use sztp_core::{CallbackRegistry, DataPath, FifoGate, Mode, Transaction};
use sztp_plugins::PluginHost;
use sztp_state_store::{
    sztpd_schema, DalError, DataAccessLayer, MemoryStore, SchemaValidator, ValidationLayer,
};
use tokio::sync::watch;
use tracing::{info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    /// Honour the `sleep` query parameter on both planes
    pub test_mode: bool,
    /// Accept the client certificate from the `X-Client-Cert` header
    pub trust_client_cert_header: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::MultiDevice,
            test_mode: false,
            trust_client_cert_header: false,
        }
    }
}

/// A bootstrap-plane endpoint from `/sztpd:transport/listen`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenEndpoint {
    pub name: String,
    pub address: String,
    pub port: u16,
}

pub struct Server {
    pub(crate) dal: Arc<dyn DataAccessLayer>,
    pub(crate) val: Arc<dyn ValidationLayer>,
    pub(crate) gate: FifoGate,
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) plugins: Arc<PluginHost>,
    pub(crate) http: reqwest::Client,
    pub(crate) settings: Settings,
    restart: Arc<watch::Sender<u64>>,
}

impl Server {
    pub fn new(
        dal: Arc<dyn DataAccessLayer>,
        val: Arc<dyn ValidationLayer>,
        plugins: PluginHost,
        settings: Settings,
    ) -> Arc<Self> {
        let plugins = Arc::new(plugins);
        let (restart, _) = watch::channel(0u64);
        let restart = Arc::new(restart);

        let mut callbacks = CallbackRegistry::new();
        register_builtin_callbacks(
            &mut callbacks,
            BuiltinContext {
                mode: settings.mode,
                plugins: plugins.clone(),
                validator: val.clone(),
                restart: restart.clone(),
            },
        );

        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to a default webhook client: {}", e);
                reqwest::Client::new()
            });

        Arc::new(Self {
            dal,
            val,
            gate: FifoGate::new(),
            callbacks,
            plugins,
            http,
            settings,
            restart,
        })
    }

    /// Non-persistent server over an empty datastore, with the built-in plugins
    pub fn in_memory(settings: Settings) -> Arc<Self> {
        let val: Arc<dyn ValidationLayer> =
            Arc::new(SchemaValidator::new(Arc::new(sztpd_schema(settings.mode))));
        let dal = Arc::new(MemoryStore::new(val.clone()));
        Self::new(dal, val, PluginHost::with_builtins(), settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    pub fn dal(&self) -> &Arc<dyn DataAccessLayer> {
        &self.dal
    }

    pub fn gate(&self) -> &FifoGate {
        &self.gate
    }

    pub fn plugins(&self) -> &PluginHost {
        &self.plugins
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// A write transaction over the frozen callback registry
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction::new(&self.callbacks)
    }

    /// Receiver bumped whenever `/sztpd:transport/listen` changes
    pub fn subscribe_restart(&self) -> watch::Receiver<u64> {
        self.restart.subscribe()
    }

    /// Load the plugins configured in the datastore and register their
    /// functions. Failures are logged and skipped. Returns the number loaded.
    pub async fn load_plugins(&self) -> Result<usize> {
        let path = DataPath::root().join("preferences/system/plugins/plugin");
        let plugins = match self.dal.get_config(&path).await {
            Ok(Value::Array(plugins)) => plugins,
            Ok(_) | Err(DalError::NodeNotFound(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut loaded = 0;
        for plugin in &plugins {
            let Some(name) = plugin.get("name").and_then(Value::as_str) else {
                continue;
            };
            if let Err(e) = self.plugins.load_plugin(name) {
                warn!(plugin = name, "Failed to load plugin: {}", e);
                continue;
            }
            loaded += 1;
            for function in function_names(plugin) {
                if let Err(e) = self.plugins.register_function(name, function) {
                    warn!(plugin = name, function, "Failed to register function: {}", e);
                }
            }
        }
        info!("Loaded {} of {} configured plugins", loaded, plugins.len());
        Ok(loaded)
    }

    /// Bootstrap-plane endpoints currently configured
    pub async fn listen_endpoints(&self) -> Result<Vec<ListenEndpoint>> {
        let path = DataPath::root().join("transport/listen/endpoint");
        let endpoints = match self.dal.get_config(&path).await {
            Ok(Value::Array(endpoints)) => endpoints,
            Ok(_) | Err(DalError::NodeNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(endpoints
            .iter()
            .filter_map(|e| {
                Some(ListenEndpoint {
                    name: e.get("name")?.as_str()?.to_string(),
                    address: e.get("address")?.as_str()?.to_string(),
                    port: u16::try_from(e.get("port")?.as_u64()?).ok()?,
                })
            })
            .collect())
    }
}

/// Names of the `functions/function` entries of a plugin entry
pub(crate) fn function_names(plugin: &Value) -> Vec<&str> {
    plugin
        .get("functions")
        .and_then(|f| f.get("function"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|f| f.get("name").and_then(Value::as_str))
        .collect()
}
