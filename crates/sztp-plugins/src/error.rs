use crate::callout::CalloutError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugin \"{0}\" not found")]
    PluginNotFound(String),

    #[error("Plugin \"{plugin}\" failed to load: {reason}")]
    PluginSyntaxError { plugin: String, reason: String },

    #[error("Plugin \"{0}\" is not loaded")]
    PluginNotLoaded(String),

    #[error("The plugin \"{plugin}\" does not have a function named \"{function}\"")]
    FunctionNotFound { plugin: String, function: String },

    #[error("The plugin function name \"{0}\" is not callable")]
    FunctionNotCallable(String),

    #[error(transparent)]
    Callout(#[from] CalloutError),
}

impl PluginError {
    pub fn function_not_found(plugin: &str, function: &str) -> Self {
        PluginError::FunctionNotFound {
            plugin: plugin.to_string(),
            function: function.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
