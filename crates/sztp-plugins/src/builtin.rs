//! Built-in plugins
//!
//! `sztpd_builtin` ships with the daemon so dynamic callouts can be wired up
//! without custom code:
//!
//! - `echo_input`: returns the callout input as conveyed information
//! - `deny_all`: answers every device with an `access-denied` error
//! - `log_notification`: logs a progress report and returns nothing
//! - `version`: a value attribute (not callable)

use crate::callout::{CalloutReply, FnCallout};
use crate::host::{PluginAttribute, PluginHost, PluginModule};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub const BUILTIN_PLUGIN: &str = "sztpd_builtin";

pub fn register(host: &mut PluginHost) {
    host.register_module(BUILTIN_PLUGIN, || Ok(Box::new(Builtin)));
}

struct Builtin;

impl PluginModule for Builtin {
    fn attribute(&self, name: &str) -> Option<PluginAttribute> {
        let function: Arc<dyn crate::callout::Callout> = match name {
            "echo_input" => Arc::new(FnCallout(|input: &Value| {
                Ok(CalloutReply::ConveyedInformation(input.clone()))
            })),
            "deny_all" => Arc::new(FnCallout(|input: &Value| {
                let serial = input
                    .get("serial-number")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                Ok(CalloutReply::RestconfErrors(json!({
                    "ietf-restconf:errors": {
                        "error": [{
                            "error-type": "application",
                            "error-tag": "access-denied",
                            "error-message": format!("device \"{}\" is not permitted to bootstrap", serial),
                        }]
                    }
                })))
            })),
            "log_notification" => Arc::new(FnCallout(|input: &Value| {
                info!(notification = %input, "progress report relayed");
                Ok(CalloutReply::ConveyedInformation(Value::Null))
            })),
            "version" => return Some(PluginAttribute::Value(json!(env!("CARGO_PKG_VERSION")))),
            _ => return None,
        };
        Some(PluginAttribute::Function(function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_functions() {
        let host = PluginHost::with_builtins();
        host.load_plugin(BUILTIN_PLUGIN).unwrap();
        host.register_function(BUILTIN_PLUGIN, "deny_all").unwrap();

        let reply = host
            .invoke(BUILTIN_PLUGIN, "deny_all", &json!({"serial-number": "SN-9"}))
            .await
            .unwrap();
        let CalloutReply::RestconfErrors(doc) = reply else {
            panic!("expected restconf errors");
        };
        assert_eq!(doc["ietf-restconf:errors"]["error"][0]["error-tag"], "access-denied");
        assert!(host.register_function(BUILTIN_PLUGIN, "version").is_err());
    }
}
