//! Conveyed information (RFC 8572 section 2.2)
//!
//! Responses stored in the datastore hold references into the scope's
//! bootstrap-servers, boot-images, scripts and configurations. They are
//! expanded here into the `ietf-sztp-conveyed-info` documents devices
//! receive, then wrapped into a CMS ContentInfo.

use crate::encoding::Encoding;
use crate::error::HandlerError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};
use sztp_core::{DataPath, ErrorTag, Scope};
use sztp_crypto::{encode_content_info, ContentType};
use sztp_state_store::{DalError, DataAccessLayer};

pub const REDIRECT_INFORMATION: &str = "ietf-sztp-conveyed-info:redirect-information";
pub const ONBOARDING_INFORMATION: &str = "ietf-sztp-conveyed-info:onboarding-information";

fn entry_path(scope: &Scope, list: &str, name: &str) -> DataPath {
    let (container, entry) = list.rsplit_once('/').unwrap_or(("", list));
    scope.path(container).child(entry, Some(name))
}

/// Configuration of a referenced entry. Leafref integrity makes a missing
/// entry a server fault rather than a client one.
async fn referenced(dal: &dyn DataAccessLayer, scope: &Scope, list: &str, name: &str) -> Result<Value, HandlerError> {
    let path = entry_path(scope, list, name);
    match dal.get_config(&path).await {
        Ok(value) => Ok(value),
        Err(DalError::NodeNotFound(_)) => Err(HandlerError::internal(format!(
            "Referenced node \"{}\" does not exist.",
            path
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn dynamic_callout(dal: &dyn DataAccessLayer, scope: &Scope, name: &str) -> Result<Value, HandlerError> {
    referenced(dal, scope, "dynamic-callouts/dynamic-callout", name).await
}

/// `{"ietf-sztp-conveyed-info:redirect-information": {"bootstrap-server": [...]}}`
pub async fn redirect_information(dal: &dyn DataAccessLayer, scope: &Scope, name: &str) -> Result<Value, HandlerError> {
    let response = referenced(
        dal,
        scope,
        "conveyed-information-responses/redirect-information-response",
        name,
    )
    .await?;
    let references = response
        .pointer("/redirect-information/bootstrap-server")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut servers = Vec::with_capacity(references.len());
    for reference in references.iter().filter_map(Value::as_str) {
        let server = referenced(dal, scope, "bootstrap-servers/bootstrap-server", reference).await?;
        let mut entry = Map::new();
        for leaf in ["address", "port", "trust-anchor"] {
            if let Some(value) = server.get(leaf) {
                entry.insert(leaf.into(), value.clone());
            }
        }
        servers.push(Value::Object(entry));
    }
    Ok(json!({ REDIRECT_INFORMATION: {"bootstrap-server": servers} }))
}

/// `{"ietf-sztp-conveyed-info:onboarding-information": {...}}`
pub async fn onboarding_information(dal: &dyn DataAccessLayer, scope: &Scope, name: &str) -> Result<Value, HandlerError> {
    let response = referenced(
        dal,
        scope,
        "conveyed-information-responses/onboarding-information-response",
        name,
    )
    .await?;
    let refs = response.get("onboarding-information").cloned().unwrap_or_else(|| json!({}));
    let reference = |leaf: &str| refs.get(leaf).and_then(Value::as_str).map(str::to_string);

    let mut info = Map::new();
    if let Some(name) = reference("boot-image") {
        let image = referenced(dal, scope, "boot-images/boot-image", &name).await?;
        let mut boot_image = Map::new();
        for leaf in ["os-name", "os-version", "download-uri", "image-verification"] {
            if let Some(value) = image.get(leaf) {
                boot_image.insert(leaf.into(), value.clone());
            }
        }
        info.insert("boot-image".into(), Value::Object(boot_image));
    }
    if let Some(name) = reference("pre-configuration-script") {
        let script = referenced(dal, scope, "scripts/pre-configuration-script", &name).await?;
        if let Some(body) = script.get("script") {
            info.insert("pre-configuration-script".into(), body.clone());
        }
    }
    if let Some(name) = reference("configuration") {
        let configuration = referenced(dal, scope, "configurations/configuration", &name).await?;
        if let Some(handling) = configuration.get("configuration-handling") {
            info.insert("configuration-handling".into(), handling.clone());
        }
        if let Some(config) = configuration.get("config") {
            info.insert("configuration".into(), config.clone());
        }
    }
    if let Some(name) = reference("post-configuration-script") {
        let script = referenced(dal, scope, "scripts/post-configuration-script", &name).await?;
        if let Some(body) = script.get("script") {
            info.insert("post-configuration-script".into(), body.clone());
        }
    }
    Ok(json!({ ONBOARDING_INFORMATION: Value::Object(info) }))
}

/// Wrap conveyed information into the RPC output: the document is encoded,
/// placed in a ContentInfo typed by that encoding and base64 encoded.
pub fn package(conveyed: &Value, encoding: Encoding) -> Result<Value, HandlerError> {
    if conveyed.get(REDIRECT_INFORMATION).is_none() && conveyed.get(ONBOARDING_INFORMATION).is_none() {
        return Err(HandlerError::application(
            500,
            ErrorTag::OperationFailed,
            "Dynamic callout returned neither redirect-information nor onboarding-information.",
        ));
    }
    let encoded = encoding
        .encode(conveyed)
        .map_err(|e| HandlerError::internal(format!("Unable to encode conveyed information: {}", e)))?;
    let content_type = match encoding {
        Encoding::Json => ContentType::ConveyedInfoJson,
        Encoding::Xml => ContentType::ConveyedInfoXml,
    };
    let content_info = encode_content_info(content_type, encoded.as_bytes())
        .map_err(|e| HandlerError::internal(format!("Unable to encode conveyed information: {}", e)))?;
    Ok(json!({
        "ietf-sztp-bootstrap-server:output": {
            "conveyed-information": STANDARD.encode(content_info)
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sztp_crypto::decode_content_info;

    #[test]
    fn test_entry_path() {
        let scope = Scope::Tenant("acme".into());
        assert_eq!(
            entry_path(&scope, "boot-images/boot-image", "img 1").to_string(),
            "/sztpd:tenants/tenant=acme/boot-images/boot-image=img%201"
        );
        assert_eq!(
            entry_path(&Scope::Global, "scripts/pre-configuration-script", "s").to_string(),
            "/sztpd:scripts/pre-configuration-script=s"
        );
    }

    #[test]
    fn test_package_wraps_content_info() {
        let conveyed = json!({REDIRECT_INFORMATION: {"bootstrap-server": [{"address": "sztp2.example"}]}});
        let output = package(&conveyed, Encoding::Json).unwrap();
        let b64 = output["ietf-sztp-bootstrap-server:output"]["conveyed-information"]
            .as_str()
            .unwrap();
        let (content_type, content) = decode_content_info(&STANDARD.decode(b64).unwrap()).unwrap();
        assert_eq!(content_type, ContentType::ConveyedInfoJson);
        let decoded: Value = serde_json::from_slice(&content).unwrap();
        assert_eq!(decoded, conveyed);
    }

    #[test]
    fn test_package_rejects_foreign_documents() {
        let err = package(&json!({"x:y": {}}), Encoding::Json).unwrap_err();
        assert_eq!(err.status, 500);
    }
}
