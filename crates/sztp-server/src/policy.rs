//! Bootstrap policy: matched responses and their criteria
//!
//! A response-manager is an ordered list of [`MatchedResponse`] entries.
//! The first entry whose criteria all hold for the device's input wins; an
//! entry without criteria always matches.

use crate::conveyed;
use crate::error::HandlerError;
use crate::server::Server;
use serde_json::{json, Map, Value};
use sztp_core::{ErrorTag, Scope};
use sztp_plugins::{CalloutReply, PluginError};
use sztp_state_store::validation::scalar_text;
use tracing::{debug, warn};

/// One `match` entry of a matched response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchCriterion {
    /// The input carries the field
    Present(String),
    /// The input does not carry the field
    Absent(String),
    /// The field is present and equals the value
    Eq(String, String),
    /// The field is present and differs from the value
    Ne(String, String),
}

impl MatchCriterion {
    /// Parse `{key, present?, not?, value?}`
    pub fn from_config(entry: &Value) -> Option<Self> {
        let key = entry.get("key").and_then(Value::as_str)?.to_string();
        let negated = entry.get("not").is_some();
        Some(match entry.get("value") {
            Some(value) if negated => MatchCriterion::Ne(key, scalar_text(value)),
            Some(value) => MatchCriterion::Eq(key, scalar_text(value)),
            None if negated => MatchCriterion::Absent(key),
            None => MatchCriterion::Present(key),
        })
    }

    pub fn key(&self) -> &str {
        match self {
            MatchCriterion::Present(k)
            | MatchCriterion::Absent(k)
            | MatchCriterion::Eq(k, _)
            | MatchCriterion::Ne(k, _) => k,
        }
    }

    pub fn matches(&self, input: &Map<String, Value>) -> bool {
        let field = input.get(self.key()).map(scalar_text);
        match self {
            MatchCriterion::Present(_) => field.is_some(),
            MatchCriterion::Absent(_) => field.is_none(),
            MatchCriterion::Eq(_, value) => field.as_deref() == Some(value),
            MatchCriterion::Ne(_, value) => field.is_some_and(|f| &f != value),
        }
    }
}

/// What a matched response answers with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Explicitly no bootstrapping data
    None,
    /// Name of a `redirect-information-response`
    Redirect(String),
    /// Name of an `onboarding-information-response`
    Onboarding(String),
    /// Name of a `dynamic-callout`
    DynamicCallout(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedResponse {
    pub name: String,
    pub criteria: Vec<MatchCriterion>,
    pub body: ResponseBody,
}

impl MatchedResponse {
    pub fn from_config(entry: &Value) -> Result<Self, HandlerError> {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::internal("matched-response without a name"))?
            .to_string();
        let criteria = entry
            .get("match-criteria")
            .and_then(|c| c.get("match"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(MatchCriterion::from_config)
            .collect();
        let body = ResponseBody::from_config(entry.get("response"))
            .ok_or_else(|| HandlerError::internal(format!("matched-response \"{}\" has no usable response", name)))?;
        Ok(Self { name, criteria, body })
    }

    /// Criteria are evaluated against the input's members; without input
    /// only an entry free of criteria matches.
    pub fn matches(&self, input: Option<&Map<String, Value>>) -> bool {
        if self.criteria.is_empty() {
            return true;
        }
        match input {
            Some(input) => self.criteria.iter().all(|c| c.matches(input)),
            None => false,
        }
    }
}

/// First matching entry, in configured order
pub fn select<'a>(responses: &'a [MatchedResponse], input: Option<&Map<String, Value>>) -> Option<&'a MatchedResponse> {
    responses.iter().find(|r| r.matches(input))
}

/// Everything a response needs to resolve itself
pub struct ResolveContext<'a> {
    pub server: &'a Server,
    /// Where the referenced responses live
    pub scope: &'a Scope,
    pub serial_number: Option<&'a str>,
    pub source_ip: String,
    pub input: Option<&'a Map<String, Value>>,
    /// Identity certificate presented by the device (base64 CMS)
    pub identity_certificate: Option<String>,
}

impl ResponseBody {
    /// Parse a `response` container
    pub fn from_config(response: Option<&Value>) -> Option<Self> {
        let response = response?;
        if response.get("none").is_some() {
            return Some(ResponseBody::None);
        }
        let conveyed = response.get("conveyed-information")?;
        let reference = |choice: &str| {
            conveyed
                .get(choice)
                .and_then(|c| c.get("reference"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        reference("redirect-information")
            .map(ResponseBody::Redirect)
            .or_else(|| reference("onboarding-information").map(ResponseBody::Onboarding))
            .or_else(|| reference("dynamic-callout").map(ResponseBody::DynamicCallout))
    }

    /// Resolve to conveyed information, e.g.
    /// `{"ietf-sztp-conveyed-info:onboarding-information": {...}}`.
    /// What was done is recorded in `details` for the bootstrapping log.
    pub async fn resolve(&self, ctx: &ResolveContext<'_>, details: &mut Map<String, Value>) -> Result<Value, HandlerError> {
        let dal = ctx.server.dal.as_ref();
        match self {
            ResponseBody::None => Err(HandlerError::application(
                404,
                ErrorTag::DataMissing,
                "No matching responses configured.",
            )),
            ResponseBody::Redirect(name) => {
                details.insert(
                    "conveyed-information".into(),
                    json!({"redirect-information": {"reference": name}}),
                );
                conveyed::redirect_information(dal, ctx.scope, name).await
            }
            ResponseBody::Onboarding(name) => {
                details.insert(
                    "conveyed-information".into(),
                    json!({"onboarding-information": {"reference": name}}),
                );
                conveyed::onboarding_information(dal, ctx.scope, name).await
            }
            ResponseBody::DynamicCallout(name) => {
                let mut callout_details = Map::new();
                callout_details.insert("reference".into(), json!(name));
                let result = resolve_callout(ctx, name, &mut callout_details).await;
                details.insert(
                    "conveyed-information".into(),
                    json!({"dynamic-callout": Value::Object(callout_details)}),
                );
                result
            }
        }
    }
}

async fn resolve_callout(
    ctx: &ResolveContext<'_>,
    name: &str,
    details: &mut Map<String, Value>,
) -> Result<Value, HandlerError> {
    let callout = conveyed::dynamic_callout(ctx.server.dal.as_ref(), ctx.scope, name).await?;
    if let Some(rpcs) = callout.get("rpc-supported").and_then(Value::as_array) {
        details.insert("rpc-supported".into(), Value::Array(rpcs.clone()));
    }

    if callout.get("webhooks").is_some() {
        details.insert("callout-type".into(), json!("webhook"));
        return Err(HandlerError::application(
            501,
            ErrorTag::OperationNotSupported,
            "Webhook-based dynamic callouts are not supported for \"get-bootstrapping-data\".",
        ));
    }
    let callback = callout
        .get("callback")
        .ok_or_else(|| HandlerError::internal(format!("dynamic-callout \"{}\" has no callout type", name)))?;
    let plugin = callback.get("plugin").and_then(Value::as_str).unwrap_or_default();
    let function = callback.get("function").and_then(Value::as_str).unwrap_or_default();
    details.insert("callout-type".into(), json!("callback"));
    details.insert("callback-details".into(), json!({"plugin": plugin, "function": function}));

    let mut input = Map::new();
    if let Some(serial) = ctx.serial_number {
        input.insert("serial-number".into(), json!(serial));
    }
    input.insert("source-ip-address".into(), json!(ctx.source_ip));
    if let Some(from_device) = ctx.input {
        input.insert("from-device".into(), Value::Object(from_device.clone()));
    }
    if let Some(cert) = &ctx.identity_certificate {
        input.insert("identity-certificate".into(), json!(cert));
    }
    let input = Value::Object(input);

    debug!(plugin, function, "invoking dynamic callout");
    match ctx.server.plugins.invoke(plugin, function, &input).await {
        Ok(CalloutReply::ConveyedInformation(conveyed)) => {
            details.insert("callback-results".into(), json!({"exited-normally": "returned conveyed-information"}));
            Ok(conveyed)
        }
        Ok(CalloutReply::RestconfErrors(errors)) => {
            let tag = sztp_core::restconf::first_error_tag(&errors).unwrap_or("operation-failed");
            let status = ErrorTag::parse(tag).map_or(500, |t| t.http_status());
            details.insert(
                "callback-results".into(),
                json!({"exited-normally": format!("returned RESTCONF errors ({})", tag)}),
            );
            Err(HandlerError::passthrough(status, errors))
        }
        Err(PluginError::Callout(e)) => {
            warn!(plugin, function, "dynamic callout failed: {}", e);
            details.insert("callback-results".into(), json!({"exception-thrown": e.to_string()}));
            Err(HandlerError::application(
                500,
                ErrorTag::OperationNotSupported,
                format!("Server encountered an error while trying to generate a response: {}", e),
            ))
        }
        Err(e) => {
            details.insert("callback-results".into(), json!({"exception-thrown": e.to_string()}));
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, criteria: Value) -> MatchedResponse {
        MatchedResponse::from_config(&json!({
            "name": name,
            "match-criteria": {"match": criteria},
            "response": {"none": [null]}
        }))
        .unwrap()
    }

    fn input(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_criterion_parsing() {
        assert_eq!(
            MatchCriterion::from_config(&json!({"key": "hw-model", "present": [null]})),
            Some(MatchCriterion::Present("hw-model".into()))
        );
        assert_eq!(
            MatchCriterion::from_config(&json!({"key": "hw-model", "present": [null], "not": [null]})),
            Some(MatchCriterion::Absent("hw-model".into()))
        );
        assert_eq!(
            MatchCriterion::from_config(&json!({"key": "os-name", "value": "x"})),
            Some(MatchCriterion::Eq("os-name".into(), "x".into()))
        );
        assert_eq!(
            MatchCriterion::from_config(&json!({"key": "os-name", "value": "x", "not": [null]})),
            Some(MatchCriterion::Ne("os-name".into(), "x".into()))
        );
    }

    #[test]
    fn test_criteria_evaluation() {
        let fields = input(json!({"os-name": "x", "nonce": "1"}));
        assert!(MatchCriterion::Present("nonce".into()).matches(&fields));
        assert!(MatchCriterion::Absent("hw-model".into()).matches(&fields));
        assert!(!MatchCriterion::Absent("nonce".into()).matches(&fields));
        assert!(MatchCriterion::Ne("os-name".into(), "y".into()).matches(&fields));
        assert!(!MatchCriterion::Ne("hw-model".into(), "y".into()).matches(&fields));
    }

    #[test]
    fn test_first_match_wins() {
        let responses = vec![
            entry("A", json!([{"key": "x", "value": "1"}])),
            entry("B", json!([])),
            entry("C", json!([{"key": "x", "value": "2"}])),
        ];
        let x2 = input(json!({"x": "2"}));
        assert_eq!(select(&responses, Some(&x2)).unwrap().name, "B");
        assert_eq!(select(&responses, None).unwrap().name, "B");

        let without_catch_all = vec![responses[0].clone(), responses[2].clone()];
        assert_eq!(select(&without_catch_all, Some(&x2)).unwrap().name, "C");
        assert!(select(&without_catch_all, None).is_none());
    }

    #[test]
    fn test_response_body_parsing() {
        assert_eq!(
            ResponseBody::from_config(Some(&json!({"conveyed-information": {"onboarding-information": {"reference": "ob"}}}))),
            Some(ResponseBody::Onboarding("ob".into()))
        );
        assert_eq!(
            ResponseBody::from_config(Some(&json!({"conveyed-information": {"dynamic-callout": {"reference": "dc"}}}))),
            Some(ResponseBody::DynamicCallout("dc".into()))
        );
        assert_eq!(ResponseBody::from_config(Some(&json!({"none": [null]}))), Some(ResponseBody::None));
        assert_eq!(ResponseBody::from_config(None), None);
    }
}
