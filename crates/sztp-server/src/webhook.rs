//! Webhook relay for progress notifications
//!
//! Each webhook of a dynamic callout is tried in configured order until one
//! answers 200. Every attempt is recorded for the bootstrapping log.

use crate::encoding::Encoding;
use axum::http::header;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

const RELAY_PATH: &str = "/relay-notification";

/// `host[:port]` with IPv6 literals bracketed
fn authority(address: &str, port: Option<u64>) -> String {
    let host = if address.contains(':') && !address.starts_with('[') {
        format!("[{}]", address)
    } else {
        address.to_string()
    };
    match port {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}

/// Relay `notification` to the webhooks of a `webhooks` container.
/// Returns one result entry per attempted webhook.
pub async fn relay_notification(client: &reqwest::Client, webhooks: &Value, notification: &Value) -> Vec<Value> {
    let encoding = match webhooks.get("encoding").and_then(Value::as_str) {
        Some("xml") => Encoding::Xml,
        _ => Encoding::Json,
    };
    let document = json!({"sztpd-rpcs:input": {"notification": notification}});
    let body = match encoding.encode(&document) {
        Ok(body) => body,
        Err(e) => {
            warn!("Unable to encode webhook notification: {}", e);
            return Vec::new();
        }
    };

    let mut results = Vec::new();
    for webhook in webhooks
        .get("webhook")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let name = webhook.get("name").and_then(Value::as_str).unwrap_or_default();
        let mut result = Map::new();
        result.insert("name".into(), json!(name));

        if let Some(https) = webhook.get("https") {
            let remote = https.get("tcp-client-parameters");
            let address = remote
                .and_then(|r| r.get("remote-address"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let port = remote.and_then(|r| r.get("remote-port")).and_then(Value::as_u64);
            result.insert("uri".into(), json!(format!("https://{}{}", authority(address, port), RELAY_PATH)));
            result.insert("connection-error".into(), json!("HTTPS webhooks are not supported"));
            results.push(Value::Object(result));
            continue;
        }

        let remote = webhook.get("http").and_then(|h| h.get("tcp-client-parameters"));
        let Some(address) = remote.and_then(|r| r.get("remote-address")).and_then(Value::as_str) else {
            result.insert("connection-error".into(), json!("webhook has no remote-address"));
            results.push(Value::Object(result));
            continue;
        };
        let port = remote.and_then(|r| r.get("remote-port")).and_then(Value::as_u64);
        let uri = format!("http://{}{}", authority(address, port), RELAY_PATH);
        result.insert("uri".into(), json!(uri));

        debug!(webhook = name, %uri, "relaying notification");
        let response = client
            .post(&uri)
            .header(header::CONTENT_TYPE.as_str(), encoding.media_type())
            .header(header::ACCEPT.as_str(), encoding.media_type())
            .body(body.clone())
            .send()
            .await;
        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                result.insert("http-status-code".into(), json!(status));
                results.push(Value::Object(result));
                if status == 200 {
                    break;
                }
                warn!(webhook = name, status, "webhook rejected notification");
            }
            Err(e) => {
                warn!(webhook = name, "webhook unreachable: {}", e);
                result.insert("connection-error".into(), json!(e.to_string()));
                results.push(Value::Object(result));
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority() {
        assert_eq!(authority("hooks.example", Some(8080)), "hooks.example:8080");
        assert_eq!(authority("2001:db8::1", Some(80)), "[2001:db8::1]:80");
        assert_eq!(authority("[2001:db8::1]", None), "[2001:db8::1]");
        assert_eq!(authority("192.0.2.1", None), "192.0.2.1");
    }

    #[tokio::test]
    async fn test_https_is_recorded_not_attempted() {
        let webhooks = json!({
            "webhook": [{
                "name": "secure",
                "https": {"tcp-client-parameters": {"remote-address": "hooks.example", "remote-port": 443}}
            }]
        });
        let results = relay_notification(&reqwest::Client::new(), &webhooks, &json!({})).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["uri"], "https://hooks.example:443/relay-notification");
        assert_eq!(results[0]["connection-error"], "HTTPS webhooks are not supported");
    }
}
