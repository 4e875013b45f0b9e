//! Built-in lifecycle callbacks
//!
//! Registered once when the [`crate::Server`] is built. Most of them watch
//! nodes that exist both globally and per tenant, so they are registered on
//! every scope the deployment mode has.

use crate::audit::timestamp;
use crate::auth::hash_marked_leaf;
use crate::server::function_names;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use sztp_core::{CallbackContext, CallbackError, CallbackRegistry, DataPath, Mode, RefAction};
use sztp_crypto::{
    cross_check_key, decode_certificate_bundle, reconstruct_leaf_chain, reconstruct_root_chain, verify_key_pair,
    CertInfo, ChainError, CryptoError, PUBLIC_KEY_FORMAT_SPKI,
};
use sztp_plugins::PluginHost;
use sztp_state_store::{locate, ValidationLayer};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const EXPIRY_SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
const EXPIRY_SWEEP_INITIAL_DELAY: Duration = Duration::from_secs(60);
const EXPIRY_WARNING_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;

/// Lists whose entries carry `reference-statistics`
const REFERENCEABLE: &[&str] = &[
    "keystore/asymmetric-keys/asymmetric-key",
    "truststore/certificate-bags/certificate-bag",
    "device-types/device-type",
    "bootstrap-servers/bootstrap-server",
    "boot-images/boot-image",
    "scripts/pre-configuration-script",
    "scripts/post-configuration-script",
    "configurations/configuration",
    "conveyed-information-responses/redirect-information-response",
    "conveyed-information-responses/onboarding-information-response",
    "dynamic-callouts/dynamic-callout",
];

const ASYMMETRIC_KEY: &str = "keystore/asymmetric-keys/asymmetric-key";
const PLUGIN: &str = "/sztpd:preferences/system/plugins/plugin";

/// What the built-in callbacks need from the server
pub struct BuiltinContext {
    pub mode: Mode,
    pub plugins: Arc<PluginHost>,
    pub validator: Arc<dyn ValidationLayer>,
    pub restart: Arc<watch::Sender<u64>>,
}

/// Schema paths of a scoped node: global, plus per tenant in multi-tenant mode
fn scoped(mode: Mode, rel: &str) -> Vec<String> {
    let mut paths = vec![format!("/sztpd:{}", rel)];
    if mode == Mode::MultiTenant {
        paths.push(format!("/sztpd:tenants/tenant/{}", rel));
    }
    paths
}

pub fn register_builtin_callbacks(registry: &mut CallbackRegistry, ctx: BuiltinContext) {
    let BuiltinContext {
        mode,
        plugins,
        validator,
        restart,
    } = ctx;

    // credentials
    let password = "/sztpd:admin-accounts/admin-account/password";
    registry.register_create(password, hash_admin_password);
    registry.register_change(password, hash_admin_password);
    for path in scoped(mode, "devices/device/activation-code") {
        registry.register_create(&path, hash_activation_code);
        registry.register_change(&path, hash_activation_code);
    }

    if mode == Mode::MultiTenant {
        registry.register_create("/sztpd:tenants/tenant", seed_tenant);
    }

    // transport
    let listen = "/sztpd:transport/listen";
    let r = restart.clone();
    registry.register_create(listen, move |ctx: &mut CallbackContext<'_>| restart_listeners(&r, ctx));
    let r = restart.clone();
    registry.register_change(listen, move |ctx: &mut CallbackContext<'_>| restart_listeners(&r, ctx));
    let r = restart;
    registry.register_delete(listen, move |ctx: &mut CallbackContext<'_>| restart_listeners(&r, ctx));
    registry.register_delete("/sztpd:transport", |_ctx: &mut CallbackContext<'_>| {
        Err(CallbackError::not_supported(
            "Deleting the /transport node itself cannot be constrained by YANG.",
        ))
    });

    // plugins
    {
        let host = plugins.clone();
        registry.register_create(PLUGIN, move |ctx: &mut CallbackContext<'_>| {
            let name = key_of(ctx.path(), "plugin")?;
            host.load_plugin(&name).map_err(|e| CallbackError::plugin(e.to_string()))
        });
        let host = plugins.clone();
        registry.register_change(PLUGIN, move |ctx: &mut CallbackContext<'_>| {
            let name = key_of(ctx.path(), "plugin")?;
            host.load_plugin(&name).map_err(|e| CallbackError::plugin(e.to_string()))?;
            let functions = ctx.node.as_deref().map(function_names).unwrap_or_default();
            for function in functions {
                host.register_function(&name, function)
                    .map_err(|e| CallbackError::plugin(e.to_string()))?;
            }
            Ok(())
        });
        let host = plugins.clone();
        registry.register_delete(PLUGIN, move |ctx: &mut CallbackContext<'_>| {
            let name = key_of(ctx.path(), "plugin")?;
            host.unload_plugin(&name);
            Ok(())
        });

        let function = format!("{}/functions/function", PLUGIN);
        let host = plugins.clone();
        registry.register_create(&function, move |ctx: &mut CallbackContext<'_>| {
            let plugin = key_of(ctx.path(), "plugin")?;
            let function = key_of(ctx.path(), "function")?;
            host.register_function(&plugin, &function)
                .map_err(|e| CallbackError::plugin(e.to_string()))
        });
        let host = plugins;
        registry.register_delete(&function, move |ctx: &mut CallbackContext<'_>| {
            let plugin = key_of(ctx.path(), "plugin")?;
            let function = key_of(ctx.path(), "function")?;
            host.unregister_function(&plugin, &function);
            Ok(())
        });
    }

    // keystore
    for key in scoped(mode, ASYMMETRIC_KEY) {
        for leaf in ["public-key", "cleartext-private-key"] {
            let path = format!("{}/{}", key, leaf);
            let v = validator.clone();
            registry.register_create(&path, move |ctx: &mut CallbackContext<'_>| queue_key_checks(ctx, &v));
            let v = validator.clone();
            registry.register_change(&path, move |ctx: &mut CallbackContext<'_>| queue_key_checks(ctx, &v));
        }
        let path = format!("{}/certificates/certificate/cert-data", key);
        let v = validator.clone();
        registry.register_create(&path, move |ctx: &mut CallbackContext<'_>| check_end_entity_cert(ctx, &v));
        let v = validator.clone();
        registry.register_change(&path, move |ctx: &mut CallbackContext<'_>| check_end_entity_cert(ctx, &v));
    }

    // truststore
    for path in scoped(mode, "truststore/certificate-bags/certificate-bag/certificate/cert-data") {
        registry.register_create(&path, check_trust_anchor_cert);
        registry.register_change(&path, check_trust_anchor_cert);
    }

    // reference statistics
    for rel in REFERENCEABLE {
        for path in scoped(mode, rel) {
            registry.register_create(&path, seed_reference_statistics);
            registry.register_leafref(&path, count_reference);
        }
    }

    registry.register_onetime("certificate-expiry-initial", EXPIRY_SWEEP_INITIAL_DELAY, sweep_expiring_certificates);
    registry.register_periodic("certificate-expiry", EXPIRY_SWEEP_PERIOD, sweep_expiring_certificates);
}

fn restart_listeners(restart: &watch::Sender<u64>, ctx: &CallbackContext<'_>) -> Result<(), CallbackError> {
    info!(kind = ?ctx.event.kind, "Transport configuration changed, restarting listeners");
    restart.send_modify(|generation| *generation += 1);
    Ok(())
}

/// Key of the first segment named `list` in `path`
fn key_of(path: &DataPath, list: &str) -> Result<String, CallbackError> {
    path.segments()
        .iter()
        .find(|s| s.local_name() == list)
        .and_then(|s| s.key.clone())
        .ok_or_else(|| CallbackError::failed(format!("No \"{}\" key in {}", list, path)))
}

/// Path of the entry holding the leaf an event fired for
fn entry_path(ctx: &CallbackContext<'_>) -> DataPath {
    ctx.path().parent().unwrap_or_default()
}

fn hash_admin_password(ctx: &mut CallbackContext<'_>) -> Result<(), CallbackError> {
    let Some(account) = ctx.node.as_deref_mut() else {
        return Ok(());
    };
    hash_marked_leaf(account, "password")
        .map_err(|e| CallbackError::failed(format!("Unable to hash password: {}", e)))?;
    account["password-last-modified"] = json!(timestamp());
    Ok(())
}

fn hash_activation_code(ctx: &mut CallbackContext<'_>) -> Result<(), CallbackError> {
    let Some(device) = ctx.node.as_deref_mut() else {
        return Ok(());
    };
    hash_marked_leaf(device, "activation-code")
        .map_err(|e| CallbackError::failed(format!("Unable to hash activation code: {}", e)))?;
    Ok(())
}

fn seed_tenant(ctx: &mut CallbackContext<'_>) -> Result<(), CallbackError> {
    if let Some(tenant) = ctx.node.as_deref_mut().and_then(Value::as_object_mut) {
        tenant
            .entry("audit-log")
            .or_insert_with(|| json!({"log-entry": []}));
    }
    Ok(())
}

fn decode_binary(value: Option<&Value>, what: &str, at: &DataPath) -> Result<Vec<u8>, CallbackError> {
    let text = value
        .and_then(Value::as_str)
        .ok_or_else(|| CallbackError::failed(format!("Missing \"{}\" for {}", what, at)))?;
    STANDARD
        .decode(text)
        .map_err(|e| CallbackError::failed(format!("Unable to decode \"{}\" for {} ({})", what, at, e)))
}

/// Queue the pairing and certificate checks for the key whose
/// `public-key` or `cleartext-private-key` was written. Both are keyed on
/// the entry, so a key written in one request is checked once.
fn queue_key_checks(ctx: &mut CallbackContext<'_>, validator: &Arc<dyn ValidationLayer>) -> Result<(), CallbackError> {
    if ctx.node.is_none() {
        return Ok(());
    }
    let at = entry_path(ctx);
    let v = validator.clone();
    let key_path = at.clone();
    ctx.deferred.defer(format!("key-pair:{}", at), move |root: &Value| {
        match locate(root, v.schema(), &key_path) {
            Some(key) => check_key_pair(key, &key_path),
            None => Ok(()),
        }
    });
    defer_cross_check(ctx, at, validator);
    Ok(())
}

fn check_key_pair(key: &Value, at: &DataPath) -> Result<(), CallbackError> {
    // nothing to pair until both halves are present
    if key.get("public-key").is_none() || key.get("cleartext-private-key").is_none() {
        return Ok(());
    }
    let public_format = key.get("public-key-format").and_then(Value::as_str).unwrap_or_default();
    let private_format = key.get("private-key-format").and_then(Value::as_str).unwrap_or_default();
    let public = decode_binary(key.get("public-key"), "public-key", at)?;
    let private = decode_binary(key.get("cleartext-private-key"), "cleartext-private-key", at)?;

    verify_key_pair(&public, &private, public_format, private_format).map_err(|e| match e {
        CryptoError::KeyMismatch => CallbackError::failed(format!(
            "The asymmetric-key has a mismatched public/private key pair: {}",
            at
        )),
        CryptoError::UnsupportedFormat(_) if public_format != PUBLIC_KEY_FORMAT_SPKI => {
            CallbackError::failed(format!("Unsupported \"public-key-format\" ({}) for {}", public_format, at))
        }
        CryptoError::UnsupportedFormat(_) => CallbackError::failed(format!(
            "Unsupported \"private-key-format\" ({}) for {}",
            private_format, at
        )),
        other => CallbackError::failed(format!("Unable to verify the asymmetric-key {} ({})", at, other)),
    })
}

fn check_end_entity_cert(
    ctx: &mut CallbackContext<'_>,
    validator: &Arc<dyn ValidationLayer>,
) -> Result<(), CallbackError> {
    let at = entry_path(ctx);
    let Some(cert) = ctx.node.as_deref() else {
        return Ok(());
    };
    let bundle = decode_binary(cert.get("cert-data"), "cert-data", &at)?;
    let certs = decode_certificate_bundle(&bundle).map_err(|e| {
        CallbackError::failed(format!(
            "Parsing end entity certificate CMS structure failed for {} ({})",
            at, e
        ))
    })?;
    reconstruct_leaf_chain(&certs).map_err(|e| end_entity_error(e, &at))?;

    // the owning asymmetric-key: keystore/asymmetric-keys/asymmetric-key=NAME
    let depth = at
        .segments()
        .iter()
        .position(|s| s.name == "asymmetric-key")
        .map_or(at.len(), |i| i + 1);
    defer_cross_check(ctx, at.prefix(depth), validator);
    Ok(())
}

fn end_entity_error(err: ChainError, at: &DataPath) -> CallbackError {
    let msg = match err {
        ChainError::MissingLeaf => format!(
            "End entity certificates must encode a certificate having \"basic\" constraint \"ca\" with value \"False\": {}",
            at
        ),
        ChainError::MultipleLeaves(n) => format!(
            "End entity certificates must encode no more than one certificate having \"basic\" constraint \"ca\" with value \"False\" ({} found): {}",
            n, at
        ),
        ChainError::DuplicateIssuer(subject) => format!(
            "End entity certificates must not encode superfluous certificates.  CMS encodes multiple certificates having the same \"subject\" value ({}): {}",
            subject, at
        ),
        ChainError::Superfluous(_) => format!(
            "End entity certificates must not encode superfluous certificates.  Found certificates unconnected to chain from the \"leaf\" certificate: {}",
            at
        ),
        other => format!("Parsing end entity certificate CMS structure failed for {} ({})", at, other),
    };
    CallbackError::failed(msg)
}

/// Queue the check that every certificate of the key at `key_path` carries
/// the key's public key. Runs once per key and transaction, after all other
/// callbacks, so key and certificates may be written in either order.
fn defer_cross_check(ctx: &mut CallbackContext<'_>, key_path: DataPath, validator: &Arc<dyn ValidationLayer>) {
    let validator = validator.clone();
    let queued = ctx
        .deferred
        .defer(format!("cross-check:{}", key_path), move |root: &Value| {
            let Some(key) = locate(root, validator.schema(), &key_path) else {
                return Ok(());
            };
            cross_check_certificates(key, &key_path)
        });
    if queued {
        debug!(key = %ctx.path(), "deferred certificate cross-check");
    }
}

fn cross_check_certificates(key: &Value, key_path: &DataPath) -> Result<(), CallbackError> {
    let Some(public_key) = key.get("public-key") else {
        return Ok(());
    };
    let public_key = decode_binary(Some(public_key), "public-key", key_path)?;
    let certificates = key
        .get("certificates")
        .and_then(|c| c.get("certificate"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for cert in &certificates {
        let name = cert.get("name").and_then(Value::as_str).unwrap_or_default();
        let cert_path = key_path
            .child("certificates", None)
            .child("certificate", Some(name));
        let bundle = decode_binary(cert.get("cert-data"), "cert-data", &cert_path)?;
        let chain = decode_certificate_bundle(&bundle)
            .map_err(ChainError::from)
            .and_then(|certs| reconstruct_leaf_chain(&certs))
            .map_err(|e| end_entity_error(e, &cert_path))?;
        if cross_check_key(&chain, &public_key).is_err() {
            return Err(CallbackError::failed(format!(
                "End entity certificates must encode a \"leaf\" certificate having a public key matching the asymmetric key's public key: {}",
                cert_path
            )));
        }
    }
    Ok(())
}

fn check_trust_anchor_cert(ctx: &mut CallbackContext<'_>) -> Result<(), CallbackError> {
    let at = entry_path(ctx);
    let Some(cert) = ctx.node.as_deref() else {
        return Ok(());
    };
    let bundle = decode_binary(cert.get("cert-data"), "cert-data", &at)?;
    let certs = decode_certificate_bundle(&bundle).map_err(|e| {
        CallbackError::failed(format!(
            "Parsing trust anchor certificate CMS structure failed for {} ({})",
            at, e
        ))
    })?;
    reconstruct_root_chain(&certs).map_err(|e| {
        CallbackError::failed(match e {
            ChainError::MissingRoot => format!(
                "Trust anchor certificates must encode a root (self-signed) certificate: {}",
                at
            ),
            ChainError::MultipleRoots(n) => format!(
                "Trust anchor certificates must encode no more than one root (self-signed) certificate ({} found): {}",
                n, at
            ),
            ChainError::DuplicateIssuer(subject) => format!(
                "Trust anchor certificates must encode a single chain of certificates.  Found multiple certificates issued by \"{}\": {}",
                subject, at
            ),
            ChainError::Superfluous(_) => {
                format!("Trust anchor certificates must not encode superfluous certificates: {}", at)
            }
            other => format!(
                "Parsing trust anchor certificate CMS structure failed for {} ({})",
                at, other
            ),
        })
    })?;
    Ok(())
}

fn fresh_statistics() -> Value {
    json!({"reference-count": 0, "last-referenced": "never"})
}

fn seed_reference_statistics(ctx: &mut CallbackContext<'_>) -> Result<(), CallbackError> {
    if let Some(entry) = ctx.node.as_deref_mut().and_then(Value::as_object_mut) {
        entry
            .entry("reference-statistics")
            .or_insert_with(fresh_statistics);
    }
    Ok(())
}

fn count_reference(ctx: &mut CallbackContext<'_>) -> Result<(), CallbackError> {
    let action = ctx.event.ref_action;
    let Some(entry) = ctx.node.as_deref_mut().and_then(Value::as_object_mut) else {
        // the target went away in the same transaction
        return Ok(());
    };
    let stats = entry
        .entry("reference-statistics")
        .or_insert_with(fresh_statistics);
    let count = stats["reference-count"].as_u64().unwrap_or(0);
    match action {
        Some(RefAction::Added) => {
            stats["reference-count"] = json!(count + 1);
            stats["last-referenced"] = json!(timestamp());
        }
        Some(RefAction::Removed) => stats["reference-count"] = json!(count.saturating_sub(1)),
        None => {}
    }
    Ok(())
}

/// Warn about keystore and truststore certificates expiring soon
fn sweep_expiring_certificates(root: &Value) -> Result<(), CallbackError> {
    let now = chrono::Utc::now().timestamp();
    let mut bundles = Vec::new();
    collect_cert_data(root, &mut bundles);

    let mut expiring = 0;
    for bundle in bundles {
        let Ok(certs) = STANDARD
            .decode(bundle)
            .map_err(|e| e.to_string())
            .and_then(|der| decode_certificate_bundle(&der).map_err(|e| e.to_string()))
        else {
            continue;
        };
        for der in certs {
            let Ok(info) = CertInfo::parse(&der) else {
                continue;
            };
            let remaining = info.not_after - now;
            if remaining < EXPIRY_WARNING_WINDOW_SECS {
                expiring += 1;
                if remaining < 0 {
                    warn!(subject = %info.display, "Certificate has expired");
                } else {
                    warn!(subject = %info.display, days = remaining / 86_400, "Certificate expires soon");
                }
            }
        }
    }
    debug!(expiring, "certificate expiry sweep finished");
    Ok(())
}

fn collect_cert_data<'v>(value: &'v Value, out: &mut Vec<&'v str>) {
    match value {
        Value::Object(members) => {
            for (name, child) in members {
                match (name.as_str(), child) {
                    ("cert-data", Value::String(data)) => out.push(data),
                    _ => collect_cert_data(child, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_cert_data(item, out)),
        _ => {}
    }
}
