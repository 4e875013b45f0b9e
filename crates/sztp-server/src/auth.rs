//! Credentials: HTTP Basic parsing and one-way password hashes
//!
//! Passwords and activation codes are stored as argon2 PHC strings.
//! Clients submit a plaintext value by prefixing it with `$0$`; the
//! built-in callbacks hash it before the commit completes.

use crate::request::RestconfRequest;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::header;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use sztp_core::percent_decode;
use sztp_crypto::certs_from_pem;
use tracing::debug;

/// Prefix marking a value that still has to be hashed
pub const PLAINTEXT_MARKER: &str = "$0$";

/// Header carrying the client certificate when TLS terminates at a proxy
pub const CLIENT_CERT_HEADER: &str = "x-client-cert";

pub fn hash_password(plaintext: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())?;
    Ok(Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)?
        .to_string())
}

/// Check `plaintext` against a stored PHC string. Unparseable hashes never match.
pub fn verify_password(plaintext: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(hash) => Argon2::default()
            .verify_password(plaintext.as_bytes(), &hash)
            .is_ok(),
        Err(e) => {
            debug!("stored hash is not a PHC string: {}", e);
            false
        }
    }
}

/// Replace a `$0$`-marked leaf of `entry` with its hash. Returns whether it did.
pub fn hash_marked_leaf(entry: &mut Value, leaf: &str) -> Result<bool, argon2::password_hash::Error> {
    let Some(plaintext) = entry
        .get(leaf)
        .and_then(Value::as_str)
        .and_then(|v| v.strip_prefix(PLAINTEXT_MARKER))
        .map(str::to_string)
    else {
        return Ok(false);
    };
    entry[leaf] = Value::String(hash_password(&plaintext)?);
    Ok(true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// HTTP Basic credentials of a request: `Ok(None)` without an
/// `Authorization` header, `Err` if the header is not valid Basic.
pub fn basic_credentials(req: &RestconfRequest) -> Result<Option<BasicCredentials>, String> {
    let Some(value) = req.header_str(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))
        .ok_or_else(|| "Only Basic authorization is supported.".to_string())?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| "Malformed Basic authorization header.".to_string())?;
    let decoded = String::from_utf8(decoded).map_err(|_| "Malformed Basic authorization header.".to_string())?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| "Malformed Basic authorization header.".to_string())?;
    Ok(Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    }))
}

/// Client certificate chain: from the TLS handshake, or when `trust_header`
/// is set, from the URL-encoded PEM in `X-Client-Cert`.
pub fn client_certificates(req: &RestconfRequest, trust_header: bool) -> Result<Vec<Vec<u8>>, String> {
    if !req.peer_certs.is_empty() {
        return Ok(req.peer_certs.clone());
    }
    if !trust_header {
        return Ok(Vec::new());
    }
    let Some(encoded) = req.header_str(CLIENT_CERT_HEADER) else {
        return Ok(Vec::new());
    };
    let pem = percent_decode(encoded).map_err(|e| format!("Unable to decode client certificate header: {}", e))?;
    certs_from_pem(pem.as_bytes()).map_err(|e| format!("Unable to parse client certificate header: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Uri};
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    use serde_json::json;

    fn request() -> RestconfRequest {
        let uri: Uri = "/restconf".parse().unwrap();
        RestconfRequest::new(Method::GET, &uri)
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("secret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("Secret", &hash));
        assert!(!verify_password("secret", "secret"));
    }

    #[test]
    fn test_hash_marked_leaf() {
        let mut entry = json!({"name": "admin", "password": "$0$hunter2"});
        assert!(hash_marked_leaf(&mut entry, "password").unwrap());
        let stored = entry["password"].as_str().unwrap().to_string();
        assert!(verify_password("hunter2", &stored));
        // already hashed values are left alone
        assert!(!hash_marked_leaf(&mut entry, "password").unwrap());
        assert_eq!(entry["password"], stored.as_str());
    }

    #[test]
    fn test_basic_credentials() {
        assert_eq!(basic_credentials(&request()).unwrap(), None);

        let req = request().header(header::AUTHORIZATION, &format!("Basic {}", STANDARD.encode("SN-1:code:x")));
        let creds = basic_credentials(&req).unwrap().unwrap();
        assert_eq!(creds.username, "SN-1");
        assert_eq!(creds.password, "code:x");

        let req = request().header(header::AUTHORIZATION, "Bearer abc");
        assert!(basic_credentials(&req).is_err());
        let req = request().header(header::AUTHORIZATION, "Basic !!!");
        assert!(basic_credentials(&req).is_err());
    }

    #[test]
    fn test_client_cert_header_needs_trust() {
        let rcgen::CertifiedKey { cert, .. } =
            rcgen::generate_simple_self_signed(vec!["device".to_string()]).unwrap();
        let encoded = utf8_percent_encode(&cert.pem(), NON_ALPHANUMERIC).to_string();
        let req = request().header(CLIENT_CERT_HEADER.parse().unwrap(), &encoded);

        assert!(client_certificates(&req, false).unwrap().is_empty());
        let certs = client_certificates(&req, true).unwrap();
        assert_eq!(certs, vec![cert.der().to_vec()]);
    }
}
