//! TLS configuration
//!
//! Server credentials come either from PEM files or from DER material taken
//! out of the datastore keystore. The bootstrap plane asks devices for a
//! client certificate but accepts the handshake without one; the identity
//! chain is validated later against the device type's trust anchors.

use crate::{Result, ServerError};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer, UnixTime,
};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig as RustlsServerConfig, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// Private key encodings accepted for server credentials
#[derive(Clone, Debug)]
pub enum KeyDer {
    /// RFC 5915 `ECPrivateKey`
    Sec1(Vec<u8>),
    Pkcs8(Vec<u8>),
}

#[derive(Clone, Debug)]
enum Credentials {
    Files { cert_path: String, key_path: String },
    Der { chain: Vec<Vec<u8>>, key: KeyDer },
}

/// Client certificate policy
#[derive(Clone, Debug, Default)]
pub enum ClientAuth {
    #[default]
    None,
    /// Request a certificate, accept any. Path validation is left to the
    /// application (see [`crate::ConnectionInfo::peer_certs`]).
    Deferred,
    /// Request a certificate and verify it against the given DER roots;
    /// peers without a certificate are still accepted.
    Optional { roots: Vec<Vec<u8>> },
}

/// TLS configuration
#[derive(Clone, Debug)]
pub struct TlsConfig {
    credentials: Credentials,
    pub client_auth: ClientAuth,
}

impl TlsConfig {
    /// Create a new TLS config with explicit PEM paths
    pub fn with_certs(cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::Files {
                cert_path: cert_path.into(),
                key_path: key_path.into(),
            },
            client_auth: ClientAuth::None,
        }
    }

    /// Create a TLS config from DER encoded material (end-entity first)
    pub fn from_der(chain: Vec<Vec<u8>>, key: KeyDer) -> Self {
        Self {
            credentials: Credentials::Der { chain, key },
            client_auth: ClientAuth::None,
        }
    }

    pub fn client_auth(mut self, client_auth: ClientAuth) -> Self {
        self.client_auth = client_auth;
        self
    }

    /// Build a TLS acceptor from this config
    pub fn build_acceptor(&self) -> Result<TlsAcceptor> {
        let (certs, key) = match &self.credentials {
            Credentials::Files { cert_path, key_path } => {
                info!("Loading TLS credentials from {} and {}", cert_path, key_path);
                load_pem(cert_path, key_path)?
            }
            Credentials::Der { chain, key } => {
                let certs = chain
                    .iter()
                    .map(|der| CertificateDer::from(der.clone()))
                    .collect();
                let key = match key {
                    KeyDer::Sec1(der) => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(der.clone())),
                    KeyDer::Pkcs8(der) => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der.clone())),
                };
                (certs, key)
            }
        };

        if certs.is_empty() {
            return Err(ServerError::CertificateError(
                "No certificates found".to_string(),
            ));
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = RustlsServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ServerError::TlsError(format!("TLS config error: {}", e)))?;

        let builder = match &self.client_auth {
            ClientAuth::None => builder.with_no_client_auth(),
            ClientAuth::Deferred => {
                debug!("Requesting client certificates (validated by the application)");
                builder.with_client_cert_verifier(Arc::new(DeferredClientVerifier::new(&provider)))
            }
            ClientAuth::Optional { roots } => {
                let mut store = RootCertStore::empty();
                for der in roots {
                    store
                        .add(CertificateDer::from(der.clone()))
                        .map_err(|e| ServerError::CertificateError(format!("Invalid client root: {}", e)))?;
                }
                let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(store), provider)
                    .allow_unauthenticated()
                    .build()
                    .map_err(|e| ServerError::TlsError(format!("Client verifier error: {}", e)))?;
                builder.with_client_cert_verifier(verifier)
            }
        };

        let tls_config = builder
            .with_single_cert(certs, key)
            .map_err(|e| ServerError::TlsError(format!("TLS config error: {}", e)))?;

        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }
}

fn load_pem(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_file = File::open(cert_path)
        .map_err(|e| ServerError::CertificateError(format!("Failed to open cert file: {}", e)))?;
    let key_file = File::open(key_path)
        .map_err(|e| ServerError::CertificateError(format!("Failed to open key file: {}", e)))?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);

    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .filter_map(|r| r.ok())
        .collect();

    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ServerError::CertificateError(format!("Failed to read private key: {}", e)))?
        .ok_or_else(|| ServerError::CertificateError("No private key found".to_string()))?;

    Ok((certs, key))
}

/// Accepts any client certificate while still checking the handshake
/// signature, so the peer provably holds the certificate's private key.
#[derive(Debug)]
struct DeferredClientVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl DeferredClientVerifier {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ClientCertVerifier for DeferredClientVerifier {
    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn self_signed() -> (String, String) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    #[test]
    fn test_acceptor_from_pem_files() {
        let (cert, key) = self_signed();
        let mut cert_file = tempfile::NamedTempFile::new().unwrap();
        cert_file.write_all(cert.as_bytes()).unwrap();
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        key_file.write_all(key.as_bytes()).unwrap();

        let config = TlsConfig::with_certs(
            cert_file.path().to_string_lossy(),
            key_file.path().to_string_lossy(),
        )
        .client_auth(ClientAuth::Deferred);
        assert!(config.build_acceptor().is_ok());
    }

    #[test]
    fn test_acceptor_from_der() {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let config = TlsConfig::from_der(
            vec![cert.der().to_vec()],
            KeyDer::Pkcs8(key_pair.serialize_der()),
        )
        .client_auth(ClientAuth::Optional {
            roots: vec![cert.der().to_vec()],
        });
        assert!(config.build_acceptor().is_ok());
    }

    #[test]
    fn test_missing_files() {
        let config = TlsConfig::with_certs("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(
            config.build_acceptor(),
            Err(ServerError::CertificateError(_))
        ));
    }
}
