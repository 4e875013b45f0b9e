//! Certificate chain reconstruction
//!
//! Bundles arrive as unordered sets of certificates. A keystore bundle must
//! form a single path from one end-entity certificate upwards; a truststore
//! bundle must form a single path from one self-signed root downwards.
//! Certificates that do not sit on the path are rejected.

use crate::error::{ChainError, CryptoError, Result};
use x509_parser::prelude::*;

/// The parts of a certificate needed to order and check chains
#[derive(Debug, Clone)]
pub struct CertInfo {
    pub der: Vec<u8>,
    subject: Vec<u8>,
    issuer: Vec<u8>,
    pub is_ca: bool,
    key_algorithm: String,
    key_bits: Vec<u8>,
    /// Subject, as text
    pub display: String,
    /// Seconds since the epoch
    pub not_after: i64,
}

impl CertInfo {
    pub fn parse(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CryptoError::certificate(format!("unable to parse certificate: {}", e)))?;
        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .map_or(false, |bc| bc.value.ca);
        let spki = cert.public_key();
        Ok(Self {
            der: der.to_vec(),
            subject: cert.subject().as_raw().to_vec(),
            issuer: cert.issuer().as_raw().to_vec(),
            is_ca,
            key_algorithm: spki.algorithm.algorithm.to_id_string(),
            key_bits: spki.subject_public_key.data.to_vec(),
            display: cert.subject().to_string(),
            not_after: cert.validity().not_after.timestamp(),
        })
    }

    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    fn issued(&self, child: &CertInfo) -> bool {
        self.subject == child.issuer
    }
}

fn parse_all(certs: &[Vec<u8>]) -> Result<Vec<CertInfo>> {
    certs.iter().map(|der| CertInfo::parse(der)).collect()
}

/// Order `certs` from the single end-entity certificate up to the last
/// issuer present (a root, if the bundle includes one).
pub fn reconstruct_leaf_chain(certs: &[Vec<u8>]) -> std::result::Result<Vec<CertInfo>, ChainError> {
    let mut pool = parse_all(certs)?;
    let leaves: Vec<usize> = pool
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_ca)
        .map(|(i, _)| i)
        .collect();
    let leaf = match leaves.as_slice() {
        [] => return Err(ChainError::MissingLeaf),
        [one] => *one,
        many => return Err(ChainError::MultipleLeaves(many.len())),
    };

    let mut chain = vec![pool.remove(leaf)];
    loop {
        let current = &chain[chain.len() - 1];
        if current.is_self_signed() {
            break;
        }
        let candidates: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, c)| c.issued(current))
            .map(|(i, _)| i)
            .collect();
        match candidates.as_slice() {
            [] => break,
            [one] => {
                let next = pool.remove(*one);
                chain.push(next);
            }
            _ => return Err(ChainError::DuplicateIssuer(current.display.clone())),
        }
    }

    if !pool.is_empty() {
        return Err(ChainError::Superfluous(pool.len()));
    }
    Ok(chain)
}

/// Order `certs` from the single self-signed root down.
pub fn reconstruct_root_chain(certs: &[Vec<u8>]) -> std::result::Result<Vec<CertInfo>, ChainError> {
    let mut pool = parse_all(certs)?;
    let roots: Vec<usize> = pool
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_self_signed())
        .map(|(i, _)| i)
        .collect();
    let root = match roots.as_slice() {
        [] => return Err(ChainError::MissingRoot),
        [one] => *one,
        many => return Err(ChainError::MultipleRoots(many.len())),
    };

    let mut chain = vec![pool.remove(root)];
    loop {
        let current = &chain[chain.len() - 1];
        let children: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, c)| current.issued(c))
            .map(|(i, _)| i)
            .collect();
        match children.as_slice() {
            [] => break,
            [one] => {
                let next = pool.remove(*one);
                chain.push(next);
            }
            _ => return Err(ChainError::DuplicateIssuer(current.display.clone())),
        }
    }

    if !pool.is_empty() {
        return Err(ChainError::Superfluous(pool.len()));
    }
    Ok(chain)
}

/// Succeeds if some certificate of `chain` carries the public key encoded
/// in the SubjectPublicKeyInfo `public_key_der`.
pub fn cross_check_key(chain: &[CertInfo], public_key_der: &[u8]) -> std::result::Result<(), ChainError> {
    let (_, spki) = SubjectPublicKeyInfo::from_der(public_key_der)
        .map_err(|e| CryptoError::der(format!("unable to parse public key: {}", e)))?;
    let algorithm = spki.algorithm.algorithm.to_id_string();
    let bits = spki.subject_public_key.data.as_ref();

    if chain
        .iter()
        .any(|c| c.key_algorithm == algorithm && c.key_bits == bits)
    {
        Ok(())
    } else {
        Err(ChainError::KeyNotInChain)
    }
}

/// DER certificates of a PEM document
pub fn certs_from_pem(pem: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut reader = pem;
    rustls_pemfile::certs(&mut reader)
        .map(|cert| {
            cert.map(|c| c.as_ref().to_vec())
                .map_err(|e| CryptoError::certificate(format!("invalid PEM: {}", e)))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testutil {
    use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};

    pub struct Issued {
        pub cert: Certificate,
        pub key: KeyPair,
    }

    impl Issued {
        pub fn der(&self) -> Vec<u8> {
            self.cert.der().to_vec()
        }
    }

    fn params(cn: &str, ca: bool, serial: Option<&str>) -> CertificateParams {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        if let Some(serial) = serial {
            params
                .distinguished_name
                .push(DnType::CustomDnType(vec![2, 5, 4, 5]), serial);
        }
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        params
    }

    pub fn root(cn: &str) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = params(cn, true, None).self_signed(&key).unwrap();
        Issued { cert, key }
    }

    pub fn issue(cn: &str, ca: bool, serial: Option<&str>, issuer: &Issued) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = params(cn, ca, serial)
            .signed_by(&key, &issuer.cert, &issuer.key)
            .unwrap();
        Issued { cert, key }
    }
}
