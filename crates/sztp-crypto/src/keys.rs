//! Asymmetric key pair proof
//!
//! A key pair is accepted when a signature made with the private key
//! verifies under the public key.

use crate::error::{CryptoError, Result};
use der::asn1::ObjectIdentifier;
use der::{AnyRef, Decode, Encode};
use pkcs8::{AlgorithmIdentifierRef, PrivateKeyInfo};
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, KeyPair, UnparsedPublicKey};
use sec1::EcPrivateKey;
use tracing::debug;
use x509_cert::spki::SubjectPublicKeyInfoRef;

pub const PUBLIC_KEY_FORMAT_SPKI: &str = "ietf-crypto-types:subject-public-key-info-format";
pub const PRIVATE_KEY_FORMAT_EC: &str = "ietf-crypto-types:ec-private-key-format";

const PLAINTEXT: &[u8] = b"this is some data I'd like to sign";

const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    P256,
    P384,
}

impl Curve {
    fn from_oid(oid: ObjectIdentifier) -> Result<Self> {
        if oid == SECP256R1 {
            Ok(Curve::P256)
        } else if oid == SECP384R1 {
            Ok(Curve::P384)
        } else {
            Err(CryptoError::UnsupportedCurve)
        }
    }

    fn oid(self) -> ObjectIdentifier {
        match self {
            Curve::P256 => SECP256R1,
            Curve::P384 => SECP384R1,
        }
    }

    fn signing(self) -> &'static signature::EcdsaSigningAlgorithm {
        match self {
            Curve::P256 => &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
            Curve::P384 => &signature::ECDSA_P384_SHA384_ASN1_SIGNING,
        }
    }

    fn verification(self) -> &'static signature::EcdsaVerificationAlgorithm {
        match self {
            Curve::P256 => &signature::ECDSA_P256_SHA256_ASN1,
            Curve::P384 => &signature::ECDSA_P384_SHA384_ASN1,
        }
    }
}

/// Curve and uncompressed point of an EC SubjectPublicKeyInfo
fn parse_spki(spki: &[u8]) -> Result<(Curve, &[u8])> {
    let info = SubjectPublicKeyInfoRef::from_der(spki)?;
    if info.algorithm.oid != ID_EC_PUBLIC_KEY {
        return Err(CryptoError::UnsupportedFormat(
            "only elliptic-curve public keys are supported".into(),
        ));
    }
    let named = info
        .algorithm
        .parameters_oid()
        .map_err(|e| CryptoError::UnsupportedFormat(format!("elliptic-curve parameters: {}", e)))?;
    let curve = Curve::from_oid(named)?;
    let point = info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| CryptoError::der("public key BIT STRING has unused bits"))?;
    Ok((curve, point))
}

/// Re-encode a SEC1 ECPrivateKey as PKCS#8, which is what ring loads.
///
/// The embedded public key is kept when present, otherwise `fallback_point`
/// is used. The curve parameter, if present, must name `curve`.
fn sec1_to_pkcs8(sec1: &[u8], curve: Curve, fallback_point: &[u8]) -> Result<Vec<u8>> {
    let key = EcPrivateKey::from_der(sec1).map_err(|e| CryptoError::der(e.to_string()))?;
    if let Some(named) = key.parameters.and_then(|p| p.named_curve()) {
        if Curve::from_oid(named)? != curve {
            return Err(CryptoError::KeyMismatch);
        }
    }
    let ec_private_key = EcPrivateKey {
        private_key: key.private_key,
        parameters: None,
        public_key: Some(key.public_key.unwrap_or(fallback_point)),
    }
    .to_der()?;

    let curve_oid = curve.oid();
    let info = PrivateKeyInfo {
        algorithm: AlgorithmIdentifierRef {
            oid: ID_EC_PUBLIC_KEY,
            parameters: Some(AnyRef::from(&curve_oid)),
        },
        private_key: &ec_private_key,
        public_key: None,
    };
    Ok(info.to_der()?)
}

/// Extract the SEC1 ECPrivateKey from a PKCS#8 PrivateKeyInfo
pub fn pkcs8_to_ec_private_key(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let info = PrivateKeyInfo::try_from(pkcs8).map_err(|e| CryptoError::der(e.to_string()))?;
    Ok(info.private_key.to_vec())
}

/// Prove that `private_der` is the private half of `public_der`.
pub fn verify_key_pair(
    public_der: &[u8],
    private_der: &[u8],
    public_format: &str,
    private_format: &str,
) -> Result<()> {
    if public_format != PUBLIC_KEY_FORMAT_SPKI {
        return Err(CryptoError::UnsupportedFormat(format!(
            "public key format \"{}\" is not supported",
            public_format
        )));
    }
    if private_format != PRIVATE_KEY_FORMAT_EC {
        return Err(CryptoError::UnsupportedFormat(format!(
            "private key format \"{}\" is not supported",
            private_format
        )));
    }

    let (curve, point) = parse_spki(public_der)?;
    let pkcs8 = sec1_to_pkcs8(private_der, curve, point)?;
    let rng = SystemRandom::new();
    let pair = EcdsaKeyPair::from_pkcs8(curve.signing(), &pkcs8, &rng).map_err(|e| {
        debug!("private key rejected: {}", e);
        CryptoError::KeyMismatch
    })?;
    debug!(?curve, public_len = pair.public_key().as_ref().len(), "loaded private key");

    let sig = pair
        .sign(&rng, PLAINTEXT)
        .map_err(|_| CryptoError::der("signing failed"))?;
    UnparsedPublicKey::new(curve.verification(), point)
        .verify(PLAINTEXT, sig.as_ref())
        .map_err(|_| CryptoError::KeyMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{KeyPair as GenKeyPair, PKCS_ECDSA_P384_SHA384};

    fn pair(generated: &GenKeyPair) -> (Vec<u8>, Vec<u8>) {
        (
            generated.public_key_der(),
            pkcs8_to_ec_private_key(&generated.serialize_der()).unwrap(),
        )
    }

    #[test]
    fn test_matching_pair() {
        let k1 = GenKeyPair::generate().unwrap();
        let (public, private) = pair(&k1);
        verify_key_pair(&public, &private, PUBLIC_KEY_FORMAT_SPKI, PRIVATE_KEY_FORMAT_EC).unwrap();

        let k384 = GenKeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap();
        let (public, private) = pair(&k384);
        verify_key_pair(&public, &private, PUBLIC_KEY_FORMAT_SPKI, PRIVATE_KEY_FORMAT_EC).unwrap();
    }

    #[test]
    fn test_mismatched_pair() {
        let (public1, _) = pair(&GenKeyPair::generate().unwrap());
        let (_, private2) = pair(&GenKeyPair::generate().unwrap());
        let err = verify_key_pair(&public1, &private2, PUBLIC_KEY_FORMAT_SPKI, PRIVATE_KEY_FORMAT_EC).unwrap_err();
        assert_eq!(err, CryptoError::KeyMismatch);
    }

    #[test]
    fn test_curve_mismatch() {
        let (public256, _) = pair(&GenKeyPair::generate().unwrap());
        let (_, private384) = pair(&GenKeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap());
        assert!(verify_key_pair(&public256, &private384, PUBLIC_KEY_FORMAT_SPKI, PRIVATE_KEY_FORMAT_EC).is_err());
    }

    #[test]
    fn test_unsupported_formats() {
        let (public, private) = pair(&GenKeyPair::generate().unwrap());
        let err = verify_key_pair(&public, &private, "ssh-public-key-format", PRIVATE_KEY_FORMAT_EC).unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedFormat(_)));
        let err = verify_key_pair(&public, &private, PUBLIC_KEY_FORMAT_SPKI, "rsa-private-key-format").unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedFormat(_)));
    }
}
