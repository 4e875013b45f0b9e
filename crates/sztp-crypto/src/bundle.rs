//! CMS structures used by SZTP
//!
//! Certificate bundles are degenerate SignedData (RFC 5652 section 5, no
//! signers, certificates only). Conveyed information is returned to devices
//! as a ContentInfo whose content type names its encoding (RFC 8572
//! section 3.1).
//!
//! The certificates of a SignedData are a DER `SET OF`, so a bundle comes
//! back in canonical order rather than the order it was built from.

use crate::error::{CryptoError, Result};
use cms::cert::CertificateChoices;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfos};
use der::asn1::{ObjectIdentifier, OctetString, SetOfVec};
use der::{Any, Decode, Encode};
use x509_cert::Certificate;

const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_CT_SZTP_CONVEYED_XML: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.42");
const ID_CT_SZTP_CONVEYED_JSON: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.43");

/// Content type of a conveyed-information ContentInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// id-ct-sztpConveyedInfoXML
    ConveyedInfoXml,
    /// id-ct-sztpConveyedInfoJSON
    ConveyedInfoJson,
}

impl ContentType {
    fn oid(self) -> ObjectIdentifier {
        match self {
            ContentType::ConveyedInfoXml => ID_CT_SZTP_CONVEYED_XML,
            ContentType::ConveyedInfoJson => ID_CT_SZTP_CONVEYED_JSON,
        }
    }

    fn from_oid(oid: ObjectIdentifier) -> Option<Self> {
        [ContentType::ConveyedInfoXml, ContentType::ConveyedInfoJson]
            .into_iter()
            .find(|ty| ty.oid() == oid)
    }
}

/// DER certificates of a degenerate SignedData
pub fn decode_certificate_bundle(cms: &[u8]) -> Result<Vec<Vec<u8>>> {
    let info = ContentInfo::from_der(cms).map_err(malformed)?;
    if info.content_type != ID_SIGNED_DATA {
        return Err(CryptoError::cms("content type is not signedData"));
    }
    let signed_data: SignedData = info.content.decode_as().map_err(malformed)?;

    let Some(certificates) = signed_data.certificates else {
        return Ok(Vec::new());
    };
    certificates
        .0
        .iter()
        .map(|choice| match choice {
            CertificateChoices::Certificate(cert) => cert.to_der().map_err(malformed),
            // other choices are tagged; only plain X.509 is accepted
            _ => Err(CryptoError::cms("unsupported CertificateChoices entry")),
        })
        .collect()
}

/// Degenerate SignedData carrying the DER certificates `certs`
pub fn encode_certificate_bundle(certs: &[Vec<u8>]) -> Result<Vec<u8>> {
    let choices = certs
        .iter()
        .map(|der| Certificate::from_der(der).map(CertificateChoices::Certificate))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CryptoError::certificate(format!("unable to parse certificate: {}", e)))?;

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(choices)?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };
    let info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };
    Ok(info.to_der()?)
}

/// ContentInfo wrapping `content` as an OCTET STRING
pub fn encode_content_info(content_type: ContentType, content: &[u8]) -> Result<Vec<u8>> {
    let info = ContentInfo {
        content_type: content_type.oid(),
        content: Any::encode_from(&OctetString::new(content)?)?,
    };
    Ok(info.to_der()?)
}

pub fn decode_content_info(der: &[u8]) -> Result<(ContentType, Vec<u8>)> {
    let info = ContentInfo::from_der(der).map_err(malformed)?;
    let content_type = ContentType::from_oid(info.content_type)
        .ok_or_else(|| CryptoError::cms("not an SZTP conveyed-information content type"))?;
    let content: OctetString = info.content.decode_as().map_err(malformed)?;
    Ok((content_type, content.into_bytes()))
}

fn malformed(err: der::Error) -> CryptoError {
    CryptoError::Cms(format!("malformed CMS structure: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn cert(name: &str) -> Vec<u8> {
        let key = KeyPair::generate().unwrap();
        let params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.self_signed(&key).unwrap().der().to_vec()
    }

    #[test]
    fn test_bundle_keeps_every_certificate() {
        let mut certs = vec![cert("a.example"), cert("b.example"), cert("c.example")];
        let bundle = encode_certificate_bundle(&certs).unwrap();
        let mut decoded = decode_certificate_bundle(&bundle).unwrap();
        certs.sort();
        decoded.sort();
        assert_eq!(decoded, certs);
    }

    #[test]
    fn test_bundle_rejects_other_content() {
        let info = encode_content_info(ContentType::ConveyedInfoJson, b"{}").unwrap();
        assert!(matches!(decode_certificate_bundle(&info), Err(CryptoError::Cms(_))));
        assert!(decode_certificate_bundle(b"not der").is_err());
        assert!(matches!(
            encode_certificate_bundle(&[b"not a certificate".to_vec()]),
            Err(CryptoError::Certificate(_))
        ));
    }

    #[test]
    fn test_content_info_oids() {
        let der = encode_content_info(ContentType::ConveyedInfoXml, b"<x/>").unwrap();
        // OID 1.2.840.113549.1.9.16.1.42
        assert_eq!(
            &der[2..15],
            &[0x06, 0x0B, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x01, 0x2A]
        );
        let (ty, content) = decode_content_info(&der).unwrap();
        assert_eq!(ty, ContentType::ConveyedInfoXml);
        assert_eq!(content, b"<x/>");
    }
}
