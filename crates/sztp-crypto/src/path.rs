//! Client certificate checks for the bootstrap plane

use crate::error::{CryptoError, Result};
use x509_parser::prelude::*;

/// 2.5.4.5
const OID_SERIAL_NUMBER: &str = "2.5.4.5";

fn parse(der: &[u8]) -> Result<X509Certificate<'_>> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| CryptoError::certificate(format!("unable to parse certificate: {}", e)))
}

/// Subject serialNumber attribute of a certificate, if it has one
pub fn serial_number(cert_der: &[u8]) -> Result<Option<String>> {
    let cert = parse(cert_der)?;
    let serial = cert
        .subject()
        .iter_attributes()
        .find(|attr| attr.attr_type().to_id_string() == OID_SERIAL_NUMBER)
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string);
    Ok(serial)
}

/// Check that `chain[0]` is currently valid and chains by signature, through
/// the intermediates in `chain[1..]`, to one of `anchors`.
pub fn validate_client_certificate(chain: &[Vec<u8>], anchors: &[Vec<u8>]) -> Result<()> {
    let presented = chain.iter().map(|der| parse(der)).collect::<Result<Vec<_>>>()?;
    let anchors = anchors.iter().map(|der| parse(der)).collect::<Result<Vec<_>>>()?;
    let leaf = presented
        .first()
        .ok_or_else(|| CryptoError::validation("no certificate presented"))?;

    let mut current = leaf;
    // every step consumes one presented certificate, plus the final anchor hop
    for _ in 0..=presented.len() {
        if !current.validity().is_valid() {
            return Err(CryptoError::validation(format!(
                "certificate \"{}\" is outside its validity period",
                current.subject()
            )));
        }
        let signed_by = |issuer: &&X509Certificate<'_>| {
            issuer.subject().as_raw() == current.issuer().as_raw()
                && current.verify_signature(Some(issuer.public_key())).is_ok()
        };
        if anchors.iter().any(|a| signed_by(&a)) {
            return Ok(());
        }
        match presented[1..].iter().find(signed_by) {
            Some(next) if !std::ptr::eq(next, current) => current = next,
            _ => break,
        }
    }
    Err(CryptoError::validation(format!(
        "certificate \"{}\" does not chain to a trust anchor",
        leaf.subject()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testutil::{issue, root};

    #[test]
    fn test_serial_number() {
        let r = root("root");
        let device = issue("device", false, Some("SN-0042"), &r);
        assert_eq!(serial_number(&device.der()).unwrap().as_deref(), Some("SN-0042"));
        assert_eq!(serial_number(&r.der()).unwrap(), None);
    }

    #[test]
    fn test_validates_through_intermediate() {
        let r = root("root");
        let i = issue("intermediate", true, None, &r);
        let l = issue("device", false, Some("SN-1"), &i);

        validate_client_certificate(&[l.der(), i.der()], &[r.der()]).unwrap();
        validate_client_certificate(&[l.der()], &[i.der()]).unwrap();
        assert!(validate_client_certificate(&[l.der()], &[r.der()]).is_err());
    }

    #[test]
    fn test_rejects_foreign_anchor() {
        let r = root("root");
        let l = issue("device", false, Some("SN-1"), &r);
        let other = root("root");
        // same subject, different key
        assert!(validate_client_certificate(&[l.der()], &[other.der()]).is_err());
        assert!(validate_client_certificate(&[], &[r.der()]).is_err());
    }
}
