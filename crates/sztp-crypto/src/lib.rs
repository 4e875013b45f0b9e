//! Certificate and key pipeline for sztpd
//!
//! - [`keys`]: proof that a private key pairs with a public key
//! - [`bundle`]: degenerate CMS SignedData certificate bundles and the
//!   conveyed-information ContentInfo
//! - [`chain`]: leaf-up and root-down chain reconstruction, key cross-check
//! - [`path`]: client certificate path validation and serial number lookup

pub mod bundle;
pub mod chain;
pub mod error;
pub mod keys;
pub mod path;

pub use bundle::{
    decode_certificate_bundle, decode_content_info, encode_certificate_bundle, encode_content_info, ContentType,
};
pub use chain::{certs_from_pem, cross_check_key, reconstruct_leaf_chain, reconstruct_root_chain, CertInfo};
pub use error::{ChainError, CryptoError, Result};
pub use keys::{pkcs8_to_ec_private_key, verify_key_pair, PRIVATE_KEY_FORMAT_EC, PUBLIC_KEY_FORMAT_SPKI};
pub use path::{serial_number, validate_client_certificate};
