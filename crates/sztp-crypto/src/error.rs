use thiserror::Error;

/// Encoding, key and certificate failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("DER decoding error: {0}")]
    Der(String),

    #[error("CMS error: {0}")]
    Cms(String),

    #[error("Unsupported key format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported elliptic curve")]
    UnsupportedCurve,

    #[error("mismatched public/private key pair")]
    KeyMismatch,

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Certificate validation failed: {0}")]
    Validation(String),
}

impl From<der::Error> for CryptoError {
    fn from(err: der::Error) -> Self {
        CryptoError::Der(err.to_string())
    }
}

impl CryptoError {
    pub fn der(msg: impl Into<String>) -> Self {
        CryptoError::Der(msg.into())
    }

    pub fn cms(msg: impl Into<String>) -> Self {
        CryptoError::Cms(msg.into())
    }

    pub fn certificate(msg: impl Into<String>) -> Self {
        CryptoError::Certificate(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CryptoError::Validation(msg.into())
    }
}

/// Chain reconstruction failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("no end-entity certificate found")]
    MissingLeaf,

    #[error("{0} end-entity certificates found, expected exactly one")]
    MultipleLeaves(usize),

    #[error("more than one certificate issued \"{0}\"")]
    DuplicateIssuer(String),

    #[error("{0} superfluous certificate(s) not part of the chain")]
    Superfluous(usize),

    #[error("no self-signed root certificate found")]
    MissingRoot,

    #[error("{0} self-signed certificates found, expected exactly one")]
    MultipleRoots(usize),

    #[error("no certificate in the chain carries the given public key")]
    KeyNotInChain,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
