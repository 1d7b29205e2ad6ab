//! Error types for key handling.

/// Errors raised while creating or encoding keys and signatures.
///
/// Signature *verification* never produces one of these; it returns `false`.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// RSA key generation or signing failed.
    #[error("rsa operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    /// A public key could not be parsed from PEM.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A key could not be encoded to PEM or DER.
    #[error("key encoding failed: {0}")]
    Encoding(String),

    /// Producing a signature failed.
    #[error("signing failed: {0}")]
    Signing(String),
}
