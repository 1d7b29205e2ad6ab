//! Cryptographic identity for a MIP node.
//!
//! Provides the RSA primitives every other layer builds on (key generation,
//! fingerprints, signing and verification), the node identifier generator,
//! the canonical request-signature engine, and [`NodeIdentity`], the
//! immutable keypair-plus-profile a node creates once at startup.
//!
//! Verification never fails with an error: malformed keys, malformed
//! signatures, and mismatches all collapse to `false` so callers can chain
//! checks as plain predicates.

pub mod crypto;
mod error;
pub mod identifier;
mod node;
pub mod signature;

pub use crypto::{fingerprint, fingerprint_key, generate_key_pair, parse_public_key, sign, verify};
pub use error::CryptoError;
pub use node::{IdentitySettings, NodeIdentity};
pub use signature::{
    build_signature_data, current_timestamp, parse_timestamp, sign_request, timestamp_valid,
    timestamp_valid_at, verify_request,
};

/// Re-exported so downstream crates can hold private keys without a direct
/// `rsa` dependency.
pub use rsa::RsaPrivateKey;
