//! Error types for the trust engine.

use mip_identity::CryptoError;

/// An operation that the record's current state does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} {record} in state {from}")]
pub struct TransitionError {
    pub record: &'static str,
    pub action: &'static str,
    pub from: String,
}

impl TransitionError {
    pub(crate) fn new(record: &'static str, action: &'static str, from: impl ToString) -> Self {
        Self {
            record,
            action,
            from: from.to_string(),
        }
    }
}

/// Why an inbound request failed authentication.
///
/// The distinction is for logs only; callers must not reveal it to the peer
/// beyond [`AuthError::is_malformed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing MIP headers")]
    MissingHeaders,
    #[error("timestamp outside the freshness window")]
    StaleTimestamp,
    #[error("unknown sender")]
    UnknownSender,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("declared public key does not match the signing key")]
    KeyMismatch,
}

impl AuthError {
    /// Missing headers are a malformed request rather than an
    /// authentication failure.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MissingHeaders)
    }
}

/// Errors returned by [`crate::MipNode`] operations.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The sender has no ACTIVE connection with this node.
    #[error("no active connection with {0}")]
    NotConnected(String),

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("search request not found: {0}")]
    SearchNotFound(String),

    #[error("COGS request not found: {0}")]
    CogsNotFound(String),

    #[error("member not found: {0}")]
    MemberNotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("invalid endorsement: {0}")]
    InvalidEndorsement(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("node store lock poisoned")]
    LockPoisoned,
}
