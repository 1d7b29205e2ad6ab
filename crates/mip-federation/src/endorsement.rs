//! Signed endorsements: one node vouching for another node's key.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use mip_identity::{parse_timestamp, CryptoError, NodeIdentity};
use mip_types::{ENDORSEMENT_DOCUMENT_TYPE, ENDORSEMENT_VALIDITY_DAYS};
use serde::{Deserialize, Serialize};

/// Wire form of an endorsement, as bundled in connection requests and sent
/// to `POST /endorsements`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsementPayload {
    pub endorser_mip_identifier: String,
    pub endorsed_mip_identifier: String,
    pub endorsed_public_key_fingerprint: String,
    /// Canonical JSON text that the signature covers.
    pub endorsement_document: String,
    /// Base64 signature over `endorsement_document`.
    pub endorsement_signature: String,
    pub issued_at: String,
    pub expires_at: String,
}

/// The signed document. Field order is the canonical serialization.
#[derive(Debug, Serialize, Deserialize)]
struct EndorsementDocument {
    #[serde(rename = "type")]
    kind: String,
    endorser_mip_identifier: String,
    endorsed_mip_identifier: String,
    endorsed_public_key_fingerprint: String,
    issued_at: String,
    expires_at: String,
}

/// An endorsement held by this node, either issued by it or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    pub id: String,
    #[serde(flatten)]
    pub payload: EndorsementPayload,
}

impl Endorsement {
    /// Issues an endorsement from `identity` for the node holding
    /// `endorsed_public_key`, valid for one year.
    pub fn issue(
        identity: &NodeIdentity,
        endorsed_mip_identifier: &str,
        endorsed_public_key: &str,
    ) -> Result<Self, CryptoError> {
        Self::issue_at(identity, endorsed_mip_identifier, endorsed_public_key, Utc::now())
    }

    pub fn issue_at(
        identity: &NodeIdentity,
        endorsed_mip_identifier: &str,
        endorsed_public_key: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, CryptoError> {
        let fingerprint = mip_identity::fingerprint(endorsed_public_key)?;
        let expires_at = issued_at + Duration::days(ENDORSEMENT_VALIDITY_DAYS);
        let document = EndorsementDocument {
            kind: ENDORSEMENT_DOCUMENT_TYPE.to_string(),
            endorser_mip_identifier: identity.mip_identifier().to_string(),
            endorsed_mip_identifier: endorsed_mip_identifier.to_string(),
            endorsed_public_key_fingerprint: fingerprint,
            issued_at: issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            expires_at: expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let text = serde_json::to_string(&document)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let signature = identity.sign(text.as_bytes())?;

        Ok(Self::from_payload(EndorsementPayload {
            endorser_mip_identifier: document.endorser_mip_identifier,
            endorsed_mip_identifier: document.endorsed_mip_identifier,
            endorsed_public_key_fingerprint: document.endorsed_public_key_fingerprint,
            endorsement_document: text,
            endorsement_signature: signature,
            issued_at: document.issued_at,
            expires_at: document.expires_at,
        }))
    }

    pub fn from_payload(payload: EndorsementPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
        }
    }

    pub fn to_payload(&self) -> EndorsementPayload {
        self.payload.clone()
    }

    pub fn endorser(&self) -> &str {
        &self.payload.endorser_mip_identifier
    }

    pub fn endorsed(&self) -> &str {
        &self.payload.endorsed_mip_identifier
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.payload.expires_at)
    }

    /// Unparseable expiry counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map_or(true, |expires| expires < now)
    }

    /// Not expired and bound to the key with this fingerprint.
    pub fn valid_for(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && self.payload.endorsed_public_key_fingerprint == fingerprint
    }

    /// True if `endorser_public_key` signed the document and the document
    /// describes the same endorser, subject, key and expiry as the payload.
    pub fn verify_signature(&self, endorser_public_key: &str) -> bool {
        let payload = &self.payload;
        if !mip_identity::verify(
            endorser_public_key,
            &payload.endorsement_signature,
            payload.endorsement_document.as_bytes(),
        ) {
            return false;
        }

        let Ok(document) =
            serde_json::from_str::<EndorsementDocument>(&payload.endorsement_document)
        else {
            return false;
        };
        document.kind == ENDORSEMENT_DOCUMENT_TYPE
            && document.endorser_mip_identifier == payload.endorser_mip_identifier
            && document.endorsed_mip_identifier == payload.endorsed_mip_identifier
            && document.endorsed_public_key_fingerprint == payload.endorsed_public_key_fingerprint
            && parse_timestamp(&document.expires_at).is_some()
            && parse_timestamp(&document.expires_at) == self.expires_at()
    }

    /// Same endorser, subject and signature.
    pub(crate) fn same_as(&self, other: &Endorsement) -> bool {
        self.payload.endorser_mip_identifier == other.payload.endorser_mip_identifier
            && self.payload.endorsed_mip_identifier == other.payload.endorsed_mip_identifier
            && self.payload.endorsement_signature == other.payload.endorsement_signature
    }
}
