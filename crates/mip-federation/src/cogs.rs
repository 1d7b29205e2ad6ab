//! Certificate of Good Standing (COGS) exchanges.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use mip_identity::NodeIdentity;
use mip_types::{Direction, RequestStatus, COGS_VALIDITY_DAYS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{FederationError, TransitionError};
use crate::member::Member;

/// Body of `POST /certificates_of_good_standing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CogsRequestPayload {
    #[serde(default)]
    pub shared_identifier: Option<String>,
    /// Who is asking, as described by the requesting node.
    #[serde(default)]
    pub requesting_member: Value,
    pub requested_member_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A parsed COGS reply.
///
/// Peers send the certificate itself as the body, optionally nested under
/// `certificate`.
#[derive(Debug, Clone, PartialEq)]
pub struct CogsReply {
    pub shared_identifier: String,
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub certificate: Value,
}

impl CogsReply {
    pub fn from_value(body: Value) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Header {
            shared_identifier: String,
            status: RequestStatus,
            #[serde(default)]
            reason: Option<String>,
        }

        let header: Header = serde_json::from_value(body.clone())?;
        let certificate = match body {
            Value::Object(mut map) if map.contains_key("certificate") => {
                map.remove("certificate").unwrap_or(Value::Null)
            }
            other => other,
        };
        Ok(Self {
            shared_identifier: header.shared_identifier,
            status: header.status,
            reason: header.reason,
            certificate,
        })
    }
}

/// One COGS exchange, correlated across both nodes by `shared_identifier`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CogsRequest {
    pub shared_identifier: String,
    pub direction: Direction,
    pub target_mip_identifier: String,
    pub target_org: String,
    pub requesting_member: Value,
    pub requested_member_number: String,
    pub notes: Option<String>,
    status: RequestStatus,
    certificate: Option<Value>,
    decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CogsRequest {
    pub fn outbound(
        target_mip_identifier: &str,
        target_org: &str,
        requesting_member: Value,
        requested_member_number: &str,
        notes: Option<String>,
    ) -> Self {
        Self {
            shared_identifier: uuid::Uuid::new_v4().to_string(),
            direction: Direction::Outbound,
            target_mip_identifier: target_mip_identifier.to_string(),
            target_org: target_org.to_string(),
            requesting_member,
            requested_member_number: requested_member_number.to_string(),
            notes,
            status: RequestStatus::Pending,
            certificate: None,
            decline_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn from_request(
        payload: CogsRequestPayload,
        sender_mip_identifier: &str,
        sender_org: &str,
    ) -> Self {
        Self {
            shared_identifier: payload
                .shared_identifier
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            direction: Direction::Inbound,
            target_mip_identifier: sender_mip_identifier.to_string(),
            target_org: sender_org.to_string(),
            requesting_member: payload.requesting_member,
            requested_member_number: payload.requested_member_number,
            notes: payload.notes,
            status: RequestStatus::Pending,
            certificate: None,
            decline_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn certificate(&self) -> Option<&Value> {
        self.certificate.as_ref()
    }

    pub fn decline_reason(&self) -> Option<&str> {
        self.decline_reason.as_deref()
    }

    /// Issues a signed certificate for `member`, valid for ninety days from
    /// `now`.
    pub fn approve(
        &mut self,
        member: &Member,
        issuer: &NodeIdentity,
        now: DateTime<Utc>,
    ) -> Result<(), FederationError> {
        self.require_pending("approve")?;
        let mut certificate = json!({
            "shared_identifier": self.shared_identifier,
            "status": RequestStatus::Approved,
            "good_standing": member.good_standing,
            "issued_at": now.to_rfc3339_opts(SecondsFormat::Millis, true),
            "valid_until": (now + Duration::days(COGS_VALIDITY_DAYS))
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            "issuing_organization": {
                "mip_identifier": issuer.mip_identifier(),
                "organization_legal_name": issuer.organization_name(),
            },
            "member_profile": member.to_member_profile(),
        });
        let signature = issuer.sign(canonical_certificate(&certificate).as_bytes())?;
        if let Value::Object(map) = &mut certificate {
            map.insert("signature".to_string(), Value::String(signature));
        }

        self.certificate = Some(certificate);
        self.status = RequestStatus::Approved;
        Ok(())
    }

    pub fn decline(&mut self, reason: Option<String>) -> Result<(), TransitionError> {
        self.require_pending("decline")?;
        self.certificate = Some(json!({
            "shared_identifier": self.shared_identifier,
            "status": RequestStatus::Declined,
            "good_standing": false,
            "reason": reason,
        }));
        self.decline_reason = reason;
        self.status = RequestStatus::Declined;
        Ok(())
    }

    /// Applies a reply received for an outbound request.
    pub fn apply_reply(&mut self, reply: CogsReply) -> Result<(), TransitionError> {
        self.require_pending("apply reply to")?;
        match reply.status {
            RequestStatus::Approved => {
                self.certificate = Some(reply.certificate);
                self.status = RequestStatus::Approved;
            }
            _ => {
                self.decline_reason = reply.reason;
                self.status = RequestStatus::Declined;
            }
        }
        Ok(())
    }

    pub fn to_request_payload(&self) -> CogsRequestPayload {
        CogsRequestPayload {
            shared_identifier: Some(self.shared_identifier.clone()),
            requesting_member: self.requesting_member.clone(),
            requested_member_number: self.requested_member_number.clone(),
            notes: self.notes.clone(),
        }
    }

    /// The certificate, or a bare status body if there is none yet.
    pub fn to_reply_payload(&self) -> Value {
        self.certificate.clone().unwrap_or_else(|| {
            json!({
                "shared_identifier": self.shared_identifier,
                "status": self.status,
            })
        })
    }

    fn require_pending(&self, action: &'static str) -> Result<(), TransitionError> {
        if self.status == RequestStatus::Pending {
            Ok(())
        } else {
            Err(TransitionError::new("COGS request", action, self.status))
        }
    }
}

/// Serialization the certificate signature covers: the certificate without
/// its `signature` key, serialized compactly.
fn canonical_certificate(certificate: &Value) -> String {
    let mut unsigned = certificate.clone();
    if let Value::Object(map) = &mut unsigned {
        map.remove("signature");
    }
    unsigned.to_string()
}

/// True if `certificate` carries a signature by `issuer_public_key`.
pub fn verify_certificate(certificate: &Value, issuer_public_key: &str) -> bool {
    let Some(signature) = certificate.get("signature").and_then(Value::as_str) else {
        return false;
    };
    mip_identity::verify(
        issuer_public_key,
        signature,
        canonical_certificate(certificate).as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::tests::member;
    use crate::test_support::identity;

    fn inbound() -> CogsRequest {
        CogsRequest::from_request(
            CogsRequestPayload {
                shared_identifier: Some("c-1".into()),
                requesting_member: json!({"name": "Grace"}),
                requested_member_number: "1".into(),
                notes: None,
            },
            "peer",
            "Peer Org",
        )
    }

    #[test]
    fn approval_issues_signed_certificate() {
        let issuer = identity("Issuer");
        let mut cogs = inbound();
        let now = Utc::now();
        cogs.approve(&member("1", "Ada", "Lovelace", "1815-12-10"), &issuer, now)
            .unwrap();

        let cert = cogs.certificate().unwrap();
        assert_eq!(cert["status"], "APPROVED");
        assert_eq!(cert["shared_identifier"], "c-1");
        assert_eq!(cert["issuing_organization"]["mip_identifier"], issuer.mip_identifier());
        assert_eq!(cert["member_profile"]["member_number"], "1");

        let valid_until =
            mip_identity::parse_timestamp(cert["valid_until"].as_str().unwrap()).unwrap();
        assert_eq!((valid_until - now).num_days(), COGS_VALIDITY_DAYS);

        assert!(verify_certificate(cert, issuer.public_key_pem()));
        let mut tampered = cert.clone();
        tampered["good_standing"] = json!(false);
        assert!(!verify_certificate(&tampered, issuer.public_key_pem()));
    }

    #[test]
    fn decline_builds_declined_certificate() {
        let mut cogs = inbound();
        cogs.decline(Some("not a member".into())).unwrap();
        let reply = cogs.to_reply_payload();
        assert_eq!(reply["status"], "DECLINED");
        assert_eq!(reply["good_standing"], false);
        assert_eq!(reply["reason"], "not a member");
        assert!(cogs.decline(None).is_err());
    }

    #[test]
    fn reply_accepts_bare_and_nested_certificates() {
        let bare = CogsReply::from_value(json!({
            "shared_identifier": "c-1",
            "status": "APPROVED",
            "good_standing": true
        }))
        .unwrap();
        assert_eq!(bare.certificate["good_standing"], true);

        let nested = CogsReply::from_value(json!({
            "shared_identifier": "c-1",
            "status": "APPROVED",
            "certificate": {"good_standing": true}
        }))
        .unwrap();
        assert_eq!(nested.certificate, json!({"good_standing": true}));
    }

    #[test]
    fn outbound_applies_reply_once() {
        let mut cogs = CogsRequest::outbound("peer", "Peer Org", json!({}), "1", None);
        let reply = CogsReply {
            shared_identifier: cogs.shared_identifier.clone(),
            status: RequestStatus::Declined,
            reason: Some("unknown member".into()),
            certificate: Value::Null,
        };
        cogs.apply_reply(reply.clone()).unwrap();
        assert_eq!(cogs.status(), RequestStatus::Declined);
        assert_eq!(cogs.decline_reason(), Some("unknown member"));
        assert!(cogs.apply_reply(reply).is_err());
    }
}
