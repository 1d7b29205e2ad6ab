//! Two-phase member search exchanges.

use chrono::{DateTime, Utc};
use mip_types::{Direction, RequestStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransitionError;
use crate::member::SearchParams;

/// Body of `POST /mip_member_searches`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequestPayload {
    #[serde(default)]
    pub shared_identifier: Option<String>,
    #[serde(flatten)]
    pub params: SearchParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Value>,
}

/// Body of `POST /mip_member_searches/reply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReplyPayload {
    pub shared_identifier: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub matches: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Acknowledges a search or COGS request; the answer follows later as a
/// separate reply call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAck {
    pub status: RequestStatus,
    pub shared_identifier: String,
}

/// One member lookup, correlated across both nodes by `shared_identifier`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub shared_identifier: String,
    pub direction: Direction,
    /// The other party: the requester for inbound, the target for outbound.
    pub target_mip_identifier: String,
    pub target_org: String,
    pub search_params: SearchParams,
    pub notes: Option<String>,
    pub documents: Vec<Value>,
    status: RequestStatus,
    pub matches: Vec<Value>,
    decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SearchRequest {
    /// A new search this node sends to `target`.
    pub fn outbound(
        target_mip_identifier: &str,
        target_org: &str,
        search_params: SearchParams,
        notes: Option<String>,
    ) -> Self {
        Self {
            shared_identifier: uuid::Uuid::new_v4().to_string(),
            direction: Direction::Outbound,
            target_mip_identifier: target_mip_identifier.to_string(),
            target_org: target_org.to_string(),
            search_params,
            notes,
            documents: Vec::new(),
            status: RequestStatus::Pending,
            matches: Vec::new(),
            decline_reason: None,
            created_at: Utc::now(),
        }
    }

    /// A search received from `sender`.
    pub fn from_request(
        payload: SearchRequestPayload,
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
            search_params: payload.params.normalized(),
            notes: payload.notes,
            documents: payload.documents,
            status: RequestStatus::Pending,
            matches: Vec::new(),
            decline_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn decline_reason(&self) -> Option<&str> {
        self.decline_reason.as_deref()
    }

    pub fn approve(&mut self, matches: Vec<Value>) -> Result<(), TransitionError> {
        self.require_pending("approve")?;
        self.matches = matches;
        self.status = RequestStatus::Approved;
        Ok(())
    }

    pub fn decline(&mut self, reason: Option<String>) -> Result<(), TransitionError> {
        self.require_pending("decline")?;
        self.decline_reason = reason;
        self.status = RequestStatus::Declined;
        Ok(())
    }

    /// Applies a reply received for an outbound search.
    pub fn apply_reply(&mut self, reply: SearchReplyPayload) -> Result<(), TransitionError> {
        match reply.status {
            RequestStatus::Approved => self.approve(reply.matches),
            _ => self.decline(reply.reason),
        }
    }

    pub fn to_request_payload(&self) -> SearchRequestPayload {
        SearchRequestPayload {
            shared_identifier: Some(self.shared_identifier.clone()),
            params: self.search_params.clone(),
            notes: self.notes.clone(),
            documents: self.documents.clone(),
        }
    }

    pub fn to_reply_payload(&self) -> SearchReplyPayload {
        SearchReplyPayload {
            shared_identifier: self.shared_identifier.clone(),
            status: self.status,
            matches: self.matches.clone(),
            reason: self.decline_reason.clone(),
        }
    }

    fn require_pending(&self, action: &'static str) -> Result<(), TransitionError> {
        if self.status == RequestStatus::Pending {
            Ok(())
        } else {
            Err(TransitionError::new("search request", action, self.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_request_keeps_shared_identifier() {
        let payload: SearchRequestPayload = serde_json::from_value(json!({
            "shared_identifier": "s-1",
            "first_name": " Ada ",
            "last_name": "Lovelace",
            "notes": "urgent"
        }))
        .unwrap();
        let search = SearchRequest::from_request(payload, "peer", "Peer Org");
        assert_eq!(search.shared_identifier, "s-1");
        assert_eq!(search.direction, Direction::Inbound);
        assert_eq!(search.search_params.first_name.as_deref(), Some("Ada"));
        assert_eq!(search.status(), RequestStatus::Pending);
    }

    #[test]
    fn request_payload_omits_empty_fields() {
        let search = SearchRequest::outbound(
            "peer",
            "Peer Org",
            SearchParams {
                member_number: Some("42".into()),
                ..Default::default()
            },
            None,
        );
        let json = serde_json::to_value(search.to_request_payload()).unwrap();
        assert_eq!(json["member_number"], "42");
        assert!(json.get("first_name").is_none());
        assert!(json.get("notes").is_none());
        assert!(json.get("documents").is_none());
    }

    #[test]
    fn approve_then_decline_is_rejected() {
        let mut search = SearchRequest::outbound("peer", "Peer Org", SearchParams::default(), None);
        search.approve(vec![json!({"member_number": "1"})]).unwrap();
        assert_eq!(search.to_reply_payload().matches.len(), 1);
        let err = search.decline(None).unwrap_err();
        assert_eq!(err.from, "APPROVED");
    }

    #[test]
    fn declined_reply_carries_reason() {
        let mut search = SearchRequest::outbound("peer", "Peer Org", SearchParams::default(), None);
        search.decline(Some("insufficient detail".into())).unwrap();
        let reply = search.to_reply_payload();
        assert_eq!(reply.status, RequestStatus::Declined);
        assert_eq!(reply.reason.as_deref(), Some("insufficient detail"));
    }
}
