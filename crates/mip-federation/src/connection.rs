//! Bilateral connection records and their lifecycle.
//!
//! ```text
//! PENDING --approve--> ACTIVE --revoke--> REVOKED --restore--> ACTIVE
//!    \--decline--> DECLINED
//! ```
//!
//! Status changes only through the transition methods; anything else is a
//! [`TransitionError`].

use chrono::{DateTime, Utc};
use mip_identity::CryptoError;
use mip_types::{ConnectionStatus, Direction, NodeProfile};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Which side performed a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Local,
    Peer,
}

/// This node's record of its relationship with one remote node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub mip_identifier: String,
    pub mip_url: String,
    pub organization_legal_name: String,
    pub contact_person: Option<String>,
    pub contact_phone: Option<String>,
    pub public_key: Option<String>,
    pub share_my_organization: bool,
    pub direction: Direction,
    pub daily_rate_limit: u32,
    status: ConnectionStatus,
    decline_reason: Option<String>,
    revoke_reason: Option<String>,
    revoked_by: Option<Party>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// A PENDING record for a request received from `profile`.
    pub fn inbound(profile: &NodeProfile, daily_rate_limit: u32) -> Self {
        Self::from_profile(profile, Direction::Inbound, ConnectionStatus::Pending, daily_rate_limit)
    }

    /// A record for a request this node sent, in whatever state the peer
    /// reported back.
    pub fn outbound(
        profile: &NodeProfile,
        status: ConnectionStatus,
        daily_rate_limit: u32,
    ) -> Self {
        Self::from_profile(profile, Direction::Outbound, status, daily_rate_limit)
    }

    fn from_profile(
        profile: &NodeProfile,
        direction: Direction,
        status: ConnectionStatus,
        daily_rate_limit: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            mip_identifier: profile.mip_identifier.clone(),
            mip_url: profile.mip_url.clone(),
            organization_legal_name: profile.organization_legal_name.clone(),
            contact_person: profile.contact_person.clone(),
            contact_phone: profile.contact_phone.clone(),
            public_key: profile.public_key.clone().filter(|k| !k.is_empty()),
            share_my_organization: profile.share_my_organization,
            direction,
            daily_rate_limit,
            status,
            decline_reason: None,
            revoke_reason: None,
            revoked_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }

    pub fn decline_reason(&self) -> Option<&str> {
        self.decline_reason.as_deref()
    }

    pub fn revoke_reason(&self) -> Option<&str> {
        self.revoke_reason.as_deref()
    }

    pub fn revoked_by(&self) -> Option<Party> {
        self.revoked_by
    }

    /// PENDING to ACTIVE. A profile supplied by the approving peer replaces
    /// the stored one field by field.
    pub fn approve(
        &mut self,
        daily_rate_limit: Option<u32>,
        profile: Option<&NodeProfile>,
    ) -> Result<(), TransitionError> {
        self.require(ConnectionStatus::Pending, "approve")?;
        if let Some(profile) = profile {
            self.merge_profile(profile);
        }
        if let Some(limit) = daily_rate_limit {
            self.daily_rate_limit = limit;
        }
        self.set_status(ConnectionStatus::Active);
        Ok(())
    }

    /// PENDING to DECLINED.
    pub fn decline(&mut self, reason: Option<String>) -> Result<(), TransitionError> {
        self.require(ConnectionStatus::Pending, "decline")?;
        self.decline_reason = reason;
        self.set_status(ConnectionStatus::Declined);
        Ok(())
    }

    /// ACTIVE to REVOKED.
    pub fn revoke(&mut self, reason: Option<String>, by: Party) -> Result<(), TransitionError> {
        self.require(ConnectionStatus::Active, "revoke")?;
        self.revoke_reason = reason;
        self.revoked_by = Some(by);
        self.set_status(ConnectionStatus::Revoked);
        Ok(())
    }

    /// REVOKED to ACTIVE.
    ///
    /// A peer may only undo a revocation it made itself.
    pub fn restore(&mut self, by: Party) -> Result<(), TransitionError> {
        self.require(ConnectionStatus::Revoked, "restore")?;
        if by == Party::Peer && self.revoked_by != Some(Party::Peer) {
            return Err(TransitionError::new(
                "connection",
                "restore",
                "REVOKED (revoked locally)",
            ));
        }
        self.revoke_reason = None;
        self.revoked_by = None;
        self.set_status(ConnectionStatus::Active);
        Ok(())
    }

    /// Re-opens a DECLINED record as PENDING for a repeated request.
    pub(crate) fn reopen(&mut self, profile: &NodeProfile) -> Result<(), TransitionError> {
        self.require(ConnectionStatus::Declined, "reopen")?;
        self.merge_profile(profile);
        self.decline_reason = None;
        self.direction = Direction::Inbound;
        self.set_status(ConnectionStatus::Pending);
        Ok(())
    }

    /// Overwrites stored profile fields with non-empty values from `profile`.
    pub fn merge_profile(&mut self, profile: &NodeProfile) {
        if !profile.mip_url.is_empty() {
            self.mip_url = profile.mip_url.clone();
        }
        if !profile.organization_legal_name.is_empty() {
            self.organization_legal_name = profile.organization_legal_name.clone();
        }
        if profile.contact_person.is_some() {
            self.contact_person = profile.contact_person.clone();
        }
        if profile.contact_phone.is_some() {
            self.contact_phone = profile.contact_phone.clone();
        }
        if let Some(key) = profile.public_key.as_ref().filter(|k| !k.is_empty()) {
            self.public_key = Some(key.clone());
        }
        self.share_my_organization = profile.share_my_organization;
        self.updated_at = Utc::now();
    }

    /// Fingerprint of the stored public key, if there is one.
    pub fn fingerprint(&self) -> Option<Result<String, CryptoError>> {
        self.public_key.as_deref().map(mip_identity::fingerprint)
    }

    pub fn to_node_profile(&self) -> NodeProfile {
        NodeProfile {
            mip_identifier: self.mip_identifier.clone(),
            mip_url: self.mip_url.clone(),
            organization_legal_name: self.organization_legal_name.clone(),
            contact_person: self.contact_person.clone(),
            contact_phone: self.contact_phone.clone(),
            public_key: self.public_key.clone(),
            share_my_organization: self.share_my_organization,
        }
    }

    fn require(
        &self,
        expected: ConnectionStatus,
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError::new("connection", action, self.status))
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        tracing::debug!(
            mip_identifier = %self.mip_identifier,
            from = %self.status,
            to = %status,
            "connection status changed"
        );
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> NodeProfile {
        NodeProfile {
            mip_identifier: id.to_string(),
            mip_url: format!("http://{id}/mip/node/{id}"),
            organization_legal_name: format!("Org {id}"),
            public_key: Some("PEM".to_string()),
            share_my_organization: true,
            ..Default::default()
        }
    }

    #[test]
    fn inbound_starts_pending() {
        let conn = Connection::inbound(&profile("a"), 100);
        assert_eq!(conn.status(), ConnectionStatus::Pending);
        assert_eq!(conn.direction, Direction::Inbound);
        assert_eq!(conn.public_key.as_deref(), Some("PEM"));
    }

    #[test]
    fn full_lifecycle() {
        let mut conn = Connection::inbound(&profile("a"), 100);
        conn.approve(Some(25), None).unwrap();
        assert!(conn.is_active());
        assert_eq!(conn.daily_rate_limit, 25);

        conn.revoke(Some("audit".into()), Party::Local).unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Revoked);
        assert_eq!(conn.revoke_reason(), Some("audit"));

        conn.restore(Party::Local).unwrap();
        assert!(conn.is_active());
        assert_eq!(conn.revoke_reason(), None);
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut conn = Connection::inbound(&profile("a"), 100);
        let err = conn.revoke(None, Party::Local).unwrap_err();
        assert_eq!(err.from, "PENDING");
        assert!(conn.restore(Party::Local).is_err());

        conn.decline(Some("no".into())).unwrap();
        assert!(conn.approve(None, None).is_err());
        assert!(conn.decline(None).is_err());
        assert_eq!(conn.status(), ConnectionStatus::Declined);
        assert_eq!(conn.decline_reason(), Some("no"));
    }

    #[test]
    fn peer_cannot_undo_local_revocation() {
        let mut conn = Connection::outbound(&profile("a"), ConnectionStatus::Active, 100);
        conn.revoke(None, Party::Local).unwrap();
        assert!(conn.restore(Party::Peer).is_err());
        assert_eq!(conn.status(), ConnectionStatus::Revoked);

        conn.restore(Party::Local).unwrap();
        conn.revoke(None, Party::Peer).unwrap();
        conn.restore(Party::Peer).unwrap();
        assert!(conn.is_active());
    }

    #[test]
    fn approve_merges_peer_profile() {
        let mut conn = Connection::outbound(&profile("a"), ConnectionStatus::Pending, 100);
        let mut updated = profile("a");
        updated.organization_legal_name = "Renamed".into();
        updated.share_my_organization = false;
        conn.approve(None, Some(&updated)).unwrap();
        assert_eq!(conn.organization_legal_name, "Renamed");
        assert!(!conn.share_my_organization);
        assert_eq!(conn.daily_rate_limit, 100);
    }

    #[test]
    fn reopen_only_from_declined() {
        let mut conn = Connection::inbound(&profile("a"), 100);
        assert!(conn.reopen(&profile("a")).is_err());
        conn.decline(None).unwrap();
        conn.reopen(&profile("a")).unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Pending);
    }
}
