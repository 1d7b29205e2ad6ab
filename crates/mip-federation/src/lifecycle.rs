//! Connection admission, auto-approval and the connection state machine.

use chrono::{DateTime, Utc};
use mip_types::{ConnectionStatus, DeclinedRequestPolicy, Direction, NodeProfile};

use crate::activity::ActivityEvent;
use crate::connection::{Connection, Party};
use crate::endorsement::{Endorsement, EndorsementPayload};
use crate::error::{AuthError, FederationError, TransitionError};
use crate::node::{MipNode, Outcome};
use crate::outbound::{OutboundJob, PeerAddress};
use crate::store::NodeStore;
use crate::trust::count_trusted_endorsements;
use crate::types::{
    ApprovalNotice, ConnectedOrganizations, ConnectionReply, ConnectionRequest, ReasonNotice,
};
use crate::verifier::VerifiedSender;

impl MipNode {
    /// Handles an inbound connection request.
    ///
    /// A repeated request returns the existing record's status unchanged
    /// (unless the record was declined and the policy allows asking again).
    /// Otherwise a PENDING record is created and, if enough of the bundled
    /// endorsements are trusted, approved immediately.
    pub fn receive_connection_request(
        &self,
        sender: &VerifiedSender,
        request: ConnectionRequest,
    ) -> Result<Outcome<ConnectionReply>, FederationError> {
        self.receive_connection_request_at(sender, request, Utc::now())
    }

    pub fn receive_connection_request_at(
        &self,
        sender: &VerifiedSender,
        request: ConnectionRequest,
        now: DateTime<Utc>,
    ) -> Result<Outcome<ConnectionReply>, FederationError> {
        let profile = request.profile;
        if profile.mip_identifier != sender.mip_identifier {
            return Err(FederationError::Malformed(
                "mip_identifier does not match the signing node".into(),
            ));
        }
        if profile.mip_identifier == self.identity().mip_identifier() {
            return Err(FederationError::Malformed("a node cannot connect to itself".into()));
        }

        let mut store = self.lock()?;

        let existing = store.connection(&sender.mip_identifier).cloned();
        if let Some(existing) = &existing {
            let reopen = existing.status() == ConnectionStatus::Declined
                && self.policy().declined_requests == DeclinedRequestPolicy::AllowRerequest;
            if !reopen {
                tracing::debug!(
                    mip_identifier = %existing.mip_identifier,
                    status = %existing.status(),
                    "repeated connection request"
                );
                return Ok(Outcome::quiet(self.connection_reply(existing, None)));
            }
        }

        let public_key = profile
            .public_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| FederationError::Malformed("public_key is required".into()))?;
        if !same_key(public_key, &sender.public_key) {
            return Err(AuthError::KeyMismatch.into());
        }

        let mut connection = match existing {
            Some(mut declined) => {
                declined.reopen(&profile)?;
                declined
            }
            None => Connection::inbound(&profile, self.policy().default_daily_rate_limit),
        };

        let candidates: Vec<Endorsement> = request
            .endorsements
            .into_iter()
            .filter(|e| e.endorsed_mip_identifier == sender.mip_identifier)
            .map(Endorsement::from_payload)
            .collect();
        let trusted = count_trusted_endorsements(&store, &candidates, public_key, now);
        let threshold = self.identity().trust_threshold() as usize;

        let mut endorsement = None;
        if trusted >= threshold {
            connection.approve(None, None)?;
            endorsement = Some(
                Endorsement::issue(self.identity(), &connection.mip_identifier, public_key)?
                    .to_payload(),
            );
            tracing::info!(
                mip_identifier = %connection.mip_identifier,
                organization = %connection.organization_legal_name,
                trusted,
                "connection auto-approved"
            );
            store.record(ActivityEvent::ConnectionAutoApproved {
                organization: connection.organization_legal_name.clone(),
                trusted_endorsements: trusted,
            });
        } else {
            tracing::info!(
                mip_identifier = %connection.mip_identifier,
                organization = %connection.organization_legal_name,
                trusted,
                threshold,
                "connection request pending"
            );
            store.record(ActivityEvent::ConnectionRequested {
                organization: connection.organization_legal_name.clone(),
                direction: Direction::Inbound,
            });
        }

        let reply = self.connection_reply(&connection, endorsement);
        let mut jobs = Vec::new();
        if connection.is_active() {
            jobs.push(OutboundJob::SendEndorsement {
                peer: PeerAddress::from(&connection),
            });
        }
        store.upsert_connection(connection);

        if !jobs.is_empty() {
            jobs.extend(self.reevaluate_pending(&mut store, now)?);
        }
        Ok(Outcome::new(reply, jobs))
    }

    fn connection_reply(
        &self,
        connection: &Connection,
        endorsement: Option<EndorsementPayload>,
    ) -> ConnectionReply {
        ConnectionReply {
            status: connection.status(),
            daily_rate_limit: connection.daily_rate_limit,
            node_profile: self.profile(),
            endorsement,
        }
    }

    /// Approves every inbound PENDING connection whose endorsements on file
    /// now meet the threshold, repeating until nothing changes: each
    /// approval may make the newly active node a trusted endorser.
    pub(crate) fn reevaluate_pending(
        &self,
        store: &mut NodeStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboundJob>, FederationError> {
        let threshold = self.identity().trust_threshold() as usize;
        let mut jobs = Vec::new();

        loop {
            let mut approved_any = false;
            for id in store.pending_connection_ids() {
                let Some(key) = store
                    .connection(&id)
                    .filter(|c| c.direction == Direction::Inbound)
                    .and_then(|c| c.public_key.clone())
                else {
                    continue;
                };

                let trusted =
                    count_trusted_endorsements(&*store, store.endorsements_for(&id), &key, now);
                if trusted < threshold {
                    continue;
                }

                let Some(connection) = store.connection_mut(&id) else {
                    continue;
                };
                connection.approve(None, None)?;
                let connection = connection.clone();

                tracing::info!(
                    mip_identifier = %id,
                    organization = %connection.organization_legal_name,
                    trusted,
                    "pending connection auto-approved"
                );
                store.record(ActivityEvent::ConnectionAutoApproved {
                    organization: connection.organization_legal_name.clone(),
                    trusted_endorsements: trusted,
                });
                jobs.extend(self.activation_jobs(&connection));
                approved_any = true;
            }
            if !approved_any {
                break;
            }
        }
        Ok(jobs)
    }

    /// Tell the peer it was approved, then endorse it.
    fn activation_jobs(&self, connection: &Connection) -> [OutboundJob; 2] {
        let peer = PeerAddress::from(connection);
        [
            OutboundJob::NotifyApproved {
                peer: peer.clone(),
                profile: self.profile(),
                daily_rate_limit: connection.daily_rate_limit,
            },
            OutboundJob::SendEndorsement { peer },
        ]
    }

    // ── Notifications from peers ─────────────────────────────────────

    /// The peer approved a connection this node requested.
    pub fn receive_approval(
        &self,
        sender: &VerifiedSender,
        notice: ApprovalNotice,
    ) -> Result<Outcome<Connection>, FederationError> {
        let mut store = self.lock()?;
        let connection = peer_connection(&mut store, sender)?;
        let profile = notice.node_profile.map(without_key);

        if connection.is_active() {
            if let Some(profile) = &profile {
                connection.merge_profile(profile);
            }
            return Ok(Outcome::quiet(connection.clone()));
        }
        if connection.direction != Direction::Outbound {
            return Err(TransitionError::new(
                "connection",
                "accept peer approval for",
                "inbound request",
            )
            .into());
        }
        connection.approve(notice.daily_rate_limit, profile.as_ref())?;
        let connection = connection.clone();

        tracing::info!(mip_identifier = %connection.mip_identifier, "peer approved connection");
        store.record(ActivityEvent::PeerTransition {
            organization: connection.organization_legal_name.clone(),
            action: "approved".into(),
        });

        let mut jobs = vec![OutboundJob::SendEndorsement {
            peer: PeerAddress::from(&connection),
        }];
        jobs.extend(self.reevaluate_pending(&mut store, Utc::now())?);
        Ok(Outcome::new(connection, jobs))
    }

    /// The peer declined a connection this node requested.
    pub fn receive_decline(
        &self,
        sender: &VerifiedSender,
        notice: ReasonNotice,
    ) -> Result<Outcome<Connection>, FederationError> {
        let mut store = self.lock()?;
        let connection = peer_connection(&mut store, sender)?;
        if connection.status() == ConnectionStatus::Declined {
            return Ok(Outcome::quiet(connection.clone()));
        }
        if connection.direction != Direction::Outbound {
            return Err(TransitionError::new(
                "connection",
                "accept peer decline for",
                "inbound request",
            )
            .into());
        }
        connection.decline(notice.reason)?;
        let connection = connection.clone();

        tracing::info!(mip_identifier = %connection.mip_identifier, "peer declined connection");
        store.record(ActivityEvent::PeerTransition {
            organization: connection.organization_legal_name.clone(),
            action: "declined".into(),
        });
        Ok(Outcome::quiet(connection))
    }

    /// The peer revoked an active connection.
    pub fn receive_revoke(
        &self,
        sender: &VerifiedSender,
        notice: ReasonNotice,
    ) -> Result<Outcome<Connection>, FederationError> {
        let mut store = self.lock()?;
        let connection = peer_connection(&mut store, sender)?;
        if connection.status() == ConnectionStatus::Revoked {
            return Ok(Outcome::quiet(connection.clone()));
        }
        connection.revoke(notice.reason, Party::Peer)?;
        let connection = connection.clone();

        tracing::info!(mip_identifier = %connection.mip_identifier, "peer revoked connection");
        store.record(ActivityEvent::PeerTransition {
            organization: connection.organization_legal_name.clone(),
            action: "revoked".into(),
        });
        Ok(Outcome::quiet(connection))
    }

    /// The peer restored a connection it had revoked.
    pub fn receive_restore(
        &self,
        sender: &VerifiedSender,
    ) -> Result<Outcome<Connection>, FederationError> {
        let mut store = self.lock()?;
        let connection = peer_connection(&mut store, sender)?;
        if connection.is_active() {
            return Ok(Outcome::quiet(connection.clone()));
        }
        connection.restore(Party::Peer)?;
        let connection = connection.clone();

        tracing::info!(mip_identifier = %connection.mip_identifier, "peer restored connection");
        store.record(ActivityEvent::PeerTransition {
            organization: connection.organization_legal_name.clone(),
            action: "restored".into(),
        });

        let mut jobs = vec![OutboundJob::SendEndorsement {
            peer: PeerAddress::from(&connection),
        }];
        jobs.extend(self.reevaluate_pending(&mut store, Utc::now())?);
        Ok(Outcome::new(connection, jobs))
    }

    /// Stores an endorsement sent by an ACTIVE peer and re-evaluates
    /// pending connections.
    pub fn receive_endorsement(
        &self,
        sender: &VerifiedSender,
        payload: EndorsementPayload,
    ) -> Result<Outcome<Endorsement>, FederationError> {
        let now = Utc::now();
        let mut store = self.lock()?;
        let endorser_key = Self::require_active(&store, sender)?
            .public_key
            .clone()
            .unwrap_or_else(|| sender.public_key.clone());

        if payload.endorser_mip_identifier != sender.mip_identifier {
            return Err(FederationError::InvalidEndorsement(
                "endorser does not match the sending node".into(),
            ));
        }
        let endorsement = Endorsement::from_payload(payload);
        if endorsement.is_expired_at(now) {
            return Err(FederationError::InvalidEndorsement("endorsement has expired".into()));
        }
        if !endorsement.verify_signature(&endorser_key) {
            return Err(FederationError::InvalidEndorsement(
                "endorsement signature does not verify".into(),
            ));
        }

        if store.add_endorsement(endorsement.clone()) {
            tracing::info!(
                endorser = %endorsement.endorser(),
                endorsed = %endorsement.endorsed(),
                "endorsement stored"
            );
            store.record(ActivityEvent::EndorsementReceived {
                endorser_mip_identifier: endorsement.endorser().to_string(),
            });
        }

        let jobs = self.reevaluate_pending(&mut store, now)?;
        Ok(Outcome::new(endorsement, jobs))
    }

    /// ACTIVE connections that agreed to be shared, excluding the asker.
    pub fn connected_organizations(
        &self,
        sender: &VerifiedSender,
    ) -> Result<ConnectedOrganizations, FederationError> {
        let store = self.lock()?;
        Self::require_active(&store, sender)?;
        let organizations = store
            .connections()
            .into_iter()
            .filter(|c| {
                c.is_active()
                    && c.share_my_organization
                    && c.mip_identifier != sender.mip_identifier
            })
            .map(Connection::to_node_profile)
            .collect();
        Ok(ConnectedOrganizations { organizations })
    }

    // ── Local operator actions ───────────────────────────────────────

    /// Records the connection created by a request this node sent, from the
    /// peer's reply.
    pub fn record_outbound_connection(
        &self,
        reply: ConnectionReply,
    ) -> Result<Outcome<Connection>, FederationError> {
        let profile = reply.node_profile;
        if profile.mip_identifier.is_empty() {
            return Err(FederationError::Malformed("reply has no mip_identifier".into()));
        }
        if profile.mip_identifier == self.identity().mip_identifier() {
            return Err(FederationError::Malformed("a node cannot connect to itself".into()));
        }

        let mut store = self.lock()?;
        let was_active = store
            .connection(&profile.mip_identifier)
            .is_some_and(Connection::is_active);

        let connection = match store.connection(&profile.mip_identifier).cloned() {
            Some(mut existing) => {
                if existing.status() == ConnectionStatus::Pending
                    && reply.status == ConnectionStatus::Active
                {
                    existing.approve(Some(reply.daily_rate_limit), Some(&profile))?;
                } else {
                    existing.merge_profile(&profile);
                }
                existing
            }
            None => {
                store.record(ActivityEvent::ConnectionRequested {
                    organization: profile.organization_legal_name.clone(),
                    direction: Direction::Outbound,
                });
                Connection::outbound(&profile, reply.status, reply.daily_rate_limit)
            }
        };
        tracing::info!(
            mip_identifier = %connection.mip_identifier,
            status = %connection.status(),
            "outbound connection recorded"
        );
        store.upsert_connection(connection.clone());

        if !connection.is_active() || was_active {
            return Ok(Outcome::quiet(connection));
        }

        if let Some(payload) = reply.endorsement {
            self.store_reply_endorsement(&mut store, &connection, payload);
        }
        let mut jobs = vec![OutboundJob::SendEndorsement {
            peer: PeerAddress::from(&connection),
        }];
        jobs.extend(self.reevaluate_pending(&mut store, Utc::now())?);
        Ok(Outcome::new(connection, jobs))
    }

    /// Keeps the endorsement a peer returned with its approval, if it is
    /// the peer's own, about this node, and signed with the peer's key.
    fn store_reply_endorsement(
        &self,
        store: &mut NodeStore,
        peer: &Connection,
        payload: EndorsementPayload,
    ) {
        let endorsement = Endorsement::from_payload(payload);
        let valid = endorsement.endorser() == peer.mip_identifier
            && endorsement.endorsed() == self.identity().mip_identifier()
            && !endorsement.is_expired_at(Utc::now())
            && peer
                .public_key
                .as_deref()
                .is_some_and(|key| endorsement.verify_signature(key));
        if !valid {
            tracing::warn!(
                mip_identifier = %peer.mip_identifier,
                "ignoring invalid endorsement in connection reply"
            );
            return;
        }
        if store.add_endorsement(endorsement) {
            store.record(ActivityEvent::EndorsementReceived {
                endorser_mip_identifier: peer.mip_identifier.clone(),
            });
        }
    }

    /// Manually approves a PENDING connection.
    pub fn approve_connection(
        &self,
        mip_identifier: &str,
        daily_rate_limit: Option<u32>,
    ) -> Result<Outcome<Connection>, FederationError> {
        let mut store = self.lock()?;
        let connection = local_connection(&mut store, mip_identifier)?;
        connection.approve(daily_rate_limit, None)?;
        let connection = connection.clone();

        tracing::info!(
            %mip_identifier,
            daily_rate_limit = connection.daily_rate_limit,
            "connection approved"
        );
        store.record(ActivityEvent::ConnectionApproved {
            organization: connection.organization_legal_name.clone(),
        });

        let mut jobs = self.activation_jobs(&connection).to_vec();
        jobs.extend(self.reevaluate_pending(&mut store, Utc::now())?);
        Ok(Outcome::new(connection, jobs))
    }

    pub fn decline_connection(
        &self,
        mip_identifier: &str,
        reason: Option<String>,
    ) -> Result<Outcome<Connection>, FederationError> {
        let mut store = self.lock()?;
        let connection = local_connection(&mut store, mip_identifier)?;
        connection.decline(reason.clone())?;
        let connection = connection.clone();

        tracing::info!(%mip_identifier, "connection declined");
        store.record(ActivityEvent::ConnectionDeclined {
            organization: connection.organization_legal_name.clone(),
            reason: reason.clone(),
        });
        let job = OutboundJob::NotifyDeclined {
            peer: PeerAddress::from(&connection),
            reason,
        };
        Ok(Outcome::new(connection, vec![job]))
    }

    pub fn revoke_connection(
        &self,
        mip_identifier: &str,
        reason: Option<String>,
    ) -> Result<Outcome<Connection>, FederationError> {
        let mut store = self.lock()?;
        let connection = local_connection(&mut store, mip_identifier)?;
        connection.revoke(reason.clone(), Party::Local)?;
        let connection = connection.clone();

        tracing::info!(%mip_identifier, "connection revoked");
        store.record(ActivityEvent::ConnectionRevoked {
            organization: connection.organization_legal_name.clone(),
            reason: reason.clone(),
        });
        let job = OutboundJob::NotifyRevoked {
            peer: PeerAddress::from(&connection),
            reason,
        };
        Ok(Outcome::new(connection, vec![job]))
    }

    pub fn restore_connection(
        &self,
        mip_identifier: &str,
    ) -> Result<Outcome<Connection>, FederationError> {
        let mut store = self.lock()?;
        let connection = local_connection(&mut store, mip_identifier)?;
        connection.restore(Party::Local)?;
        let connection = connection.clone();

        tracing::info!(%mip_identifier, "connection restored");
        store.record(ActivityEvent::ConnectionRestored {
            organization: connection.organization_legal_name.clone(),
        });

        let peer = PeerAddress::from(&connection);
        let mut jobs = vec![
            OutboundJob::NotifyRestored { peer: peer.clone() },
            OutboundJob::SendEndorsement { peer },
        ];
        jobs.extend(self.reevaluate_pending(&mut store, Utc::now())?);
        Ok(Outcome::new(connection, jobs))
    }
}

fn peer_connection<'a>(
    store: &'a mut NodeStore,
    sender: &VerifiedSender,
) -> Result<&'a mut Connection, FederationError> {
    store
        .connection_mut(&sender.mip_identifier)
        .ok_or_else(|| FederationError::ConnectionNotFound(sender.mip_identifier.clone()))
}

fn local_connection<'a>(
    store: &'a mut NodeStore,
    mip_identifier: &str,
) -> Result<&'a mut Connection, FederationError> {
    store
        .connection_mut(mip_identifier)
        .ok_or_else(|| FederationError::ConnectionNotFound(mip_identifier.to_string()))
}

/// Profiles in notifications may update contact details but never the key.
fn without_key(mut profile: NodeProfile) -> NodeProfile {
    profile.public_key = None;
    profile
}

fn same_key(declared: &str, verified: &str) -> bool {
    match (mip_identity::fingerprint(declared), mip_identity::fingerprint(verified)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
