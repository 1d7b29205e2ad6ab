//! Member searches, certificates of good standing and status checks.

use chrono::Utc;
use mip_types::{Direction, RequestStatus};
use serde_json::{json, Value};

use crate::activity::ActivityEvent;
use crate::cogs::{verify_certificate, CogsReply, CogsRequest, CogsRequestPayload};
use crate::error::{FederationError, TransitionError};
use crate::member::SearchParams;
use crate::node::{MipNode, Outcome};
use crate::outbound::{OutboundJob, PeerAddress};
use crate::search::{RequestAck, SearchReplyPayload, SearchRequest, SearchRequestPayload};
use crate::store::NodeStore;
use crate::types::{Acknowledgement, StatusCheckRequest};
use crate::verifier::VerifiedSender;

impl MipNode {
    // ── Inbound ──────────────────────────────────────────────────────

    pub fn receive_search_request(
        &self,
        sender: &VerifiedSender,
        payload: SearchRequestPayload,
    ) -> Result<RequestAck, FederationError> {
        let mut store = self.lock()?;
        let organization = Self::require_active(&store, sender)?.organization_legal_name.clone();

        if let Some(id) = payload.shared_identifier.as_deref() {
            if let Some(existing) = store.search(id) {
                if existing.target_mip_identifier != sender.mip_identifier {
                    return Err(FederationError::Malformed(
                        "shared_identifier already in use".into(),
                    ));
                }
                return Ok(RequestAck {
                    status: existing.status(),
                    shared_identifier: existing.shared_identifier.clone(),
                });
            }
        }

        let search = SearchRequest::from_request(payload, &sender.mip_identifier, &organization);
        if search.search_params.is_empty() {
            return Err(FederationError::Malformed("search criteria required".into()));
        }
        tracing::info!(
            shared_identifier = %search.shared_identifier,
            %organization,
            "member search received"
        );
        store.record(ActivityEvent::SearchReceived {
            organization,
            description: search.search_params.description(),
        });
        let ack = RequestAck {
            status: search.status(),
            shared_identifier: search.shared_identifier.clone(),
        };
        store.insert_search(search);
        Ok(ack)
    }

    /// Applies the peer's answer to a search this node sent. Unknown or
    /// already answered searches are acknowledged without effect.
    pub fn receive_search_reply(
        &self,
        sender: &VerifiedSender,
        reply: SearchReplyPayload,
    ) -> Result<Acknowledgement, FederationError> {
        let mut store = self.lock()?;
        let organization = Self::require_active(&store, sender)?.organization_legal_name.clone();
        let shared_identifier = reply.shared_identifier.clone();

        let Some(search) = store
            .search_mut(&shared_identifier)
            .filter(|s| {
                s.direction == Direction::Outbound
                    && s.target_mip_identifier == sender.mip_identifier
            })
        else {
            tracing::warn!(%shared_identifier, "search reply for unknown search");
            return Ok(Acknowledgement::new(Some(shared_identifier)));
        };
        if let Err(e) = search.apply_reply(reply) {
            tracing::warn!(%shared_identifier, error = %e, "ignoring repeated search reply");
            return Ok(Acknowledgement::new(Some(shared_identifier)));
        }
        let event = ActivityEvent::SearchReplyReceived {
            organization,
            approved: search.status() == RequestStatus::Approved,
            matches: search.matches.len(),
        };
        store.record(event);
        Ok(Acknowledgement::new(Some(shared_identifier)))
    }

    pub fn receive_cogs_request(
        &self,
        sender: &VerifiedSender,
        payload: CogsRequestPayload,
    ) -> Result<RequestAck, FederationError> {
        let mut store = self.lock()?;
        let organization = Self::require_active(&store, sender)?.organization_legal_name.clone();

        if payload.requested_member_number.trim().is_empty() {
            return Err(FederationError::Malformed("requested_member_number is required".into()));
        }
        if let Some(id) = payload.shared_identifier.as_deref() {
            if let Some(existing) = store.cogs(id) {
                if existing.target_mip_identifier != sender.mip_identifier {
                    return Err(FederationError::Malformed(
                        "shared_identifier already in use".into(),
                    ));
                }
                return Ok(RequestAck {
                    status: existing.status(),
                    shared_identifier: existing.shared_identifier.clone(),
                });
            }
        }

        let cogs = CogsRequest::from_request(payload, &sender.mip_identifier, &organization);
        tracing::info!(
            shared_identifier = %cogs.shared_identifier,
            %organization,
            "COGS request received"
        );
        store.record(ActivityEvent::CogsReceived {
            organization,
            member_number: cogs.requested_member_number.clone(),
        });
        let ack = RequestAck {
            status: cogs.status(),
            shared_identifier: cogs.shared_identifier.clone(),
        };
        store.insert_cogs(cogs);
        Ok(ack)
    }

    /// Applies the peer's answer to a COGS request this node sent.
    pub fn receive_cogs_reply(
        &self,
        sender: &VerifiedSender,
        reply: CogsReply,
    ) -> Result<Acknowledgement, FederationError> {
        let mut store = self.lock()?;
        let organization = Self::require_active(&store, sender)?.organization_legal_name.clone();
        let shared_identifier = reply.shared_identifier.clone();

        if reply.status == RequestStatus::Approved
            && !verify_certificate(&reply.certificate, &sender.public_key)
        {
            tracing::warn!(
                %shared_identifier,
                "COGS certificate carries no valid signature from the issuer"
            );
        }

        let Some(cogs) = store
            .cogs_mut(&shared_identifier)
            .filter(|c| {
                c.direction == Direction::Outbound
                    && c.target_mip_identifier == sender.mip_identifier
            })
        else {
            tracing::warn!(%shared_identifier, "COGS reply for unknown request");
            return Ok(Acknowledgement::new(Some(shared_identifier)));
        };
        let reason = reply.reason.clone();
        if let Err(e) = cogs.apply_reply(reply) {
            tracing::warn!(%shared_identifier, error = %e, "ignoring repeated COGS reply");
            return Ok(Acknowledgement::new(Some(shared_identifier)));
        }
        let approved = cogs.status() == RequestStatus::Approved;
        store.record(ActivityEvent::CogsReplyReceived {
            organization,
            approved,
            reason,
        });
        Ok(Acknowledgement::new(Some(shared_identifier)))
    }

    /// Synchronous status lookup for one member number.
    pub fn member_status_check(
        &self,
        sender: &VerifiedSender,
        request: StatusCheckRequest,
    ) -> Result<Value, FederationError> {
        let store = self.lock()?;
        Self::require_active(&store, sender)?;
        Ok(match store.member(&request.member_number) {
            Some(member) => member.to_status_check(),
            None => json!({"found": false, "member_number": request.member_number}),
        })
    }

    // ── Local operator actions ───────────────────────────────────────

    /// Sends a member search to an ACTIVE connection.
    pub fn start_search(
        &self,
        target: &str,
        params: SearchParams,
        notes: Option<String>,
    ) -> Result<Outcome<SearchRequest>, FederationError> {
        let params = params.normalized();
        if params.is_empty() {
            return Err(FederationError::Malformed("search criteria required".into()));
        }
        let mut store = self.lock()?;
        let peer = active_peer(&store, target)?;

        let search = SearchRequest::outbound(target, &peer.organization, params, notes);
        store.record(ActivityEvent::SearchSent {
            organization: peer.organization.clone(),
            description: search.search_params.description(),
        });
        store.insert_search(search.clone());

        let job = OutboundJob::SendSearch {
            peer,
            request: search.to_request_payload(),
        };
        Ok(Outcome::new(search, vec![job]))
    }

    /// Answers an inbound search with the matching members.
    pub fn approve_search(
        &self,
        shared_identifier: &str,
    ) -> Result<Outcome<SearchRequest>, FederationError> {
        let mut store = self.lock()?;
        let params = inbound_search(&store, shared_identifier)?.search_params.clone();
        let matches: Vec<Value> = store
            .search_members(&params)
            .into_iter()
            .map(|m| m.to_search_result())
            .collect();

        let search = store
            .search_mut(shared_identifier)
            .ok_or_else(|| FederationError::SearchNotFound(shared_identifier.to_string()))?;
        search.approve(matches)?;
        let search = search.clone();

        tracing::info!(%shared_identifier, matches = search.matches.len(), "search approved");
        store.record(ActivityEvent::SearchApproved {
            organization: search.target_org.clone(),
            matches: search.matches.len(),
        });
        let jobs = reply_job(&store, &search.target_mip_identifier, |peer| {
            OutboundJob::SendSearchReply {
                peer,
                reply: search.to_reply_payload(),
            }
        });
        Ok(Outcome::new(search, jobs))
    }

    pub fn decline_search(
        &self,
        shared_identifier: &str,
        reason: Option<String>,
    ) -> Result<Outcome<SearchRequest>, FederationError> {
        let mut store = self.lock()?;
        inbound_search(&store, shared_identifier)?;
        let search = store
            .search_mut(shared_identifier)
            .ok_or_else(|| FederationError::SearchNotFound(shared_identifier.to_string()))?;
        search.decline(reason)?;
        let search = search.clone();

        tracing::info!(%shared_identifier, "search declined");
        store.record(ActivityEvent::SearchDeclined {
            organization: search.target_org.clone(),
        });
        let jobs = reply_job(&store, &search.target_mip_identifier, |peer| {
            OutboundJob::SendSearchReply {
                peer,
                reply: search.to_reply_payload(),
            }
        });
        Ok(Outcome::new(search, jobs))
    }

    /// Requests a certificate of good standing from an ACTIVE connection.
    pub fn start_cogs(
        &self,
        target: &str,
        requesting_member: Value,
        requested_member_number: &str,
        notes: Option<String>,
    ) -> Result<Outcome<CogsRequest>, FederationError> {
        let requested_member_number = requested_member_number.trim();
        if requested_member_number.is_empty() {
            return Err(FederationError::Malformed("requested_member_number is required".into()));
        }
        let mut store = self.lock()?;
        let peer = active_peer(&store, target)?;

        let cogs = CogsRequest::outbound(
            target,
            &peer.organization,
            requesting_member,
            requested_member_number,
            notes,
        );
        store.record(ActivityEvent::CogsSent {
            organization: peer.organization.clone(),
            member_number: cogs.requested_member_number.clone(),
        });
        store.insert_cogs(cogs.clone());

        let job = OutboundJob::SendCogsRequest {
            peer,
            request: cogs.to_request_payload(),
        };
        Ok(Outcome::new(cogs, vec![job]))
    }

    /// Issues a certificate for an inbound COGS request. The requested
    /// member must be in the directory.
    pub fn approve_cogs(
        &self,
        shared_identifier: &str,
    ) -> Result<Outcome<CogsRequest>, FederationError> {
        let mut store = self.lock()?;
        let member_number = inbound_cogs(&store, shared_identifier)?
            .requested_member_number
            .clone();
        let member = store
            .member(&member_number)
            .cloned()
            .ok_or(FederationError::MemberNotFound(member_number))?;

        let cogs = store
            .cogs_mut(shared_identifier)
            .ok_or_else(|| FederationError::CogsNotFound(shared_identifier.to_string()))?;
        cogs.approve(&member, self.identity(), Utc::now())?;
        let cogs = cogs.clone();

        tracing::info!(%shared_identifier, member_number = %member.member_number, "COGS approved");
        store.record(ActivityEvent::CogsApproved {
            member_number: member.member_number.clone(),
        });
        let jobs = reply_job(&store, &cogs.target_mip_identifier, |peer| {
            OutboundJob::SendCogsReply {
                peer,
                reply: cogs.to_reply_payload(),
            }
        });
        Ok(Outcome::new(cogs, jobs))
    }

    pub fn decline_cogs(
        &self,
        shared_identifier: &str,
        reason: Option<String>,
    ) -> Result<Outcome<CogsRequest>, FederationError> {
        let mut store = self.lock()?;
        inbound_cogs(&store, shared_identifier)?;
        let cogs = store
            .cogs_mut(shared_identifier)
            .ok_or_else(|| FederationError::CogsNotFound(shared_identifier.to_string()))?;
        cogs.decline(reason.clone().or_else(|| Some("Request declined".to_string())))?;
        let cogs = cogs.clone();

        tracing::info!(%shared_identifier, "COGS declined");
        store.record(ActivityEvent::CogsDeclined {
            member_number: cogs.requested_member_number.clone(),
            reason,
        });
        let jobs = reply_job(&store, &cogs.target_mip_identifier, |peer| {
            OutboundJob::SendCogsReply {
                peer,
                reply: cogs.to_reply_payload(),
            }
        });
        Ok(Outcome::new(cogs, jobs))
    }
}

fn active_peer(store: &NodeStore, mip_identifier: &str) -> Result<PeerAddress, FederationError> {
    match store.connection(mip_identifier) {
        Some(c) if c.is_active() => Ok(PeerAddress::from(c)),
        Some(_) => Err(FederationError::NotConnected(mip_identifier.to_string())),
        None => Err(FederationError::ConnectionNotFound(mip_identifier.to_string())),
    }
}

fn inbound_search<'a>(
    store: &'a NodeStore,
    shared_identifier: &str,
) -> Result<&'a SearchRequest, FederationError> {
    let search = store
        .search(shared_identifier)
        .ok_or_else(|| FederationError::SearchNotFound(shared_identifier.to_string()))?;
    if search.direction != Direction::Inbound {
        return Err(TransitionError::new("search request", "answer", "outbound").into());
    }
    Ok(search)
}

fn inbound_cogs<'a>(
    store: &'a NodeStore,
    shared_identifier: &str,
) -> Result<&'a CogsRequest, FederationError> {
    let cogs = store
        .cogs(shared_identifier)
        .ok_or_else(|| FederationError::CogsNotFound(shared_identifier.to_string()))?;
    if cogs.direction != Direction::Inbound {
        return Err(TransitionError::new("COGS request", "answer", "outbound").into());
    }
    Ok(cogs)
}

/// A reply job for the requester, if its connection is still ACTIVE.
fn reply_job(
    store: &NodeStore,
    requester: &str,
    build: impl FnOnce(PeerAddress) -> OutboundJob,
) -> Vec<OutboundJob> {
    match store.connection(requester).filter(|c| c.is_active()) {
        Some(connection) => vec![build(PeerAddress::from(connection))],
        None => {
            tracing::warn!(
                mip_identifier = %requester,
                "requester no longer connected; reply not sent"
            );
            Vec::new()
        }
    }
}
