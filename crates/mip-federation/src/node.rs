//! The trust engine: one node's identity, policy and state.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use mip_identity::NodeIdentity;
use mip_types::{NodePolicy, NodeProfile};

use crate::activity::{ActivityEntry, ActivityEvent};
use crate::cogs::CogsRequest;
use crate::connection::Connection;
use crate::endorsement::{Endorsement, EndorsementPayload};
use crate::error::FederationError;
use crate::member::Member;
use crate::outbound::OutboundJob;
use crate::search::SearchRequest;
use crate::store::NodeStore;
use crate::verifier::{self, MipHeaders, VerifiedSender};

/// The result of a state change plus the peer calls it triggered.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub jobs: Vec<OutboundJob>,
}

impl<T> Outcome<T> {
    pub(crate) fn new(value: T, jobs: Vec<OutboundJob>) -> Self {
        Self { value, jobs }
    }

    pub(crate) fn quiet(value: T) -> Self {
        Self::new(value, Vec::new())
    }
}

/// A MIP node. All state lives behind one mutex; every operation takes the
/// lock once, so each is atomic with respect to the others.
///
/// Methods are synchronous; async callers should run them on a blocking
/// thread.
pub struct MipNode {
    identity: Arc<NodeIdentity>,
    policy: NodePolicy,
    store: Mutex<NodeStore>,
}

impl MipNode {
    pub fn new(identity: Arc<NodeIdentity>, policy: NodePolicy) -> Self {
        let mut store = NodeStore::new();
        store.record(ActivityEvent::NodeStarted {
            organization: identity.organization_name().to_string(),
            mip_identifier: identity.mip_identifier().to_string(),
        });
        Self {
            identity,
            policy,
            store: Mutex::new(store),
        }
    }

    pub fn identity(&self) -> &Arc<NodeIdentity> {
        &self.identity
    }

    pub fn policy(&self) -> &NodePolicy {
        &self.policy
    }

    pub fn profile(&self) -> NodeProfile {
        self.identity.to_node_profile()
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, NodeStore>, FederationError> {
        self.store.lock().map_err(|_| FederationError::LockPoisoned)
    }

    /// Loads the member directory.
    pub fn add_members(
        &self,
        members: impl IntoIterator<Item = Member>,
    ) -> Result<usize, FederationError> {
        let mut store = self.lock()?;
        let mut count = 0;
        for member in members {
            store.add_member(member);
            count += 1;
        }
        Ok(count)
    }

    /// Authenticates an inbound request against the current time.
    pub fn authenticate(
        &self,
        headers: &MipHeaders,
        path: &str,
        body: &[u8],
    ) -> Result<VerifiedSender, FederationError> {
        self.authenticate_at(headers, path, body, Utc::now())
    }

    pub fn authenticate_at(
        &self,
        headers: &MipHeaders,
        path: &str,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<VerifiedSender, FederationError> {
        // Resolve the sender under the lock; verify the signature outside it.
        let known = match headers.mip_identifier.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => self.lock()?.connection(id).cloned(),
            _ => None,
        };
        let sender = verifier::authenticate(
            headers,
            path,
            body,
            |_| known,
            now,
            self.policy.timestamp_window_secs,
        )?;
        Ok(sender)
    }

    /// The sender's ACTIVE connection, or `NotConnected`.
    pub(crate) fn require_active<'a>(
        store: &'a NodeStore,
        sender: &VerifiedSender,
    ) -> Result<&'a Connection, FederationError> {
        store
            .connection(&sender.mip_identifier)
            .filter(|c| c.is_active())
            .ok_or_else(|| FederationError::NotConnected(sender.mip_identifier.clone()))
    }

    /// Records an event from outside the engine, such as a delivery failure.
    pub fn record_activity(&self, event: ActivityEvent) -> Result<(), FederationError> {
        self.lock()?.record(event);
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn connection(&self, mip_identifier: &str) -> Result<Option<Connection>, FederationError> {
        Ok(self.lock()?.connection(mip_identifier).cloned())
    }

    pub fn connections(&self) -> Result<Vec<Connection>, FederationError> {
        Ok(self.lock()?.connections().into_iter().cloned().collect())
    }

    pub fn members(&self) -> Result<Vec<Member>, FederationError> {
        Ok(self.lock()?.members().cloned().collect())
    }

    pub fn endorsements(&self) -> Result<Vec<Endorsement>, FederationError> {
        Ok(self.lock()?.endorsements().to_vec())
    }

    /// Unexpired endorsements other nodes have issued about this node,
    /// bundled into outbound connection requests.
    pub fn endorsements_about_self(&self) -> Result<Vec<EndorsementPayload>, FederationError> {
        let now = Utc::now();
        let store = self.lock()?;
        Ok(store
            .endorsements_for(self.identity.mip_identifier())
            .filter(|e| !e.is_expired_at(now))
            .map(Endorsement::to_payload)
            .collect())
    }

    pub fn searches(&self) -> Result<Vec<SearchRequest>, FederationError> {
        Ok(self.lock()?.searches().into_iter().cloned().collect())
    }

    pub fn search(
        &self,
        shared_identifier: &str,
    ) -> Result<Option<SearchRequest>, FederationError> {
        Ok(self.lock()?.search(shared_identifier).cloned())
    }

    pub fn cogs_requests(&self) -> Result<Vec<CogsRequest>, FederationError> {
        Ok(self.lock()?.cogs_requests().into_iter().cloned().collect())
    }

    pub fn cogs_request(
        &self,
        shared_identifier: &str,
    ) -> Result<Option<CogsRequest>, FederationError> {
        Ok(self.lock()?.cogs(shared_identifier).cloned())
    }

    pub fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, FederationError> {
        Ok(self.lock()?.recent_activity(limit))
    }
}

impl std::fmt::Debug for MipNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MipNode")
            .field("identity", &self.identity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
