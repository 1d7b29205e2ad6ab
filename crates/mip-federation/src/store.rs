//! In-memory node state.
//!
//! A `NodeStore` is built explicitly and owned by one [`crate::MipNode`];
//! there is no global instance.

use std::collections::{BTreeMap, HashMap};

use mip_types::ConnectionStatus;

use crate::activity::{ActivityEntry, ActivityEvent, ActivityLog};
use crate::cogs::CogsRequest;
use crate::connection::Connection;
use crate::endorsement::Endorsement;
use crate::member::{Member, SearchParams};
use crate::search::SearchRequest;

#[derive(Debug, Default)]
pub struct NodeStore {
    connections: HashMap<String, Connection>,
    members: BTreeMap<String, Member>,
    endorsements: Vec<Endorsement>,
    searches: HashMap<String, SearchRequest>,
    cogs: HashMap<String, CogsRequest>,
    activity: ActivityLog,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Connections ──────────────────────────────────────────────────

    pub fn connection(&self, mip_identifier: &str) -> Option<&Connection> {
        self.connections.get(mip_identifier)
    }

    pub fn connection_mut(&mut self, mip_identifier: &str) -> Option<&mut Connection> {
        self.connections.get_mut(mip_identifier)
    }

    /// Inserts or replaces the record keyed by its identifier.
    pub fn upsert_connection(&mut self, connection: Connection) {
        self.connections
            .insert(connection.mip_identifier.clone(), connection);
    }

    /// All connections, oldest first.
    pub fn connections(&self) -> Vec<&Connection> {
        let mut all: Vec<&Connection> = self.connections.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub fn active_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(|c| c.is_active())
    }

    /// Identifiers of PENDING connections, oldest first.
    pub fn pending_connection_ids(&self) -> Vec<String> {
        self.connections()
            .into_iter()
            .filter(|c| c.status() == ConnectionStatus::Pending)
            .map(|c| c.mip_identifier.clone())
            .collect()
    }

    // ── Members ──────────────────────────────────────────────────────

    pub fn add_member(&mut self, member: Member) {
        self.members.insert(member.member_number.clone(), member);
    }

    pub fn member(&self, member_number: &str) -> Option<&Member> {
        self.members.get(member_number)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn search_members(&self, params: &SearchParams) -> Vec<&Member> {
        self.members.values().filter(|m| m.matches(params)).collect()
    }

    // ── Endorsements ─────────────────────────────────────────────────

    /// Stores an endorsement unless an identical one is already on file.
    /// Returns false for duplicates.
    pub fn add_endorsement(&mut self, endorsement: Endorsement) -> bool {
        if self.endorsements.iter().any(|e| e.same_as(&endorsement)) {
            return false;
        }
        self.endorsements.push(endorsement);
        true
    }

    /// Endorsements on file whose subject is `mip_identifier`.
    pub fn endorsements_for<'a>(
        &'a self,
        mip_identifier: &'a str,
    ) -> impl Iterator<Item = &'a Endorsement> {
        self.endorsements
            .iter()
            .filter(move |e| e.endorsed() == mip_identifier)
    }

    pub fn endorsements(&self) -> &[Endorsement] {
        &self.endorsements
    }

    // ── Searches ─────────────────────────────────────────────────────

    pub fn search(&self, shared_identifier: &str) -> Option<&SearchRequest> {
        self.searches.get(shared_identifier)
    }

    pub fn search_mut(&mut self, shared_identifier: &str) -> Option<&mut SearchRequest> {
        self.searches.get_mut(shared_identifier)
    }

    pub fn insert_search(&mut self, search: SearchRequest) {
        self.searches.insert(search.shared_identifier.clone(), search);
    }

    /// All searches, newest first.
    pub fn searches(&self) -> Vec<&SearchRequest> {
        let mut all: Vec<&SearchRequest> = self.searches.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    // ── COGS ─────────────────────────────────────────────────────────

    pub fn cogs(&self, shared_identifier: &str) -> Option<&CogsRequest> {
        self.cogs.get(shared_identifier)
    }

    pub fn cogs_mut(&mut self, shared_identifier: &str) -> Option<&mut CogsRequest> {
        self.cogs.get_mut(shared_identifier)
    }

    pub fn insert_cogs(&mut self, cogs: CogsRequest) {
        self.cogs.insert(cogs.shared_identifier.clone(), cogs);
    }

    /// All COGS requests, newest first.
    pub fn cogs_requests(&self) -> Vec<&CogsRequest> {
        let mut all: Vec<&CogsRequest> = self.cogs.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    // ── Activity ─────────────────────────────────────────────────────

    pub fn record(&mut self, event: ActivityEvent) {
        tracing::debug!(event = event.event_type(), "activity recorded");
        self.activity.record(event);
    }

    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        self.activity.recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::tests::member;
    use mip_types::NodeProfile;

    fn profile(id: &str) -> NodeProfile {
        NodeProfile {
            mip_identifier: id.into(),
            mip_url: format!("http://{id}"),
            organization_legal_name: id.into(),
            ..Default::default()
        }
    }

    #[test]
    fn pending_ids_exclude_other_states() {
        let mut store = NodeStore::new();
        store.upsert_connection(Connection::inbound(&profile("a"), 100));
        let mut b = Connection::inbound(&profile("b"), 100);
        b.approve(None, None).unwrap();
        store.upsert_connection(b);

        assert_eq!(store.pending_connection_ids(), vec!["a".to_string()]);
        assert_eq!(store.active_connections().count(), 1);
    }

    #[test]
    fn member_search_uses_directory() {
        let mut store = NodeStore::new();
        store.add_member(member("1", "Ada", "Lovelace", "1815-12-10"));
        store.add_member(member("2", "Alan", "Turing", "1912-06-23"));
        let params = SearchParams {
            first_name: Some("a".into()),
            last_name: Some("turing".into()),
            ..Default::default()
        };
        let found = store.search_members(&params);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].member_number, "2");
        assert!(store.member("1").is_some());
    }
}
