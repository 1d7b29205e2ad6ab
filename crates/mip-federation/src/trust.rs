//! Web-of-trust evaluation.
//!
//! An endorsement counts toward a target only if its endorser is a node this
//! node already has an ACTIVE connection with, it is unexpired, it is bound
//! to the target's current key, and its signature verifies against the key
//! on file for the endorser. Each endorser counts at most once.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::endorsement::Endorsement;
use crate::store::NodeStore;

/// Number of distinct endorsers vouching for the node holding
/// `target_public_key`. An unparseable target key yields zero.
pub fn count_trusted_endorsements<'a, I>(
    store: &NodeStore,
    candidates: I,
    target_public_key: &str,
    now: DateTime<Utc>,
) -> usize
where
    I: IntoIterator<Item = &'a Endorsement>,
{
    let Ok(target_fingerprint) = mip_identity::fingerprint(target_public_key) else {
        return 0;
    };

    let mut endorsers = HashSet::new();
    for endorsement in candidates {
        if endorsers.contains(endorsement.endorser()) {
            continue;
        }
        if is_trusted(store, endorsement, &target_fingerprint, now) {
            endorsers.insert(endorsement.endorser().to_string());
        }
    }
    endorsers.len()
}

fn is_trusted(
    store: &NodeStore,
    endorsement: &Endorsement,
    target_fingerprint: &str,
    now: DateTime<Utc>,
) -> bool {
    let Some(endorser) = store.connection(endorsement.endorser()) else {
        return false;
    };
    if !endorser.is_active() {
        return false;
    }
    if !endorsement.valid_for(target_fingerprint, now) {
        return false;
    }
    match endorser.public_key.as_deref() {
        Some(key) => endorsement.verify_signature(key),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, Party};
    use crate::test_support::identity;
    use chrono::Duration;
    use mip_identity::NodeIdentity;

    fn connect(store: &mut NodeStore, peer: &NodeIdentity, active: bool) {
        let mut conn = Connection::inbound(&peer.to_node_profile(), 100);
        if active {
            conn.approve(None, None).unwrap();
        }
        store.upsert_connection(conn);
    }

    fn endorse(endorser: &NodeIdentity, target: &NodeIdentity) -> Endorsement {
        Endorsement::issue(endorser, target.mip_identifier(), target.public_key_pem()).unwrap()
    }

    #[test]
    fn counts_endorsement_from_active_connection() {
        let (y, x) = (identity("Yankee"), identity("Xray"));
        let mut store = NodeStore::new();
        connect(&mut store, &y, true);

        let e = endorse(&y, &x);
        assert_eq!(count_trusted_endorsements(&store, [&e], x.public_key_pem(), Utc::now()), 1);
    }

    #[test]
    fn ignores_unknown_or_inactive_endorser() {
        let (y, x) = (identity("Yankee"), identity("Xray"));
        let e = endorse(&y, &x);

        let empty = NodeStore::new();
        assert_eq!(count_trusted_endorsements(&empty, [&e], x.public_key_pem(), Utc::now()), 0);

        let mut pending = NodeStore::new();
        connect(&mut pending, &y, false);
        assert_eq!(count_trusted_endorsements(&pending, [&e], x.public_key_pem(), Utc::now()), 0);

        let mut revoked = NodeStore::new();
        connect(&mut revoked, &y, true);
        revoked
            .connection_mut(y.mip_identifier())
            .unwrap()
            .revoke(None, Party::Local)
            .unwrap();
        assert_eq!(count_trusted_endorsements(&revoked, [&e], x.public_key_pem(), Utc::now()), 0);
    }

    #[test]
    fn ignores_wrong_key_and_expired() {
        let (y, x, other) = (identity("Yankee"), identity("Xray"), identity("Zulu"));
        let mut store = NodeStore::new();
        connect(&mut store, &y, true);

        let e = endorse(&y, &x);
        assert_eq!(count_trusted_endorsements(&store, [&e], other.public_key_pem(), Utc::now()), 0);

        let issued = Utc::now() - Duration::days(400);
        let old =
            Endorsement::issue_at(&y, x.mip_identifier(), x.public_key_pem(), issued).unwrap();
        assert_eq!(count_trusted_endorsements(&store, [&old], x.public_key_pem(), Utc::now()), 0);

        assert_eq!(count_trusted_endorsements(&store, [&e], "garbage", Utc::now()), 0);
    }

    #[test]
    fn forged_signature_is_not_trusted() {
        let (y, x, forger) = (identity("Yankee"), identity("Xray"), identity("Zulu"));
        let mut store = NodeStore::new();
        connect(&mut store, &y, true);

        // Claims to come from Yankee but is signed by Zulu.
        let mut forged = endorse(&forger, &x);
        forged.payload.endorser_mip_identifier = y.mip_identifier().to_string();
        let count = count_trusted_endorsements(&store, [&forged], x.public_key_pem(), Utc::now());
        assert_eq!(count, 0);
    }

    #[test]
    fn each_endorser_counts_once() {
        let (y, z, x) = (identity("Yankee"), identity("Zulu"), identity("Xray"));
        let mut store = NodeStore::new();
        connect(&mut store, &y, true);
        connect(&mut store, &z, true);

        let from_y = endorse(&y, &x);
        let again_y = endorse(&y, &x);
        let from_z = endorse(&z, &x);
        let count = count_trusted_endorsements(
            &store,
            [&from_y, &again_y, &from_z],
            x.public_key_pem(),
            Utc::now(),
        );
        assert_eq!(count, 2);
    }
}
