//! Shared fixtures for unit tests. RSA key generation is slow, so
//! identities are created once per name and reused.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use mip_identity::{IdentitySettings, NodeIdentity};
use mip_types::NodePolicy;

use crate::endorsement::{Endorsement, EndorsementPayload};
use crate::node::MipNode;
use crate::types::ConnectionRequest;
use crate::verifier::VerifiedSender;

pub(crate) fn identity(name: &str) -> NodeIdentity {
    identity_with_threshold(name, 1)
}

pub(crate) fn identity_with_threshold(name: &str, trust_threshold: u32) -> NodeIdentity {
    static CACHE: OnceLock<Mutex<HashMap<String, NodeIdentity>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap();
    cache
        .entry(format!("{name}/{trust_threshold}"))
        .or_insert_with(|| {
            let slug = name.to_lowercase();
            NodeIdentity::generate(IdentitySettings {
                organization_name: name.to_string(),
                contact_person: None,
                contact_phone: None,
                public_url: format!("http://{slug}.test"),
                share_my_organization: true,
                trust_threshold,
            })
            .unwrap()
        })
        .clone()
}

pub(crate) fn node(name: &str) -> MipNode {
    node_with_policy(name, NodePolicy::default())
}

pub(crate) fn node_with_policy(name: &str, policy: NodePolicy) -> MipNode {
    MipNode::new(Arc::new(identity(name)), policy)
}

pub(crate) fn node_with_threshold(name: &str, trust_threshold: u32) -> MipNode {
    MipNode::new(
        Arc::new(identity_with_threshold(name, trust_threshold)),
        NodePolicy::default(),
    )
}

/// The sender as `node` would authenticate it.
pub(crate) fn sender(node: &MipNode, peer: &NodeIdentity) -> VerifiedSender {
    VerifiedSender {
        mip_identifier: peer.mip_identifier().to_string(),
        connection: node.connection(peer.mip_identifier()).unwrap(),
        public_key: peer.public_key_pem().to_string(),
    }
}

pub(crate) fn request(
    peer: &NodeIdentity,
    endorsements: Vec<EndorsementPayload>,
) -> ConnectionRequest {
    ConnectionRequest {
        profile: peer.to_node_profile(),
        endorsements,
    }
}

pub(crate) fn endorse(endorser: &NodeIdentity, subject: &NodeIdentity) -> EndorsementPayload {
    Endorsement::issue(endorser, subject.mip_identifier(), subject.public_key_pem())
        .unwrap()
        .to_payload()
}

/// Makes `peer` an ACTIVE inbound connection of `node`.
pub(crate) fn activate(node: &MipNode, peer: &NodeIdentity) {
    node.receive_connection_request(&sender(node, peer), request(peer, Vec::new()))
        .unwrap();
    if !node.connection(peer.mip_identifier()).unwrap().unwrap().is_active() {
        node.approve_connection(peer.mip_identifier(), None).unwrap();
    }
}
