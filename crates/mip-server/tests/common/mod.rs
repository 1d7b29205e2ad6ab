#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use base64::Engine;
use mip_federation::{ConnectionRequest, Endorsement, EndorsementPayload, MipNode, OutboundJob};
use mip_identity::{IdentitySettings, NodeIdentity};
use mip_server::{app, AppState, MipClient};
use mip_types::{
    NodePolicy, HEADER_MIP_IDENTIFIER, HEADER_PUBLIC_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// RSA key generation dominates test time; identities are shared per name
/// within a test binary. Each test still builds its own node state.
pub fn identity(name: &str, trust_threshold: u32) -> Arc<NodeIdentity> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<NodeIdentity>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let key = format!("{}/{}", name, trust_threshold);
    let mut cache = cache.lock().unwrap();
    cache
        .entry(key)
        .or_insert_with(|| {
            let slug = name.to_lowercase().replace(' ', "-");
            Arc::new(
                NodeIdentity::generate(IdentitySettings {
                    organization_name: name.to_string(),
                    contact_person: Some(format!("{} Secretary", name)),
                    contact_phone: None,
                    public_url: format!("http://{}.test", slug),
                    share_my_organization: true,
                    trust_threshold,
                })
                .unwrap(),
            )
        })
        .clone()
}

/// A node under test: its router, its engine, and the receiving end of its
/// outbound queue.
pub struct TestNode {
    pub app: Router,
    pub node: Arc<MipNode>,
    pub jobs: mpsc::Receiver<OutboundJob>,
}

impl TestNode {
    pub fn new(name: &str, trust_threshold: u32) -> Self {
        Self::with_policy(name, trust_threshold, NodePolicy::default())
    }

    pub fn with_policy(name: &str, trust_threshold: u32, policy: NodePolicy) -> Self {
        let identity = identity(name, trust_threshold);
        let node = Arc::new(MipNode::new(identity.clone(), policy));
        let client = MipClient::new(identity, Duration::from_secs(1)).unwrap();
        let (tx, rx) = mpsc::channel(64);
        let state = AppState {
            node: node.clone(),
            outbound: tx,
            client,
            admin_token: Some(ADMIN_TOKEN.to_string()),
        };
        Self {
            app: app(state),
            node,
            jobs: rx,
        }
    }

    pub fn id(&self) -> &str {
        self.node.identity().mip_identifier()
    }

    pub fn path(&self, endpoint: &str) -> String {
        format!("/mip/node/{}/{}", self.id(), endpoint)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    /// Sends a request signed by `sender` to one of this node's endpoints.
    pub async fn signed(
        &self,
        sender: &NodeIdentity,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = signed_request(sender, method, &self.path(endpoint), body, false);
        self.send(request).await
    }

    /// Sends `sender`'s connection request bundling `endorsements`.
    pub async fn connect_from(
        &self,
        sender: &NodeIdentity,
        endorsements: Vec<EndorsementPayload>,
    ) -> (StatusCode, Value) {
        let body = serde_json::to_value(ConnectionRequest {
            profile: sender.to_node_profile(),
            endorsements,
        })
        .unwrap();
        let path = self.path("mip_connections");
        let request = signed_request(sender, Method::POST, &path, Some(body), true);
        self.send(request).await
    }

    /// Makes `peer` an ACTIVE connection of this node.
    pub async fn activate(&mut self, peer: &NodeIdentity) {
        let (status, _) = self.connect_from(peer, Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        self.node
            .approve_connection(peer.mip_identifier(), None)
            .unwrap();
        self.drain_jobs();
    }

    pub async fn admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", ADMIN_TOKEN));
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub fn drain_jobs(&mut self) -> Vec<OutboundJob> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.jobs.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}

/// Builds a request signed over `timestamp ++ path ++ body`.
pub fn signed_request(
    sender: &NodeIdentity,
    method: Method,
    path: &str,
    body: Option<Value>,
    include_public_key: bool,
) -> Request<Body> {
    let timestamp = mip_identity::current_timestamp();
    signed_request_at(sender, method, path, body, include_public_key, &timestamp)
}

pub fn signed_request_at(
    sender: &NodeIdentity,
    method: Method,
    path: &str,
    body: Option<Value>,
    include_public_key: bool,
    timestamp: &str,
) -> Request<Body> {
    let bytes = body.map(|b| b.to_string().into_bytes());
    let signature = sender
        .sign_request(timestamp, path, bytes.as_deref())
        .unwrap();
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(HEADER_MIP_IDENTIFIER, sender.mip_identifier())
        .header(HEADER_TIMESTAMP, timestamp)
        .header(HEADER_SIGNATURE, signature);
    if include_public_key {
        let encoded = base64::engine::general_purpose::STANDARD.encode(sender.public_key_pem());
        builder = builder.header(HEADER_PUBLIC_KEY, encoded);
    }
    match bytes {
        Some(bytes) => builder
            .header("content-type", "application/json")
            .body(Body::from(bytes))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// `endorser`'s endorsement of `subject`'s key.
pub fn endorse(endorser: &NodeIdentity, subject: &NodeIdentity) -> EndorsementPayload {
    Endorsement::issue(endorser, subject.mip_identifier(), subject.public_key_pem())
        .unwrap()
        .to_payload()
}
