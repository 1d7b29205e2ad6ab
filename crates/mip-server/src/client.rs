//! Signed outbound calls to peer nodes.
//!
//! Each body is serialized once and the signature covers exactly those
//! bytes, so the receiver can verify against the raw body it reads.

use base64::Engine;
use mip_federation::{
    ApprovalNotice, CogsRequestPayload, ConnectedOrganizations, ConnectionReply, ConnectionRequest,
    EndorsementPayload, MaybeEnveloped, PeerAddress, ReasonNotice, RequestAck, RestoreNotice,
    SearchReplyPayload, SearchRequestPayload, StatusCheckRequest,
};
use mip_identity::{CryptoError, NodeIdentity};
use mip_types::{HEADER_MIP_IDENTIFIER, HEADER_PUBLIC_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid peer URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("peer rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected response from peer: {0}")]
    InvalidResponse(String),
    #[error("failed to sign request: {0}")]
    Signing(#[from] CryptoError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// HTTP client that signs every request with this node's key.
#[derive(Clone)]
pub struct MipClient {
    http: reqwest::Client,
    identity: Arc<NodeIdentity>,
}

impl MipClient {
    /// Builds a client whose every call gives up after `timeout`.
    pub fn new(identity: Arc<NodeIdentity>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http, identity })
    }

    /// Sends this node's profile and endorsement bundle to the node at
    /// `mip_url`. The only call that carries the public-key header.
    pub async fn request_connection(
        &self,
        mip_url: &str,
        request: &ConnectionRequest,
    ) -> Result<ConnectionReply, ClientError> {
        let data = self
            .send(Method::POST, mip_url, "mip_connections", Some(request), true)
            .await?;
        ConnectionReply::from_value(data).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn notify_approved(
        &self,
        peer: &PeerAddress,
        notice: &ApprovalNotice,
    ) -> Result<(), ClientError> {
        self.post(peer, "mip_connections/approved", notice).await.map(drop)
    }

    pub async fn notify_declined(
        &self,
        peer: &PeerAddress,
        notice: &ReasonNotice,
    ) -> Result<(), ClientError> {
        self.post(peer, "mip_connections/declined", notice).await.map(drop)
    }

    pub async fn notify_revoked(
        &self,
        peer: &PeerAddress,
        notice: &ReasonNotice,
    ) -> Result<(), ClientError> {
        self.post(peer, "mip_connections/revoke", notice).await.map(drop)
    }

    pub async fn notify_restored(
        &self,
        peer: &PeerAddress,
        notice: &RestoreNotice,
    ) -> Result<(), ClientError> {
        self.post(peer, "mip_connections/restore", notice).await.map(drop)
    }

    pub async fn send_endorsement(
        &self,
        peer: &PeerAddress,
        endorsement: &EndorsementPayload,
    ) -> Result<(), ClientError> {
        self.post(peer, "endorsements", endorsement).await.map(drop)
    }

    pub async fn send_search(
        &self,
        peer: &PeerAddress,
        request: &SearchRequestPayload,
    ) -> Result<RequestAck, ClientError> {
        let data = self.post(peer, "mip_member_searches", request).await?;
        decode(data)
    }

    pub async fn send_search_reply(
        &self,
        peer: &PeerAddress,
        reply: &SearchReplyPayload,
    ) -> Result<(), ClientError> {
        self.post(peer, "mip_member_searches/reply", reply).await.map(drop)
    }

    pub async fn send_cogs_request(
        &self,
        peer: &PeerAddress,
        request: &CogsRequestPayload,
    ) -> Result<RequestAck, ClientError> {
        let data = self.post(peer, "certificates_of_good_standing", request).await?;
        decode(data)
    }

    pub async fn send_cogs_reply(
        &self,
        peer: &PeerAddress,
        reply: &Value,
    ) -> Result<(), ClientError> {
        self.post(peer, "certificates_of_good_standing/reply", reply)
            .await
            .map(drop)
    }

    /// Asks a peer which of its connections it shares.
    pub async fn connected_organizations(
        &self,
        peer: &PeerAddress,
    ) -> Result<ConnectedOrganizations, ClientError> {
        let data = self
            .send::<()>(Method::GET, &peer.mip_url, "connected_organizations_query", None, false)
            .await?;
        decode(data)
    }

    /// Synchronous status lookup of one of the peer's members.
    pub async fn member_status_check(
        &self,
        peer: &PeerAddress,
        member_number: &str,
    ) -> Result<Value, ClientError> {
        let request = StatusCheckRequest {
            member_number: member_number.to_string(),
        };
        self.post(peer, "member_status_checks", &request).await
    }

    async fn post<B: Serialize>(
        &self,
        peer: &PeerAddress,
        endpoint: &str,
        body: &B,
    ) -> Result<Value, ClientError> {
        self.send(Method::POST, &peer.mip_url, endpoint, Some(body), false)
            .await
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        mip_url: &str,
        endpoint: &str,
        body: Option<&B>,
        include_public_key: bool,
    ) -> Result<Value, ClientError> {
        let url = endpoint_url(mip_url, endpoint)?;
        let body = body.map(serde_json::to_vec).transpose()?;

        let timestamp = mip_identity::current_timestamp();
        let signature = self
            .identity
            .sign_request(&timestamp, url.path(), body.as_deref())?;

        let mut request = self
            .http
            .request(method, url.clone())
            .header(HEADER_MIP_IDENTIFIER, self.identity.mip_identifier())
            .header(HEADER_TIMESTAMP, &timestamp)
            .header(HEADER_SIGNATURE, signature);
        if include_public_key {
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(self.identity.public_key_pem());
            request = request.header(HEADER_PUBLIC_KEY, encoded);
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        tracing::debug!(url = %url, "sending MIP request");
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let parsed: Option<Value> = serde_json::from_slice(&bytes).ok();

        if !status.is_success() {
            let message = parsed
                .as_ref()
                .and_then(|v| v.pointer("/data/error").or_else(|| v.get("error")))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let value = parsed.ok_or_else(|| ClientError::InvalidResponse("body is not JSON".into()))?;
        if value.pointer("/meta/succeeded") == Some(&Value::Bool(false)) {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message: value
                    .pointer("/data/error")
                    .and_then(Value::as_str)
                    .unwrap_or("request not accepted")
                    .to_string(),
            });
        }
        Ok(unwrap_envelope(value))
    }
}

impl std::fmt::Debug for MipClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MipClient")
            .field("mip_identifier", &self.identity.mip_identifier())
            .finish_non_exhaustive()
    }
}

/// `{mip_url}/{endpoint}`, tolerating a trailing slash on the base.
pub fn endpoint_url(mip_url: &str, endpoint: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}/{}", mip_url.trim_end_matches('/'), endpoint))
}

fn unwrap_envelope(value: Value) -> Value {
    match serde_json::from_value::<MaybeEnveloped<Value>>(value.clone()) {
        Ok(inner) => inner.into_inner(),
        Err(_) => value,
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, ClientError> {
    serde_json::from_value(data).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}
