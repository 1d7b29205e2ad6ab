use mip_types::{ConnectionStatus, NodeProfile, DEFAULT_DAILY_RATE_LIMIT};
use serde::{Deserialize, Serialize};

use crate::endorsement::EndorsementPayload;

/// Body of `POST /mip/node/{id}/mip_connections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequest {
    #[serde(flatten)]
    pub profile: NodeProfile,
    /// Endorsements the requester holds about itself, issued by third
    /// parties.
    #[serde(default)]
    pub endorsements: Vec<EndorsementPayload>,
}

/// What the receiving node tells the requester about the new connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionReply {
    pub status: ConnectionStatus,
    pub daily_rate_limit: u32,
    pub node_profile: NodeProfile,
    /// When the request was approved on the spot, the approving node's
    /// endorsement of the requester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endorsement: Option<EndorsementPayload>,
}

impl ConnectionReply {
    /// Parses a reply from the `data` of a connection response.
    ///
    /// Accepts the reply nested under `mip_connection` or at the top level,
    /// and a profile given either as `node_profile` or flattened alongside
    /// the status.
    pub fn from_value(data: serde_json::Value) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Loose {
            status: ConnectionStatus,
            #[serde(default = "default_rate_limit")]
            daily_rate_limit: u32,
            #[serde(default)]
            node_profile: Option<NodeProfile>,
            #[serde(default)]
            endorsement: Option<EndorsementPayload>,
        }

        let inner = match data {
            serde_json::Value::Object(mut map) if map.contains_key("mip_connection") => map
                .remove("mip_connection")
                .unwrap_or(serde_json::Value::Null),
            other => other,
        };
        let loose: Loose = serde_json::from_value(inner.clone())?;
        let node_profile = match loose.node_profile {
            Some(profile) => profile,
            None => serde_json::from_value(inner)?,
        };
        Ok(Self {
            status: loose.status,
            daily_rate_limit: loose.daily_rate_limit,
            node_profile,
            endorsement: loose.endorsement,
        })
    }
}

/// `data` of a `mip_connections` response or of a lifecycle notification
/// acknowledgement: the payload nested under `mip_connection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEnvelope<T> {
    pub mip_connection: T,
}

impl<T> ConnectionEnvelope<T> {
    pub fn new(mip_connection: T) -> Self {
        Self { mip_connection }
    }
}

/// The connection status a node reports after applying a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatusReply {
    pub status: ConnectionStatus,
}

fn default_rate_limit() -> u32 {
    DEFAULT_DAILY_RATE_LIMIT
}

/// Sent by a node that approved a connection requested by the recipient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalNotice {
    #[serde(default)]
    pub node_profile: Option<NodeProfile>,
    #[serde(default)]
    pub daily_rate_limit: Option<u32>,
}

/// Sent on decline and revoke; `reason` is free text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasonNotice {
    #[serde(default)]
    pub mip_identifier: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Sent when a node restores a revoked connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreNotice {
    #[serde(default)]
    pub mip_identifier: Option<String>,
}

/// Response data for the connected-organizations query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedOrganizations {
    pub organizations: Vec<NodeProfile>,
}

/// Body of `POST /mip/node/{id}/member_status_checks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCheckRequest {
    pub member_number: String,
}

/// Acknowledges a reply or notification that needs no further data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_identifier: Option<String>,
}

impl Acknowledgement {
    pub fn new(shared_identifier: Option<String>) -> Self {
        Self {
            acknowledged: true,
            shared_identifier,
        }
    }
}

/// A body that may or may not be wrapped in the response envelope's `data`
/// key. Replies from peers arrive in both shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MaybeEnveloped<T> {
    Enveloped { data: T },
    Bare(T),
}

impl<T> MaybeEnveloped<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Enveloped { data } => data,
            Self::Bare(inner) => inner,
        }
    }
}
