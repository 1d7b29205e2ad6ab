//! Typed fire-and-forget calls to peers.
//!
//! Node operations return these instead of performing I/O; the server's
//! transport worker delivers them in order.

use mip_types::NodeProfile;
use serde_json::Value;

use crate::cogs::CogsRequestPayload;
use crate::connection::Connection;
use crate::search::{SearchReplyPayload, SearchRequestPayload};

/// Where a job is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub mip_identifier: String,
    pub mip_url: String,
    pub organization: String,
    pub public_key: Option<String>,
}

impl From<&Connection> for PeerAddress {
    fn from(connection: &Connection) -> Self {
        Self {
            mip_identifier: connection.mip_identifier.clone(),
            mip_url: connection.mip_url.clone(),
            organization: connection.organization_legal_name.clone(),
            public_key: connection.public_key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OutboundJob {
    /// Issue and send this node's endorsement of the peer's key.
    SendEndorsement { peer: PeerAddress },
    NotifyApproved {
        peer: PeerAddress,
        profile: NodeProfile,
        daily_rate_limit: u32,
    },
    NotifyDeclined {
        peer: PeerAddress,
        reason: Option<String>,
    },
    NotifyRevoked {
        peer: PeerAddress,
        reason: Option<String>,
    },
    NotifyRestored { peer: PeerAddress },
    SendSearch {
        peer: PeerAddress,
        request: SearchRequestPayload,
    },
    SendSearchReply {
        peer: PeerAddress,
        reply: SearchReplyPayload,
    },
    SendCogsRequest {
        peer: PeerAddress,
        request: CogsRequestPayload,
    },
    SendCogsReply { peer: PeerAddress, reply: Value },
}

impl OutboundJob {
    pub fn peer(&self) -> &PeerAddress {
        match self {
            Self::SendEndorsement { peer }
            | Self::NotifyApproved { peer, .. }
            | Self::NotifyDeclined { peer, .. }
            | Self::NotifyRevoked { peer, .. }
            | Self::NotifyRestored { peer }
            | Self::SendSearch { peer, .. }
            | Self::SendSearchReply { peer, .. }
            | Self::SendCogsRequest { peer, .. }
            | Self::SendCogsReply { peer, .. } => peer,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendEndorsement { .. } => "endorsement",
            Self::NotifyApproved { .. } => "approval notice",
            Self::NotifyDeclined { .. } => "decline notice",
            Self::NotifyRevoked { .. } => "revoke notice",
            Self::NotifyRestored { .. } => "restore notice",
            Self::SendSearch { .. } => "search request",
            Self::SendSearchReply { .. } => "search reply",
            Self::SendCogsRequest { .. } => "COGS request",
            Self::SendCogsReply { .. } => "COGS reply",
        }
    }
}
