//! Shared types, wire enums, and protocol constants for the Member
//! Interchange Protocol.
//!
//! Every other crate in the workspace depends on `mip-types` for the values
//! that cross a node boundary: record statuses, request directions, the node
//! profile exchanged during connection setup, and the `{meta, data}` response
//! envelope used by every endpoint.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod policy;
pub use policy::{DeclinedRequestPolicy, NodePolicy};

/// Header carrying the sender's MIP identifier.
pub const HEADER_MIP_IDENTIFIER: &str = "X-MIP-MIP-IDENTIFIER";
/// Header carrying the RFC 3339 request timestamp.
pub const HEADER_TIMESTAMP: &str = "X-MIP-TIMESTAMP";
/// Header carrying the base64 request signature.
pub const HEADER_SIGNATURE: &str = "X-MIP-SIGNATURE";
/// Header carrying the base64-encoded PEM public key (first contact only).
pub const HEADER_PUBLIC_KEY: &str = "X-MIP-PUBLIC-KEY";

/// Default replay window for request timestamps.
pub const DEFAULT_TIMESTAMP_WINDOW_SECS: i64 = 300;
/// Default informational daily quota granted to a new connection.
pub const DEFAULT_DAILY_RATE_LIMIT: u32 = 100;
/// Endorsements expire one year after issuance.
pub const ENDORSEMENT_VALIDITY_DAYS: i64 = 365;
/// Certificates of good standing are valid for ninety days.
pub const COGS_VALIDITY_DAYS: i64 = 90;
/// Document type tag embedded in every signed endorsement.
pub const ENDORSEMENT_DOCUMENT_TYPE: &str = "MIP_ENDORSEMENT_V1";

/// Error returned when a wire string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// The enum being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Lifecycle status of a bilateral connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    /// Awaiting approval (initial state).
    Pending,
    /// Approved, either manually or through the web of trust.
    Active,
    /// Refused. Terminal for the record.
    Declined,
    /// Previously active, withdrawn by one side. May be restored.
    Revoked,
}

impl ConnectionStatus {
    /// Returns the wire label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Declined => "DECLINED",
            Self::Revoked => "REVOKED",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACTIVE" => Ok(Self::Active),
            "DECLINED" => Ok(Self::Declined),
            "REVOKED" => Ok(Self::Revoked),
            _ => Err(ParseEnumError {
                kind: "connection status",
                value: s.to_string(),
            }),
        }
    }
}

/// Status of a member search or COGS exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
}

impl RequestStatus {
    /// Returns the wire label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Declined => "DECLINED",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side initiated an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Initiated by a remote node.
    Inbound,
    /// Initiated by this node.
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The public description of a node, exchanged during connection setup and
/// returned by the connected-organizations query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeProfile {
    pub mip_identifier: String,
    pub mip_url: String,
    pub organization_legal_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_person: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    /// PEM-encoded public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default = "default_true")]
    pub share_my_organization: bool,
}

fn default_true() -> bool {
    true
}

/// The `meta` half of the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub succeeded: bool,
}

/// Response envelope shared by every MIP endpoint:
/// `{"meta": {"succeeded": bool}, "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MipResponse<T> {
    pub meta: ResponseMeta,
    pub data: T,
}

impl<T> MipResponse<T> {
    /// Wraps `data` in a successful envelope.
    pub fn ok(data: T) -> Self {
        Self {
            meta: ResponseMeta { succeeded: true },
            data,
        }
    }

    /// Wraps `data` in a failed envelope.
    pub fn failed(data: T) -> Self {
        Self {
            meta: ResponseMeta { succeeded: false },
            data,
        }
    }
}
