//! The node's human-readable activity log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use mip_types::Direction;
use serde::{Deserialize, Serialize};

/// Number of entries kept; older ones are dropped.
pub const ACTIVITY_CAPACITY: usize = 100;

/// Something worth showing an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityEvent {
    // ── Node ─────────────────────────────────────────────────────────
    NodeStarted {
        organization: String,
        mip_identifier: String,
    },

    // ── Connections ──────────────────────────────────────────────────
    /// A connection request was received (inbound) or sent (outbound).
    ConnectionRequested {
        organization: String,
        direction: Direction,
    },
    ConnectionAutoApproved {
        organization: String,
        trusted_endorsements: usize,
    },
    ConnectionApproved {
        organization: String,
    },
    ConnectionDeclined {
        organization: String,
        reason: Option<String>,
    },
    ConnectionRevoked {
        organization: String,
        reason: Option<String>,
    },
    ConnectionRestored {
        organization: String,
    },

    /// The peer changed the state of a connection on its side.
    PeerTransition {
        organization: String,
        action: String,
    },

    // ── Endorsements ─────────────────────────────────────────────────
    EndorsementReceived {
        endorser_mip_identifier: String,
    },
    EndorsementSent {
        organization: String,
    },

    // ── Searches ─────────────────────────────────────────────────────
    SearchReceived {
        organization: String,
        description: String,
    },
    SearchSent {
        organization: String,
        description: String,
    },
    SearchApproved {
        organization: String,
        matches: usize,
    },
    SearchDeclined {
        organization: String,
    },
    SearchReplyReceived {
        organization: String,
        approved: bool,
        matches: usize,
    },

    // ── COGS ─────────────────────────────────────────────────────────
    CogsReceived {
        organization: String,
        member_number: String,
    },
    CogsSent {
        organization: String,
        member_number: String,
    },
    CogsApproved {
        member_number: String,
    },
    CogsDeclined {
        member_number: String,
        reason: Option<String>,
    },
    CogsReplyReceived {
        organization: String,
        approved: bool,
        reason: Option<String>,
    },

    // ── Transport ────────────────────────────────────────────────────
    /// A fire-and-forget outbound call failed or was dropped.
    DeliveryFailed {
        job: String,
        organization: String,
        error: String,
    },
}

impl ActivityEvent {
    /// Returns the canonical event type string for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeStarted { .. } => "NODE_STARTED",
            Self::ConnectionRequested { .. } => "CONNECTION_REQUESTED",
            Self::ConnectionAutoApproved { .. } => "CONNECTION_AUTO_APPROVED",
            Self::ConnectionApproved { .. } => "CONNECTION_APPROVED",
            Self::ConnectionDeclined { .. } => "CONNECTION_DECLINED",
            Self::ConnectionRevoked { .. } => "CONNECTION_REVOKED",
            Self::ConnectionRestored { .. } => "CONNECTION_RESTORED",
            Self::PeerTransition { .. } => "PEER_TRANSITION",
            Self::EndorsementReceived { .. } => "ENDORSEMENT_RECEIVED",
            Self::EndorsementSent { .. } => "ENDORSEMENT_SENT",
            Self::SearchReceived { .. } => "SEARCH_RECEIVED",
            Self::SearchSent { .. } => "SEARCH_SENT",
            Self::SearchApproved { .. } => "SEARCH_APPROVED",
            Self::SearchDeclined { .. } => "SEARCH_DECLINED",
            Self::SearchReplyReceived { .. } => "SEARCH_REPLY_RECEIVED",
            Self::CogsReceived { .. } => "COGS_RECEIVED",
            Self::CogsSent { .. } => "COGS_SENT",
            Self::CogsApproved { .. } => "COGS_APPROVED",
            Self::CogsDeclined { .. } => "COGS_DECLINED",
            Self::CogsReplyReceived { .. } => "COGS_REPLY_RECEIVED",
            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
        }
    }

    /// One-line description for operators.
    pub fn message(&self) -> String {
        match self {
            Self::NodeStarted { organization, .. } => format!("Node started for {organization}"),
            Self::ConnectionRequested {
                organization,
                direction: Direction::Inbound,
            } => format!("Connection request received from {organization}"),
            Self::ConnectionRequested {
                organization,
                direction: Direction::Outbound,
            } => format!("Connection request sent to {organization}"),
            Self::ConnectionAutoApproved {
                organization,
                trusted_endorsements,
            } => format!(
                "Auto-approved {organization} ({trusted_endorsements} trusted endorsements)"
            ),
            Self::ConnectionApproved { organization } => {
                format!("Approved connection with {organization}")
            }
            Self::ConnectionDeclined { organization, .. } => {
                format!("Declined connection with {organization}")
            }
            Self::ConnectionRevoked { organization, .. } => {
                format!("Revoked connection with {organization}")
            }
            Self::ConnectionRestored { organization } => {
                format!("Restored connection with {organization}")
            }
            Self::PeerTransition { organization, action } => {
                format!("{organization} {action} the connection")
            }
            Self::EndorsementReceived {
                endorser_mip_identifier,
            } => format!("Endorsement received from {endorser_mip_identifier}"),
            Self::EndorsementSent { organization } => format!("Endorsement sent to {organization}"),
            Self::SearchReceived {
                organization,
                description,
            } => format!("Search for {description} received from {organization}"),
            Self::SearchSent {
                organization,
                description,
            } => format!("Search for {description} sent to {organization}"),
            Self::SearchApproved { organization, matches } => {
                format!("Approved search from {organization} ({matches} matches)")
            }
            Self::SearchDeclined { organization } => format!("Declined search from {organization}"),
            Self::SearchReplyReceived {
                organization,
                approved: true,
                matches,
            } => format!("Search results received from {organization}: {matches} matches"),
            Self::SearchReplyReceived { organization, .. } => {
                format!("Search declined by {organization}")
            }
            Self::CogsReceived {
                organization,
                member_number,
            } => format!("COGS request for {member_number} received from {organization}"),
            Self::CogsSent {
                organization,
                member_number,
            } => format!("COGS request for {member_number} sent to {organization}"),
            Self::CogsApproved { member_number } => format!("Approved COGS for {member_number}"),
            Self::CogsDeclined { member_number, .. } => {
                format!("Declined COGS for {member_number}")
            }
            Self::CogsReplyReceived {
                organization,
                approved: true,
                ..
            } => format!("COGS received from {organization}"),
            Self::CogsReplyReceived { organization, reason, .. } => format!(
                "COGS declined by {organization}: {}",
                reason.as_deref().unwrap_or("no reason given")
            ),
            Self::DeliveryFailed {
                job,
                organization,
                error,
            } => format!("Failed to deliver {job} to {organization}: {error}"),
        }
    }
}

impl std::fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// A timestamped log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(flatten)]
    pub event: ActivityEvent,
}

/// Bounded, newest-first activity log.
#[derive(Debug)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY)
    }
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, event: ActivityEvent) {
        self.entries.push_front(ActivityEntry {
            timestamp: Utc::now(),
            message: event.message(),
            event,
        });
        self.entries.truncate(self.capacity);
    }

    /// Up to `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        self.entries.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
