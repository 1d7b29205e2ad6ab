//! The MIP trust engine.
//!
//! This crate holds everything a node decides for itself: connection
//! records and their state machine, endorsements and web-of-trust
//! evaluation, request authentication, member searches and certificates of
//! good standing. It performs no I/O; operations that must reach a peer
//! return [`OutboundJob`]s for the transport to deliver.

pub mod activity;
pub mod cogs;
pub mod connection;
pub mod endorsement;
pub mod error;
mod exchange;
mod lifecycle;
pub mod member;
mod node;
pub mod outbound;
pub mod search;
pub mod store;
pub mod trust;
pub mod types;
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use activity::{ActivityEntry, ActivityEvent};
pub use cogs::{CogsReply, CogsRequest, CogsRequestPayload};
pub use connection::{Connection, Party};
pub use endorsement::{Endorsement, EndorsementPayload};
pub use error::{AuthError, FederationError, TransitionError};
pub use member::{Member, SearchParams};
pub use node::{MipNode, Outcome};
pub use outbound::{OutboundJob, PeerAddress};
pub use search::{RequestAck, SearchReplyPayload, SearchRequest, SearchRequestPayload};
pub use types::{
    Acknowledgement, ApprovalNotice, ConnectedOrganizations, ConnectionEnvelope, ConnectionReply,
    ConnectionRequest, ConnectionStatusReply, MaybeEnveloped, ReasonNotice, RestoreNotice,
    StatusCheckRequest,
};
pub use verifier::{MipHeaders, VerifiedSender};
