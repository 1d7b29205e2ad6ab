//! Peer-facing protocol endpoints under `/mip/node/{id}`.
//!
//! Every handler runs behind [`crate::middleware::verify_mip_request`] and
//! receives the authenticated sender as an extension.

use axum::{body::Bytes, extract::Extension};
use mip_federation::{
    Acknowledgement, ApprovalNotice, CogsReply, CogsRequestPayload, ConnectedOrganizations,
    Connection, ConnectionEnvelope, ConnectionReply, ConnectionRequest, ConnectionStatusReply,
    EndorsementPayload, MaybeEnveloped, ReasonNotice, RequestAck, SearchReplyPayload,
    SearchRequestPayload, StatusCheckRequest, VerifiedSender,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::{blocking, ok, parse_body, parse_body_or_default, ApiError, ApiResult};
use crate::background::enqueue;
use crate::AppState;

/// Handler for `POST /mip/node/{id}/mip_connections`.
pub async fn connection_request_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<ConnectionEnvelope<ConnectionReply>> {
    let request: ConnectionRequest = parse_body(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.receive_connection_request(&sender, request)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(ConnectionEnvelope::new(outcome.value)))
}

/// Handler for `POST /mip/node/{id}/mip_connections/approved`.
pub async fn connection_approved_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<ConnectionEnvelope<ConnectionStatusReply>> {
    let notice: ApprovalNotice = parse_body_or_default(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.receive_approval(&sender, notice)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(status_reply(&outcome.value)))
}

/// Handler for `POST /mip/node/{id}/mip_connections/declined`.
pub async fn connection_declined_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<ConnectionEnvelope<ConnectionStatusReply>> {
    let notice: ReasonNotice = parse_body_or_default(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.receive_decline(&sender, notice)).await?;
    Ok(ok(status_reply(&outcome.value)))
}

/// Handler for `POST /mip/node/{id}/mip_connections/revoke`.
pub async fn connection_revoked_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<ConnectionEnvelope<ConnectionStatusReply>> {
    let notice: ReasonNotice = parse_body_or_default(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.receive_revoke(&sender, notice)).await?;
    Ok(ok(status_reply(&outcome.value)))
}

/// Handler for `POST /mip/node/{id}/mip_connections/restore`.
///
/// The body carries nothing the node needs; it is accepted for shape only.
pub async fn connection_restored_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<ConnectionEnvelope<ConnectionStatusReply>> {
    let _: mip_federation::RestoreNotice = parse_body_or_default(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.receive_restore(&sender)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(status_reply(&outcome.value)))
}

/// Handler for `POST /mip/node/{id}/endorsements`.
pub async fn endorsement_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<Value> {
    let payload: EndorsementPayload = parse_body(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.receive_endorsement(&sender, payload)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(json!({ "acknowledged": true, "endorsement_id": outcome.value.id })))
}

/// Handler for `GET /mip/node/{id}/connected_organizations_query`.
pub async fn connected_organizations_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
) -> ApiResult<ConnectedOrganizations> {
    let node = state.node.clone();
    let organizations = blocking(move || node.connected_organizations(&sender)).await?;
    Ok(ok(organizations))
}

/// Handler for `POST /mip/node/{id}/mip_member_searches`.
pub async fn search_request_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<RequestAck> {
    let payload: SearchRequestPayload = parse_body(&body)?;
    let node = state.node.clone();
    let ack = blocking(move || node.receive_search_request(&sender, payload)).await?;
    Ok(ok(ack))
}

/// Handler for `POST /mip/node/{id}/mip_member_searches/reply`.
pub async fn search_reply_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<Acknowledgement> {
    let reply = parse_body::<MaybeEnveloped<SearchReplyPayload>>(&body)?.into_inner();
    let node = state.node.clone();
    let ack = blocking(move || node.receive_search_reply(&sender, reply)).await?;
    Ok(ok(ack))
}

/// Handler for `POST /mip/node/{id}/certificates_of_good_standing`.
pub async fn cogs_request_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<RequestAck> {
    let payload: CogsRequestPayload = parse_body(&body)?;
    let node = state.node.clone();
    let ack = blocking(move || node.receive_cogs_request(&sender, payload)).await?;
    Ok(ok(ack))
}

/// Handler for `POST /mip/node/{id}/certificates_of_good_standing/reply`.
pub async fn cogs_reply_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<Acknowledgement> {
    let raw = parse_body::<MaybeEnveloped<Value>>(&body)?.into_inner();
    let reply = CogsReply::from_value(raw)
        .map_err(|e| ApiError::BadRequest(format!("malformed COGS reply: {}", e)))?;
    let node = state.node.clone();
    let ack = blocking(move || node.receive_cogs_reply(&sender, reply)).await?;
    Ok(ok(ack))
}

/// Handler for `POST /mip/node/{id}/member_status_checks`.
pub async fn member_status_check_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(sender): Extension<VerifiedSender>,
    body: Bytes,
) -> ApiResult<Value> {
    let request: StatusCheckRequest = parse_body(&body)?;
    let node = state.node.clone();
    let status = blocking(move || node.member_status_check(&sender, request)).await?;
    Ok(ok(status))
}

/// Acknowledgement of a lifecycle notification: the status this node now
/// holds for the sender.
fn status_reply(connection: &Connection) -> ConnectionEnvelope<ConnectionStatusReply> {
    ConnectionEnvelope::new(ConnectionStatusReply {
        status: connection.status(),
    })
}
