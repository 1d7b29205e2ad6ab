//! Local operator API under `/api/admin`, guarded by
//! [`crate::middleware::admin_auth`].

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
};
use mip_federation::{
    ActivityEntry, CogsRequest, ConnectedOrganizations, Connection, ConnectionRequest, Endorsement,
    FederationError, Member, PeerAddress, SearchParams, SearchRequest,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::{blocking, ok, parse_body, parse_body_or_default, ApiError, ApiResult};
use crate::background::enqueue;
use crate::AppState;

const DEFAULT_ACTIVITY_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct InitiateConnectionRequest {
    /// The target node's MIP URL, `{base}/mip/node/{id}`.
    pub mip_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveConnectionRequest {
    #[serde(default)]
    pub daily_rate_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PeerStatusCheckRequest {
    pub member_number: String,
}

#[derive(Debug, Deserialize)]
pub struct StartSearchRequest {
    pub target_mip_identifier: String,
    #[serde(flatten)]
    pub params: SearchParams,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartCogsRequest {
    pub target_mip_identifier: String,
    #[serde(default)]
    pub requesting_member: Value,
    pub requested_member_number: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

/// Handler for `GET /api/admin/node`.
pub async fn node_handler(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Value> {
    let identity = state.node.identity();
    let fingerprint = identity.fingerprint().map_err(FederationError::from)?;
    Ok(ok(json!({
        "node_profile": state.node.profile(),
        "public_key_fingerprint": fingerprint,
        "trust_threshold": identity.trust_threshold(),
        "policy": state.node.policy(),
    })))
}

/// Handler for `GET /api/admin/connections`.
pub async fn list_connections_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Vec<Connection>> {
    let node = state.node.clone();
    Ok(ok(blocking(move || node.connections()).await?))
}

/// Handler for `POST /api/admin/connections`.
///
/// Sends a connection request to the target, bundling every unexpired
/// endorsement this node holds about itself, and records the outbound
/// connection from the target's reply.
pub async fn initiate_connection_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Connection> {
    let payload: InitiateConnectionRequest = parse_body(&body)?;
    let mip_url = payload.mip_url.trim().trim_end_matches('/').to_string();
    url::Url::parse(&mip_url).map_err(|e| ApiError::BadRequest(format!("invalid mip_url: {}", e)))?;
    if mip_url == state.node.identity().mip_url() {
        return Err(ApiError::BadRequest("a node cannot connect to itself".to_string()));
    }

    let node = state.node.clone();
    let endorsements = blocking(move || node.endorsements_about_self()).await?;
    let request = ConnectionRequest {
        profile: state.node.profile(),
        endorsements,
    };
    tracing::info!(%mip_url, endorsements = request.endorsements.len(), "requesting connection");

    let reply = state.client.request_connection(&mip_url, &request).await?;
    let node = state.node.clone();
    let outcome = blocking(move || node.record_outbound_connection(reply)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `GET /api/admin/connections/{mip_id}`.
pub async fn get_connection_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(mip_id): Path<String>,
) -> ApiResult<Connection> {
    let node = state.node.clone();
    let lookup = mip_id.clone();
    blocking(move || node.connection(&lookup))
        .await?
        .map(ok)
        .ok_or_else(|| ApiError::NotFound(format!("connection not found: {}", mip_id)))
}

/// Handler for `POST /api/admin/connections/{mip_id}/approve`.
pub async fn approve_connection_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(mip_id): Path<String>,
    body: Bytes,
) -> ApiResult<Connection> {
    let payload: ApproveConnectionRequest = parse_body_or_default(&body)?;
    let node = state.node.clone();
    let outcome =
        blocking(move || node.approve_connection(&mip_id, payload.daily_rate_limit)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `POST /api/admin/connections/{mip_id}/decline`.
pub async fn decline_connection_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(mip_id): Path<String>,
    body: Bytes,
) -> ApiResult<Connection> {
    let payload: ReasonRequest = parse_body_or_default(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.decline_connection(&mip_id, payload.reason)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `POST /api/admin/connections/{mip_id}/revoke`.
pub async fn revoke_connection_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(mip_id): Path<String>,
    body: Bytes,
) -> ApiResult<Connection> {
    let payload: ReasonRequest = parse_body_or_default(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.revoke_connection(&mip_id, payload.reason)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `POST /api/admin/connections/{mip_id}/restore`.
pub async fn restore_connection_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(mip_id): Path<String>,
) -> ApiResult<Connection> {
    let node = state.node.clone();
    let outcome = blocking(move || node.restore_connection(&mip_id)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `GET /api/admin/connections/{mip_id}/connected_organizations`.
pub async fn peer_connected_organizations_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(mip_id): Path<String>,
) -> ApiResult<ConnectedOrganizations> {
    let peer = active_peer(&state, mip_id).await?;
    Ok(ok(state.client.connected_organizations(&peer).await?))
}

/// Handler for `POST /api/admin/connections/{mip_id}/member_status_checks`.
pub async fn peer_member_status_check_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(mip_id): Path<String>,
    body: Bytes,
) -> ApiResult<Value> {
    let payload: PeerStatusCheckRequest = parse_body(&body)?;
    if payload.member_number.trim().is_empty() {
        return Err(ApiError::BadRequest("member_number is required".to_string()));
    }
    let peer = active_peer(&state, mip_id).await?;
    Ok(ok(state
        .client
        .member_status_check(&peer, payload.member_number.trim())
        .await?))
}

/// Handler for `GET /api/admin/members`.
pub async fn list_members_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Vec<Member>> {
    let node = state.node.clone();
    Ok(ok(blocking(move || node.members()).await?))
}

/// Handler for `GET /api/admin/searches`.
pub async fn list_searches_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Vec<SearchRequest>> {
    let node = state.node.clone();
    Ok(ok(blocking(move || node.searches()).await?))
}

/// Handler for `POST /api/admin/searches`.
pub async fn start_search_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<SearchRequest> {
    let payload: StartSearchRequest = parse_body(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || {
        node.start_search(&payload.target_mip_identifier, payload.params, payload.notes)
    })
    .await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `POST /api/admin/searches/{shared_id}/approve`.
pub async fn approve_search_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(shared_id): Path<String>,
) -> ApiResult<SearchRequest> {
    let node = state.node.clone();
    let outcome = blocking(move || node.approve_search(&shared_id)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `POST /api/admin/searches/{shared_id}/decline`.
pub async fn decline_search_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(shared_id): Path<String>,
    body: Bytes,
) -> ApiResult<SearchRequest> {
    let payload: ReasonRequest = parse_body_or_default(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.decline_search(&shared_id, payload.reason)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `GET /api/admin/cogs`.
pub async fn list_cogs_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Vec<CogsRequest>> {
    let node = state.node.clone();
    Ok(ok(blocking(move || node.cogs_requests()).await?))
}

/// Handler for `POST /api/admin/cogs`.
pub async fn start_cogs_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<CogsRequest> {
    let payload: StartCogsRequest = parse_body(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || {
        node.start_cogs(
            &payload.target_mip_identifier,
            payload.requesting_member,
            &payload.requested_member_number,
            payload.notes,
        )
    })
    .await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `POST /api/admin/cogs/{shared_id}/approve`.
pub async fn approve_cogs_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(shared_id): Path<String>,
) -> ApiResult<CogsRequest> {
    let node = state.node.clone();
    let outcome = blocking(move || node.approve_cogs(&shared_id)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `POST /api/admin/cogs/{shared_id}/decline`.
pub async fn decline_cogs_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(shared_id): Path<String>,
    body: Bytes,
) -> ApiResult<CogsRequest> {
    let payload: ReasonRequest = parse_body_or_default(&body)?;
    let node = state.node.clone();
    let outcome = blocking(move || node.decline_cogs(&shared_id, payload.reason)).await?;
    enqueue(&state, outcome.jobs);
    Ok(ok(outcome.value))
}

/// Handler for `GET /api/admin/activity?limit=N`.
pub async fn activity_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Vec<ActivityEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
    let node = state.node.clone();
    Ok(ok(blocking(move || node.recent_activity(limit)).await?))
}

/// Handler for `GET /api/admin/endorsements`.
pub async fn list_endorsements_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Vec<Endorsement>> {
    let node = state.node.clone();
    Ok(ok(blocking(move || node.endorsements()).await?))
}

/// The address of an ACTIVE connection, for synchronous peer calls.
async fn active_peer(state: &AppState, mip_id: String) -> Result<PeerAddress, ApiError> {
    let node = state.node.clone();
    blocking(move || {
        let connection = node
            .connection(&mip_id)?
            .ok_or_else(|| FederationError::ConnectionNotFound(mip_id.clone()))?;
        if !connection.is_active() {
            return Err(FederationError::NotConnected(mip_id));
        }
        Ok(PeerAddress::from(&connection))
    })
    .await
}
