//! HTTP surface of a MIP node.
//!
//! Exposes the peer-facing protocol endpoints under `/mip/node/{id}`, every
//! one of them behind request-signature verification, plus a bearer-token
//! admin API for the local operator. Calls to peers never happen on the
//! request path: handlers hand [`mip_federation::OutboundJob`]s to the queue
//! drained by [`background::run_outbound_worker`].

pub mod api;
pub mod api_admin;
pub mod api_mip;
pub mod background;
pub mod client;
pub mod config;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use mip_federation::{MipNode, OutboundJob};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

pub use client::MipClient;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The trust engine: identity, policy and all node state.
    pub node: Arc<MipNode>,
    /// Producer side of the outbound job queue.
    pub outbound: mpsc::Sender<OutboundJob>,
    /// Signed client for synchronous peer calls made by the admin API.
    pub client: MipClient,
    /// Bearer token guarding `/api/admin`. `None` disables the admin API.
    pub admin_token: Option<String>,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Maximum request body size. MIP payloads are small JSON documents.
pub(crate) const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let mip_routes = Router::new()
        .route(
            "/mip/node/{mip_id}/mip_connections",
            post(api_mip::connection_request_handler),
        )
        .route(
            "/mip/node/{mip_id}/mip_connections/approved",
            post(api_mip::connection_approved_handler),
        )
        .route(
            "/mip/node/{mip_id}/mip_connections/declined",
            post(api_mip::connection_declined_handler),
        )
        .route(
            "/mip/node/{mip_id}/mip_connections/revoke",
            post(api_mip::connection_revoked_handler),
        )
        .route(
            "/mip/node/{mip_id}/mip_connections/restore",
            post(api_mip::connection_restored_handler),
        )
        .route(
            "/mip/node/{mip_id}/endorsements",
            post(api_mip::endorsement_handler),
        )
        .route(
            "/mip/node/{mip_id}/connected_organizations_query",
            get(api_mip::connected_organizations_handler),
        )
        .route(
            "/mip/node/{mip_id}/mip_member_searches",
            post(api_mip::search_request_handler),
        )
        .route(
            "/mip/node/{mip_id}/mip_member_searches/reply",
            post(api_mip::search_reply_handler),
        )
        .route(
            "/mip/node/{mip_id}/certificates_of_good_standing",
            post(api_mip::cogs_request_handler),
        )
        .route(
            "/mip/node/{mip_id}/certificates_of_good_standing/reply",
            post(api_mip::cogs_reply_handler),
        )
        .route(
            "/mip/node/{mip_id}/member_status_checks",
            post(api_mip::member_status_check_handler),
        )
        .route_layer(axum::middleware::from_fn(middleware::verify_mip_request));

    let admin_routes = Router::new()
        .route("/api/admin/node", get(api_admin::node_handler))
        .route(
            "/api/admin/connections",
            get(api_admin::list_connections_handler).post(api_admin::initiate_connection_handler),
        )
        .route(
            "/api/admin/connections/{mip_id}",
            get(api_admin::get_connection_handler),
        )
        .route(
            "/api/admin/connections/{mip_id}/approve",
            post(api_admin::approve_connection_handler),
        )
        .route(
            "/api/admin/connections/{mip_id}/decline",
            post(api_admin::decline_connection_handler),
        )
        .route(
            "/api/admin/connections/{mip_id}/revoke",
            post(api_admin::revoke_connection_handler),
        )
        .route(
            "/api/admin/connections/{mip_id}/restore",
            post(api_admin::restore_connection_handler),
        )
        .route(
            "/api/admin/connections/{mip_id}/connected_organizations",
            get(api_admin::peer_connected_organizations_handler),
        )
        .route(
            "/api/admin/connections/{mip_id}/member_status_checks",
            post(api_admin::peer_member_status_check_handler),
        )
        .route("/api/admin/members", get(api_admin::list_members_handler))
        .route(
            "/api/admin/searches",
            get(api_admin::list_searches_handler).post(api_admin::start_search_handler),
        )
        .route(
            "/api/admin/searches/{shared_id}/approve",
            post(api_admin::approve_search_handler),
        )
        .route(
            "/api/admin/searches/{shared_id}/decline",
            post(api_admin::decline_search_handler),
        )
        .route(
            "/api/admin/cogs",
            get(api_admin::list_cogs_handler).post(api_admin::start_cogs_handler),
        )
        .route(
            "/api/admin/cogs/{shared_id}/approve",
            post(api_admin::approve_cogs_handler),
        )
        .route(
            "/api/admin/cogs/{shared_id}/decline",
            post(api_admin::decline_cogs_handler),
        )
        .route("/api/admin/activity", get(api_admin::activity_handler))
        .route(
            "/api/admin/endorsements",
            get(api_admin::list_endorsements_handler),
        )
        .route_layer(axum::middleware::from_fn(middleware::admin_auth));

    Router::new()
        .route("/health", get(health))
        .merge(mip_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
