mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, SecondsFormat, Utc};
use common::{endorse, identity, signed_request, signed_request_at, TestNode};
use mip_federation::OutboundJob;
use mip_types::{ConnectionStatus, DeclinedRequestPolicy, NodePolicy};
use serde_json::json;

#[tokio::test]
async fn endorsed_request_from_active_peer_is_auto_approved() {
    let mut x = TestNode::new("Alpha Lodge", 1);
    let y = identity("Beta Lodge", 1);
    let z = identity("Gamma Lodge", 1);
    x.activate(&y).await;

    let (status, body) = x.connect_from(&z, vec![endorse(&y, &z)]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["succeeded"], true);
    let reply = &body["data"]["mip_connection"];
    assert_eq!(reply["status"], "ACTIVE");
    assert_eq!(reply["daily_rate_limit"], 100);
    assert_eq!(reply["node_profile"]["mip_identifier"], x.id());
    assert_eq!(reply["endorsement"]["endorsed_mip_identifier"], z.mip_identifier());

    let stored = x.node.connection(z.mip_identifier()).unwrap().unwrap();
    assert_eq!(stored.status(), ConnectionStatus::Active);

    let jobs = x.drain_jobs();
    assert!(matches!(
        jobs.as_slice(),
        [OutboundJob::SendEndorsement { peer }] if peer.mip_identifier == z.mip_identifier()
    ));
}

#[tokio::test]
async fn pending_reply_nests_under_mip_connection() {
    let x = TestNode::new("Alpha Lodge", 1);
    let z = identity("Gamma Lodge", 1);

    let (status, body) = x.connect_from(&z, Vec::new()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["mip_connection"]["status"], "PENDING");
    assert_eq!(body["data"]["mip_connection"]["node_profile"]["mip_identifier"], x.id());
    assert!(body["data"].get("status").is_none());
}

#[tokio::test]
async fn endorsement_from_pending_peer_does_not_count() {
    let x = TestNode::new("Alpha Lodge", 1);
    let y = identity("Beta Lodge", 1);
    let z = identity("Gamma Lodge", 1);

    let (status, _) = x.connect_from(&y, Vec::new()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = x.connect_from(&z, vec![endorse(&y, &z)]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["mip_connection"]["status"], "PENDING");
    assert!(body["data"]["mip_connection"].get("endorsement").is_none());
}

#[tokio::test]
async fn endorsement_receipt_activates_pending_connection() {
    let mut x = TestNode::new("Alpha Lodge", 1);
    let y = identity("Beta Lodge", 1);
    let z = identity("Gamma Lodge", 1);
    x.activate(&y).await;

    let (_, body) = x.connect_from(&z, Vec::new()).await;
    assert_eq!(body["data"]["mip_connection"]["status"], "PENDING");

    let payload = serde_json::to_value(endorse(&y, &z)).unwrap();
    let (status, body) = x.signed(&y, Method::POST, "endorsements", Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["acknowledged"], true);

    let stored = x.node.connection(z.mip_identifier()).unwrap().unwrap();
    assert_eq!(stored.status(), ConnectionStatus::Active);

    let jobs = x.drain_jobs();
    assert!(matches!(
        &jobs[0],
        OutboundJob::NotifyApproved { peer, .. } if peer.mip_identifier == z.mip_identifier()
    ));
    assert!(matches!(
        &jobs[1],
        OutboundJob::SendEndorsement { peer } if peer.mip_identifier == z.mip_identifier()
    ));
}

#[tokio::test]
async fn repeated_request_returns_stored_status() {
    let x = TestNode::new("Alpha Lodge", 1);
    let z = identity("Gamma Lodge", 1);

    let (_, first) = x.connect_from(&z, Vec::new()).await;
    let (status, second) = x.connect_from(&z, Vec::new()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"], second["data"]);
    assert_eq!(x.node.connections().unwrap().len(), 1);
}

#[tokio::test]
async fn declined_node_may_ask_again_when_allowed() {
    let policy = NodePolicy {
        declined_requests: DeclinedRequestPolicy::AllowRerequest,
        ..NodePolicy::default()
    };
    let x = TestNode::with_policy("Alpha Lodge", 1, policy);
    let z = identity("Gamma Lodge", 1);

    x.connect_from(&z, Vec::new()).await;
    x.node
        .decline_connection(z.mip_identifier(), Some("unknown lodge".into()))
        .unwrap();

    let (status, body) = x.connect_from(&z, Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["mip_connection"]["status"], "PENDING");
}

#[tokio::test]
async fn missing_headers_are_malformed() {
    let x = TestNode::new("Alpha Lodge", 1);
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri(x.path("mip_connections"))
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{}"))
        .unwrap();

    let (status, body) = x.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["meta"]["succeeded"], false);
}

#[tokio::test]
async fn stale_timestamp_is_rejected_without_detail() {
    let x = TestNode::new("Alpha Lodge", 1);
    let z = identity("Gamma Lodge", 1);
    let stale = (Utc::now() - Duration::seconds(301)).to_rfc3339_opts(SecondsFormat::Millis, true);
    let body = json!({
        "mip_identifier": z.mip_identifier(),
        "mip_url": z.mip_url(),
        "organization_legal_name": z.organization_name(),
        "public_key": z.public_key_pem(),
    });
    let path = x.path("mip_connections");
    let request = signed_request_at(&z, Method::POST, &path, Some(body), true, &stale);

    let (status, body) = x.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"]["error"], "invalid request authentication");
    assert!(x.node.connections().unwrap().is_empty());
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let x = TestNode::new("Alpha Lodge", 1);
    let z = identity("Gamma Lodge", 1);
    let signed_body = json!({"member_number": "1"});
    let path = x.path("mip_connections");
    let request = signed_request(&z, Method::POST, &path, Some(signed_body), true);
    let (parts, _) = request.into_parts();
    let tampered = axum::body::Body::from(r#"{"member_number":"2"}"#);
    let request = axum::http::Request::from_parts(parts, tampered);

    let (status, body) = x.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"]["error"], "invalid request authentication");
}

#[tokio::test]
async fn unknown_sender_without_key_is_rejected() {
    let x = TestNode::new("Alpha Lodge", 1);
    let z = identity("Gamma Lodge", 1);

    let (status, body) = x
        .signed(&z, Method::POST, "endorsements", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"]["error"], "invalid request authentication");
}

#[tokio::test]
async fn request_for_another_node_is_not_found() {
    let x = TestNode::new("Alpha Lodge", 1);
    let z = identity("Gamma Lodge", 1);
    let path = "/mip/node/someone-else/mip_connections";
    let request = signed_request(&z, Method::POST, path, Some(json!({})), true);

    let (status, _) = x.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn body_claiming_another_identity_is_rejected() {
    let x = TestNode::new("Alpha Lodge", 1);
    let y = identity("Beta Lodge", 1);
    let z = identity("Gamma Lodge", 1);
    let body = serde_json::to_value(mip_federation::ConnectionRequest {
        profile: y.to_node_profile(),
        endorsements: Vec::new(),
    })
    .unwrap();
    let request = signed_request(&z, Method::POST, &x.path("mip_connections"), Some(body), true);

    let (status, _) = x.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(x.node.connections().unwrap().is_empty());
}

#[tokio::test]
async fn connected_organizations_lists_other_sharing_peers() {
    let mut x = TestNode::new("Alpha Lodge", 1);
    let y = identity("Beta Lodge", 1);
    let z = identity("Gamma Lodge", 1);
    x.activate(&y).await;
    x.activate(&z).await;

    let (status, body) = x
        .signed(&y, Method::GET, "connected_organizations_query", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let organizations = body["data"]["organizations"].as_array().unwrap();
    assert_eq!(organizations.len(), 1);
    assert_eq!(organizations[0]["mip_identifier"], z.mip_identifier());
}

#[tokio::test]
async fn connected_organizations_requires_active_connection() {
    let x = TestNode::new("Alpha Lodge", 1);
    let z = identity("Gamma Lodge", 1);
    x.connect_from(&z, Vec::new()).await;

    let (status, _) = x
        .signed(&z, Method::GET, "connected_organizations_query", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn peer_revoke_and_restore_notifications() {
    let mut x = TestNode::new("Alpha Lodge", 1);
    let y = identity("Beta Lodge", 1);
    x.activate(&y).await;

    let (status, body) = x
        .signed(&y, Method::POST, "mip_connections/revoke", Some(json!({"reason": "audit"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"mip_connection": {"status": "REVOKED"}}));

    let (status, body) = x
        .signed(&y, Method::POST, "mip_connections/restore", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["mip_connection"]["status"], "ACTIVE");

    let jobs = x.drain_jobs();
    assert!(jobs
        .iter()
        .any(|job| matches!(
            job,
            OutboundJob::SendEndorsement { peer } if peer.mip_identifier == y.mip_identifier()
        )));
}

#[tokio::test]
async fn approval_notice_for_inbound_request_is_a_conflict() {
    let x = TestNode::new("Alpha Lodge", 1);
    let z = identity("Gamma Lodge", 1);
    x.connect_from(&z, Vec::new()).await;

    let (status, _) = x
        .signed(&z, Method::POST, "mip_connections/approved", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let stored = x.node.connection(z.mip_identifier()).unwrap().unwrap();
    assert_eq!(stored.status(), ConnectionStatus::Pending);
}
