use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use mip_federation::{FederationError, MipHeaders};
use mip_types::{HEADER_MIP_IDENTIFIER, HEADER_PUBLIC_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::api::ApiError;
use crate::{AppState, MAX_REQUEST_BODY_BYTES};

/// Authenticates every `/mip/node/{id}/...` request.
///
/// The body is buffered so the signature can be checked over the exact bytes
/// received; the handler then reads the same bytes. On success the
/// [`mip_federation::VerifiedSender`] is inserted into the request
/// extensions.
pub async fn verify_mip_request(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or_else(|| ApiError::InternalServerError("application state missing".to_string()))?
        .clone();

    let path = req.uri().path().to_string();
    let own_id = state.node.identity().mip_identifier();
    if addressed_node(&path) != Some(own_id) {
        return Err(ApiError::NotFound(format!("no MIP node at {}", path)));
    }

    let headers = mip_headers(req.headers());
    let claimed_sender = headers.mip_identifier.clone();
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|_| ApiError::BadRequest("request body too large or unreadable".to_string()))?;

    let node = state.node.clone();
    let auth_path = path.clone();
    let auth_body = bytes.clone();
    let result =
        tokio::task::spawn_blocking(move || node.authenticate(&headers, &auth_path, &auth_body))
            .await
            .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?;

    let sender = match result {
        Ok(sender) => sender,
        Err(FederationError::Auth(cause)) => {
            tracing::warn!(
                path = %path,
                mip_identifier = claimed_sender.as_deref().unwrap_or("<none>"),
                reason = %cause,
                "rejected MIP request"
            );
            return Err(FederationError::Auth(cause).into());
        }
        Err(e) => return Err(e.into()),
    };
    tracing::debug!(
        path = %path,
        mip_identifier = %sender.mip_identifier,
        "authenticated MIP request"
    );

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(sender);
    Ok(next.run(req).await)
}

/// Guards the admin API with the configured bearer token.
pub async fn admin_auth(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or_else(|| ApiError::InternalServerError("application state missing".to_string()))?
        .clone();

    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::Forbidden("admin API is disabled".to_string()));
    };

    let authorized = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token_matches(token.trim(), expected));

    if !authorized {
        tracing::warn!(path = %req.uri().path(), "rejected admin request");
        return Err(ApiError::Unauthorized("invalid admin token"));
    }
    Ok(next.run(req).await)
}

/// Compares a presented bearer token with the configured one in constant
/// time. Only a length mismatch returns early.
fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// The node identifier a `/mip/node/{id}/...` path is addressed to.
fn addressed_node(path: &str) -> Option<&str> {
    path.strip_prefix("/mip/node/")?.split('/').next().filter(|id| !id.is_empty())
}

fn mip_headers(headers: &HeaderMap) -> MipHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    MipHeaders {
        mip_identifier: get(HEADER_MIP_IDENTIFIER),
        timestamp: get(HEADER_TIMESTAMP),
        signature: get(HEADER_SIGNATURE),
        public_key: get(HEADER_PUBLIC_KEY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn addressed_node_reads_first_segment() {
        assert_eq!(addressed_node("/mip/node/abc/mip_connections"), Some("abc"));
        assert_eq!(addressed_node("/mip/node/abc"), Some("abc"));
        assert_eq!(addressed_node("/mip/node//endorsements"), None);
        assert_eq!(addressed_node("/api/admin/node"), None);
    }

    #[test]
    fn token_comparison_requires_exact_match() {
        assert!(token_matches("s3cret-token", "s3cret-token"));
        assert!(!token_matches("s3cret-tokem", "s3cret-token"));
        assert!(!token_matches("s3cret", "s3cret-token"));
        assert!(!token_matches("", "s3cret-token"));
        assert!(!token_matches("S3CRET-TOKEN", "s3cret-token"));
    }

    #[test]
    fn headers_are_read_by_protocol_name() {
        let mut map = HeaderMap::new();
        map.insert("x-mip-mip-identifier", HeaderValue::from_static("abc"));
        map.insert("x-mip-timestamp", HeaderValue::from_static("2026-01-01T00:00:00.000Z"));
        let headers = mip_headers(&map);
        assert_eq!(headers.mip_identifier.as_deref(), Some("abc"));
        assert_eq!(headers.timestamp.as_deref(), Some("2026-01-01T00:00:00.000Z"));
        assert!(headers.signature.is_none());
        assert!(headers.public_key.is_none());
    }
}
