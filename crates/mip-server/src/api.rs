//! Shared plumbing for the HTTP handlers: the error type, the response
//! envelope and the blocking-call helper.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mip_federation::FederationError;
use mip_types::MipResponse;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::client::ClientError;

/// The only message a peer sees when authentication fails.
pub const AUTH_FAILED_MESSAGE: &str = "invalid request authentication";

/// Error type for all handlers. Rendered in the `{meta, data}` envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("peer request failed: {0}")]
    BadGateway(String),
    #[error("internal error: {0}")]
    InternalServerError(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(MipResponse::failed(serde_json::json!({
            "error": self.to_string()
        })));
        (status, body).into_response()
    }
}

impl From<FederationError> for ApiError {
    fn from(e: FederationError) -> Self {
        match e {
            FederationError::Malformed(msg) => ApiError::BadRequest(msg),
            FederationError::InvalidEndorsement(msg) => {
                ApiError::BadRequest(format!("invalid endorsement: {msg}"))
            }
            FederationError::Auth(auth) if auth.is_malformed() => {
                ApiError::BadRequest(auth.to_string())
            }
            FederationError::Auth(_) => ApiError::Unauthorized(AUTH_FAILED_MESSAGE),
            FederationError::NotConnected(_) => ApiError::Forbidden(e.to_string()),
            FederationError::ConnectionNotFound(_)
            | FederationError::SearchNotFound(_)
            | FederationError::CogsNotFound(_)
            | FederationError::MemberNotFound(_) => ApiError::NotFound(e.to_string()),
            FederationError::Transition(_) => ApiError::Conflict(e.to_string()),
            FederationError::Crypto(_) | FederationError::LockPoisoned => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(e: ClientError) -> Self {
        ApiError::BadGateway(e.to_string())
    }
}

/// Handler result carrying the success envelope.
pub type ApiResult<T> = Result<Json<MipResponse<T>>, ApiError>;

/// Wraps `data` in a successful envelope.
pub fn ok<T>(data: T) -> Json<MipResponse<T>> {
    Json(MipResponse::ok(data))
}

/// Runs a node operation on the blocking pool. Node operations take the
/// store lock and may verify RSA signatures, so they stay off the async
/// workers.
pub async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, FederationError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
        .map_err(ApiError::from)
}

/// Parses a JSON request body.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("malformed JSON body: {}", e)))
}

/// Parses a JSON request body, treating an empty body as `T::default()`.
pub fn parse_body_or_default<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        parse_body(body)
    }
}
