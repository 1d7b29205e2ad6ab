//! Canonical request signatures and timestamp freshness.
//!
//! A request is signed over `timestamp ++ path ++ body`, where `body` is the
//! raw JSON exactly as transmitted. The verifying side must feed the same
//! bytes back in; re-serialising the JSON breaks the signature.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rsa::RsaPrivateKey;

use crate::crypto;
use crate::error::CryptoError;

/// Builds the byte string covered by a request signature.
///
/// The body is appended only when present and non-empty.
pub fn build_signature_data(timestamp: &str, path: &str, body: Option<&[u8]>) -> Vec<u8> {
    let body = body.unwrap_or_default();
    let mut data = Vec::with_capacity(timestamp.len() + path.len() + body.len());
    data.extend_from_slice(timestamp.as_bytes());
    data.extend_from_slice(path.as_bytes());
    data.extend_from_slice(body);
    data
}

/// Signs a request and returns the base64 signature for the signature header.
pub fn sign_request(
    private_key: &RsaPrivateKey,
    timestamp: &str,
    path: &str,
    body: Option<&[u8]>,
) -> Result<String, CryptoError> {
    crypto::sign(private_key, &build_signature_data(timestamp, path, body))
}

/// Verifies a request signature. Never errors; any failure is `false`.
pub fn verify_request(
    public_key_pem: &str,
    signature: &str,
    timestamp: &str,
    path: &str,
    body: Option<&[u8]>,
) -> bool {
    crypto::verify(
        public_key_pem,
        signature,
        &build_signature_data(timestamp, path, body),
    )
}

/// Parses an ISO-8601 timestamp. Strings without an offset are read as UTC.
pub fn parse_timestamp(timestamp: &str) -> Option<DateTime<Utc>> {
    let timestamp = timestamp.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whether `timestamp` lies within `window_secs` of the current time.
pub fn timestamp_valid(timestamp: &str, window_secs: i64) -> bool {
    timestamp_valid_at(timestamp, Utc::now(), window_secs)
}

/// Whether `timestamp` lies within `window_secs` of `now`, inclusive.
///
/// Unparseable timestamps are never valid.
pub fn timestamp_valid_at(timestamp: &str, now: DateTime<Utc>, window_secs: i64) -> bool {
    match parse_timestamp(timestamp) {
        Some(at) => (now - at).num_milliseconds().abs() <= window_secs.saturating_mul(1000),
        None => false,
    }
}

/// The current time in the wire format used for `X-MIP-TIMESTAMP`.
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
