//! Authentication of inbound MIP requests.

use base64::Engine;
use chrono::{DateTime, Utc};

use crate::connection::Connection;
use crate::error::AuthError;

/// The MIP headers of an inbound request, as extracted by the transport.
#[derive(Debug, Clone, Default)]
pub struct MipHeaders {
    pub mip_identifier: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    /// Base64 of the sender's PEM public key; only sent on first contact.
    pub public_key: Option<String>,
}

/// An authenticated sender.
#[derive(Debug, Clone)]
pub struct VerifiedSender {
    pub mip_identifier: String,
    /// This node's record of the sender, if one exists.
    pub connection: Option<Connection>,
    /// The PEM key the signature was verified with.
    pub public_key: String,
}

impl VerifiedSender {
    pub fn is_active(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_active)
    }

    /// The sender's organization name, falling back to its identifier.
    pub fn organization(&self) -> &str {
        self.connection
            .as_ref()
            .map(|c| c.organization_legal_name.as_str())
            .unwrap_or(&self.mip_identifier)
    }
}

/// Authenticates a request signed over `timestamp ++ path ++ body`.
///
/// The key on file for an existing connection wins over a key presented in
/// the headers; the header key is only used for senders this node has no
/// key for.
pub fn authenticate<F>(
    headers: &MipHeaders,
    path: &str,
    body: &[u8],
    lookup: F,
    now: DateTime<Utc>,
    window_secs: i64,
) -> Result<VerifiedSender, AuthError>
where
    F: FnOnce(&str) -> Option<Connection>,
{
    let (Some(mip_identifier), Some(timestamp), Some(signature)) = (
        non_empty(&headers.mip_identifier),
        non_empty(&headers.timestamp),
        non_empty(&headers.signature),
    ) else {
        return Err(AuthError::MissingHeaders);
    };

    if !mip_identity::timestamp_valid_at(timestamp, now, window_secs) {
        tracing::debug!(%mip_identifier, %timestamp, "request timestamp outside window");
        return Err(AuthError::StaleTimestamp);
    }

    let connection = lookup(mip_identifier);
    let public_key = connection
        .as_ref()
        .and_then(|c| c.public_key.clone())
        .or_else(|| non_empty(&headers.public_key).and_then(decode_header_key))
        .ok_or(AuthError::UnknownSender)?;

    let body = (!body.is_empty()).then_some(body);
    if !mip_identity::verify_request(&public_key, signature, timestamp, path, body) {
        return Err(AuthError::InvalidSignature);
    }

    Ok(VerifiedSender {
        mip_identifier: mip_identifier.to_string(),
        connection,
        public_key,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn decode_header_key(encoded: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::identity;
    use chrono::{Duration, SecondsFormat};
    use mip_identity::NodeIdentity;

    const PATH: &str = "/mip/node/abc/mip_connections";

    fn signed(
        sender: &NodeIdentity,
        now: DateTime<Utc>,
        body: &[u8],
        with_key: bool,
    ) -> MipHeaders {
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let body_opt = (!body.is_empty()).then_some(body);
        MipHeaders {
            mip_identifier: Some(sender.mip_identifier().to_string()),
            signature: Some(sender.sign_request(&timestamp, PATH, body_opt).unwrap()),
            timestamp: Some(timestamp),
            public_key: with_key
                .then(|| base64::engine::general_purpose::STANDARD.encode(sender.public_key_pem())),
        }
    }

    fn known(peer: &NodeIdentity) -> Connection {
        let mut conn = Connection::inbound(&peer.to_node_profile(), 100);
        conn.approve(None, None).unwrap();
        conn
    }

    #[test]
    fn first_contact_uses_header_key() {
        let sender = identity("Alpha");
        let now = Utc::now();
        let headers = signed(&sender, now, b"{}", true);
        let verified = authenticate(&headers, PATH, b"{}", |_| None, now, 300).unwrap();
        assert_eq!(verified.mip_identifier, sender.mip_identifier());
        assert!(verified.connection.is_none());
        assert!(!verified.is_active());
    }

    #[test]
    fn missing_headers() {
        let headers = MipHeaders {
            mip_identifier: Some("x".into()),
            timestamp: Some(" ".into()),
            ..Default::default()
        };
        let err = authenticate(&headers, PATH, b"", |_| None, Utc::now(), 300).unwrap_err();
        assert_eq!(err, AuthError::MissingHeaders);
        assert!(err.is_malformed());
    }

    #[test]
    fn stale_timestamp() {
        let sender = identity("Alpha");
        let now = Utc::now();
        let headers = signed(&sender, now - Duration::seconds(301), b"", true);
        let err = authenticate(&headers, PATH, b"", |_| None, now, 300).unwrap_err();
        assert_eq!(err, AuthError::StaleTimestamp);
    }

    #[test]
    fn unknown_sender_without_key() {
        let sender = identity("Alpha");
        let now = Utc::now();
        let headers = signed(&sender, now, b"", false);
        let err = authenticate(&headers, PATH, b"", |_| None, now, 300).unwrap_err();
        assert_eq!(err, AuthError::UnknownSender);
    }

    #[test]
    fn stored_key_overrides_header_key() {
        let sender = identity("Alpha");
        let impostor = identity("Bravo");
        let now = Utc::now();

        // Signed by the impostor, presenting its own key, under Alpha's id.
        let mut headers = signed(&impostor, now, b"{}", true);
        headers.mip_identifier = Some(sender.mip_identifier().to_string());
        let err =
            authenticate(&headers, PATH, b"{}", |_| Some(known(&sender)), now, 300).unwrap_err();
        assert_eq!(err, AuthError::InvalidSignature);

        let genuine = signed(&sender, now, b"{}", false);
        let verified =
            authenticate(&genuine, PATH, b"{}", |_| Some(known(&sender)), now, 300).unwrap();
        assert!(verified.is_active());
    }

    #[test]
    fn tampered_body_or_path_fails() {
        let sender = identity("Alpha");
        let now = Utc::now();
        let headers = signed(&sender, now, br#"{"a":1}"#, true);
        assert_eq!(
            authenticate(&headers, PATH, br#"{"a":2}"#, |_| None, now, 300).unwrap_err(),
            AuthError::InvalidSignature
        );
        assert_eq!(
            authenticate(&headers, "/mip/node/other", br#"{"a":1}"#, |_| None, now, 300)
                .unwrap_err(),
            AuthError::InvalidSignature
        );
    }
}
