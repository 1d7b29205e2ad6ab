//! The local node's identity.

use mip_types::NodeProfile;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::crypto;
use crate::error::CryptoError;
use crate::identifier;
use crate::signature;

/// Organization metadata a node is started with.
#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub organization_name: String,
    pub contact_person: Option<String>,
    pub contact_phone: Option<String>,
    /// Externally reachable base URL; the node's MIP URL is derived from it.
    pub public_url: String,
    pub share_my_organization: bool,
    /// Minimum number of trusted endorsements for auto-approval (>= 1).
    pub trust_threshold: u32,
}

/// This node's cryptographic identity and public profile.
///
/// Created once at startup and never mutated. The private key never leaves
/// the process: nothing here serialises it.
#[derive(Clone)]
pub struct NodeIdentity {
    mip_identifier: String,
    private_key: RsaPrivateKey,
    public_key_pem: String,
    organization_name: String,
    contact_person: Option<String>,
    contact_phone: Option<String>,
    mip_url: String,
    share_my_organization: bool,
    trust_threshold: u32,
}

impl NodeIdentity {
    /// Generates a fresh keypair and identifier for `settings`.
    pub fn generate(settings: IdentitySettings) -> Result<Self, CryptoError> {
        let (private_key, _) = crypto::generate_key_pair()?;
        let mip_identifier = identifier::generate(&settings.organization_name);
        Self::from_private_key(mip_identifier, private_key, settings)
    }

    /// Builds an identity around an existing key and identifier.
    pub fn from_private_key(
        mip_identifier: String,
        private_key: RsaPrivateKey,
        settings: IdentitySettings,
    ) -> Result<Self, CryptoError> {
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let mip_url = format!(
            "{}/mip/node/{}",
            settings.public_url.trim_end_matches('/'),
            mip_identifier
        );

        tracing::debug!(%mip_identifier, %mip_url, "node identity created");

        Ok(Self {
            mip_identifier,
            private_key,
            public_key_pem,
            organization_name: settings.organization_name,
            contact_person: settings.contact_person,
            contact_phone: settings.contact_phone,
            mip_url,
            share_my_organization: settings.share_my_organization,
            trust_threshold: settings.trust_threshold.max(1),
        })
    }

    pub fn mip_identifier(&self) -> &str {
        &self.mip_identifier
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    pub fn organization_name(&self) -> &str {
        &self.organization_name
    }

    pub fn contact_person(&self) -> Option<&str> {
        self.contact_person.as_deref()
    }

    pub fn contact_phone(&self) -> Option<&str> {
        self.contact_phone.as_deref()
    }

    pub fn mip_url(&self) -> &str {
        &self.mip_url
    }

    pub fn share_my_organization(&self) -> bool {
        self.share_my_organization
    }

    pub fn trust_threshold(&self) -> u32 {
        self.trust_threshold
    }

    /// Fingerprint of this node's public key.
    pub fn fingerprint(&self) -> Result<String, CryptoError> {
        crypto::fingerprint_key(&RsaPublicKey::from(&self.private_key))
    }

    /// Signs arbitrary data (endorsement documents, certificates).
    pub fn sign(&self, data: &[u8]) -> Result<String, CryptoError> {
        crypto::sign(&self.private_key, data)
    }

    /// Signs an outbound request.
    pub fn sign_request(
        &self,
        timestamp: &str,
        path: &str,
        body: Option<&[u8]>,
    ) -> Result<String, CryptoError> {
        signature::sign_request(&self.private_key, timestamp, path, body)
    }

    /// The profile this node presents to peers.
    pub fn to_node_profile(&self) -> NodeProfile {
        NodeProfile {
            mip_identifier: self.mip_identifier.clone(),
            mip_url: self.mip_url.clone(),
            organization_legal_name: self.organization_name.clone(),
            contact_person: self.contact_person.clone(),
            contact_phone: self.contact_phone.clone(),
            public_key: Some(self.public_key_pem.clone()),
            share_my_organization: self.share_my_organization,
        }
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("mip_identifier", &self.mip_identifier)
            .field("organization_name", &self.organization_name)
            .field("mip_url", &self.mip_url)
            .field("trust_threshold", &self.trust_threshold)
            .finish_non_exhaustive()
    }
}
