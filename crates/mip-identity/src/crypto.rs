//! RSA primitives: key generation, fingerprints, signing, verification.
//!
//! Keys travel between nodes as PEM `SubjectPublicKeyInfo`. Signatures are
//! RSASSA-PKCS1-v1_5 over SHA-256, base64-encoded.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::CryptoError;

/// Modulus size for node keys.
pub const KEY_BITS: usize = 2048;

/// Generates a fresh 2048-bit keypair.
///
/// Returns the private key and the PEM encoding of its public half.
///
/// # Errors
///
/// Returns `CryptoError::Rsa` if the RNG or prime search fails, or
/// `CryptoError::Encoding` if the public key cannot be rendered as PEM.
pub fn generate_key_pair() -> Result<(RsaPrivateKey, String), CryptoError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)?;
    let public_pem = RsaPublicKey::from(&private_key)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    Ok((private_key, public_pem))
}

/// Parses a PEM public key.
///
/// Accepts `SubjectPublicKeyInfo` (`BEGIN PUBLIC KEY`) and falls back to
/// PKCS#1 (`BEGIN RSA PUBLIC KEY`).
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|spki_err| {
            RsaPublicKey::from_pkcs1_pem(pem).map_err(|_| spki_err.to_string())
        })
        .map_err(CryptoError::InvalidPublicKey)
}

/// Colon-separated MD5 fingerprint of a public key's DER encoding.
pub fn fingerprint_key(key: &RsaPublicKey) -> Result<String, CryptoError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    Ok(colon_hex(&Md5::digest(der.as_bytes())))
}

/// Lowercase hex with a colon between each octet.
fn colon_hex(bytes: &[u8]) -> String {
    let encoded = hex::encode(bytes);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 2);
    for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push(pair[0] as char);
        out.push(pair[1] as char);
    }
    out
}

/// Fingerprint of a PEM public key.
///
/// Both PEM flavours of the same key yield the same fingerprint since the
/// hash is taken over the canonical SPKI DER.
pub fn fingerprint(public_key_pem: &str) -> Result<String, CryptoError> {
    fingerprint_key(&parse_public_key(public_key_pem)?)
}

/// Signs `data` with SHA-256 PKCS#1 v1.5 and returns the base64 signature.
pub fn sign(private_key: &RsaPrivateKey, data: &[u8]) -> Result<String, CryptoError> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key
        .try_sign(data)
        .map_err(|e| CryptoError::Signing(e.to_string()))?;
    Ok(STANDARD.encode(signature.to_bytes()))
}

/// Verifies a base64 signature over `data`.
///
/// Returns `false` for an unparseable key, undecodable base64, a signature of
/// the wrong length, or a mismatch.
pub fn verify(public_key_pem: &str, signature_b64: &str, data: &[u8]) -> bool {
    let Ok(public_key) = parse_public_key(public_key_pem) else {
        return false;
    };
    let Ok(raw) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(raw.as_slice()) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(public_key)
        .verify(data, &signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn keys() -> &'static [(RsaPrivateKey, String); 2] {
        static KEYS: OnceLock<[(RsaPrivateKey, String); 2]> = OnceLock::new();
        KEYS.get_or_init(|| {
            [
                generate_key_pair().expect("keygen"),
                generate_key_pair().expect("keygen"),
            ]
        })
    }

    #[test]
    fn generated_public_key_is_spki_pem() {
        let (_, pem) = &keys()[0];
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(parse_public_key(pem).is_ok());
    }

    #[test]
    fn sign_then_verify() {
        let (private_key, pem) = &keys()[0];
        let sig = sign(private_key, b"hello").unwrap();
        assert!(verify(pem, &sig, b"hello"));
    }

    #[test]
    fn verify_is_false_for_wrong_key_and_tampered_data() {
        let (private_key, _) = &keys()[0];
        let (_, other_pem) = &keys()[1];
        let sig = sign(private_key, b"hello").unwrap();
        assert!(!verify(other_pem, &sig, b"hello"));
        assert!(!verify(&keys()[0].1, &sig, b"hellO"));
    }

    #[test]
    fn verify_is_false_for_garbage_inputs() {
        let (private_key, pem) = &keys()[0];
        let sig = sign(private_key, b"data").unwrap();
        assert!(!verify(pem, "%%% not base64 %%%", b"data"));
        assert!(!verify(pem, "c2hvcnQ=", b"data"));
        assert!(!verify("not a key", &sig, b"data"));
        assert!(!verify("", "", b""));
    }

    #[test]
    fn fingerprint_is_deterministic_and_distinct() {
        let (_, a) = &keys()[0];
        let (_, b) = &keys()[1];
        let fp = fingerprint(a).unwrap();
        assert_eq!(fp, fingerprint(a).unwrap());
        assert_ne!(fp, fingerprint(b).unwrap());
        assert_eq!(fp.split(':').count(), 16);
        assert!(fp
            .split(':')
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn colon_hex_separates_octets() {
        assert_eq!(colon_hex(&[0x00, 0xab, 0x0f, 0xff]), "00:ab:0f:ff");
        assert_eq!(colon_hex(&[0x7e]), "7e");
        assert_eq!(colon_hex(&[]), "");
    }

    #[test]
    fn pkcs1_pem_has_same_fingerprint() {
        use rsa::pkcs1::EncodeRsaPublicKey;

        let (private_key, spki_pem) = &keys()[0];
        let pkcs1_pem = RsaPublicKey::from(private_key)
            .to_pkcs1_pem(LineEnding::LF)
            .unwrap();
        assert!(pkcs1_pem.starts_with("-----BEGIN RSA PUBLIC KEY-----"));
        assert_eq!(fingerprint(&pkcs1_pem).unwrap(), fingerprint(spki_pem).unwrap());
    }

    #[test]
    fn fingerprint_rejects_garbage() {
        assert!(matches!(
            fingerprint("-----BEGIN PUBLIC KEY-----\nnope\n-----END PUBLIC KEY-----"),
            Err(CryptoError::InvalidPublicKey(_))
        ));
    }
}
