//! Node identifier generation.

use md5::{Digest, Md5};
use uuid::Uuid;

/// Generates a node identifier: the MD5 of a random UUID concatenated with
/// the organization name, as 32 lowercase hex characters.
///
/// The randomness dominates, so two calls for the same organization never
/// collide in practice.
pub fn generate(organization_name: &str) -> String {
    let seed = format!("{}{}", Uuid::new_v4(), organization_name);
    hex::encode(Md5::digest(seed.as_bytes()))
}
