//! Deterministic rotation fingerprints.
//!
//! The fingerprint identifies a rotation request for at-most-once semantics:
//! equal fingerprints must plan and execute equivalently against the same
//! backend state. It hashes the canonical string form of the service ref
//! (sorted options), the strategy, the policy and a digest of the supplied
//! new value — never the value itself.

use sha2::{Digest, Sha256};

use crate::model::RotationRequest;

/// Compute the fingerprint for a request.
///
/// Pure: no clocks, no randomness, no I/O.
pub fn fingerprint(request: &RotationRequest) -> String {
    let mut hasher = Sha256::new();
    // The canonical Display form sorts options, so key order in the
    // original URI cannot perturb the hash.
    hasher.update(request.service_ref.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(request.strategy.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(request.policy.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
    if let Some(value) = &request.new_value {
        let digest = value.expose(|v| Sha256::digest(v.as_bytes()));
        hasher.update(digest);
    }
    hex::encode(hasher.finalize())
}
