//! Signature verification contract (SPEC_FULL.md §4.1):
//! `verify(pubkey, canonical_json(payload_without_signatures), signature)
//! → bool`, surfaced here as a `Result` so callers get `InvalidSignature`.

use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed public key")]
    MalformedPublicKey,
}

/// Verify a detached Ed25519 signature over `message`.
pub fn verify_detached(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), SignatureError> {
    let vk = VerifyingKey::from_bytes(public_key).map_err(|_| SignatureError::MalformedPublicKey)?;
    let sig = Signature::from_bytes(signature);
    vk.verify_strict(message, &sig)
        .map_err(|_| SignatureError::InvalidSignature)
}
