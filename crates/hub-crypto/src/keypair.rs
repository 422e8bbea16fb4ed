//! Keypair handling, grounded in the teacher's `chronx_crypto::keypair::
//! KeyPair` (same shape: generate, sign, zeroize the secret on drop). The
//! core never holds a `SigningKey` beyond test fixtures and the admin
//! bootstrap path — production callers sign off-box and submit only
//! `(public_key, signature)`.

use ed25519_dalek::{Signer, SigningKey};
use hub_core::types::Pid;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

pub struct HubKeyPair {
    pid: Pid,
    public_key: [u8; 32],
    signing_key: Zeroizing<[u8; 32]>,
}

impl HubKeyPair {
    /// Generate a fresh Ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key().to_bytes();
        let pid = Pid::from_public_key_bytes(&public_key);
        Self {
            pid,
            public_key,
            signing_key: Zeroizing::new(signing_key.to_bytes()),
        }
    }

    /// Restore a keypair from raw secret key bytes (e.g. loaded from a
    /// wallet file). Never called by production node code.
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        let public_key = signing_key.verifying_key().to_bytes();
        let pid = Pid::from_public_key_bytes(&public_key);
        Self {
            pid,
            public_key,
            signing_key: Zeroizing::new(secret),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn public_key_bytes(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signing_key = SigningKey::from_bytes(&self.signing_key);
        signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for HubKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HubKeyPair {{ pid: {:?} }}", self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_derives_from_public_key() {
        let kp = HubKeyPair::generate();
        assert_eq!(kp.pid(), Pid::from_public_key_bytes(kp.public_key_bytes()));
    }
}
