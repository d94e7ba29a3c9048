//! Replica key pairs and signatures.
//!
//! Every consensus vote, certificate, 2PC message and sync response is
//! authenticated with an ED25519 signature from the sending replica.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A replica's signing key.
#[derive(Clone)]
pub struct KeyPair(ed25519_dalek::SigningKey);

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        KeyPair(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Generate a keypair from a seed (for testing/simulation).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        KeyPair(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message).to_bytes().to_vec())
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.public_key())
    }
}

/// A public key for signature verification.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Verify a signature.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        use ed25519_dalek::Verifier;
        let pk = match ed25519_dalek::VerifyingKey::from_bytes(&self.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig_array: [u8; 64] = match signature.0.as_slice().try_into() {
            Ok(arr) => arr,
            Err(_) => return false,
        };
        let sig = ed25519_dalek::Signature::from_bytes(&sig_array);
        pk.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &hex::encode(self.0)[..16])
    }
}

/// An ED25519 signature (64 bytes).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    /// Create a zero/placeholder signature for testing.
    pub fn zero() -> Self {
        Signature(vec![0u8; 64])
    }

    /// Get signature as byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0);
        write!(f, "Signature({}..)", &hex[..hex.len().min(16)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = KeyPair::generate();
        let message = b"test message";

        let signature = keypair.sign(message);
        assert!(keypair.public_key().verify(message, &signature));
    }

    #[test]
    fn test_verify_fails_wrong_message() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"test message");

        assert!(!keypair.public_key().verify(b"wrong message", &signature));
    }

    #[test]
    fn test_verify_fails_wrong_key() {
        let signer = KeyPair::from_seed(&[1u8; 32]);
        let other = KeyPair::from_seed(&[2u8; 32]);
        let signature = signer.sign(b"vote");

        assert!(!other.public_key().verify(b"vote", &signature));
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let keypair = KeyPair::generate();
        let mut signature = keypair.sign(b"vote");
        signature.0.truncate(10);

        assert!(!keypair.public_key().verify(b"vote", &signature));
        assert!(!keypair.public_key().verify(b"vote", &Signature::zero()));
    }

    #[test]
    fn test_keypair_from_seed() {
        let seed = [42u8; 32];

        let kp1 = KeyPair::from_seed(&seed);
        let kp2 = KeyPair::from_seed(&seed);

        let msg = b"test";
        assert_eq!(kp1.sign(msg), kp2.sign(msg));
        assert_eq!(kp1.public_key(), kp2.public_key());
    }
}
