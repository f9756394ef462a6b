//! # Payment Keys
//!
//! Ed25519 keypairs for the local key wallet, and the key-hash derivation
//! every signer identity in the governance datum is built on.
//!
//! ## Security considerations
//!
//! - Secret keys are zeroized on drop (ed25519-dalek does this for us).
//! - Key generation uses `OsRng`.
//! - Key bytes are never logged. `Debug` prints the key hash only.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;

use super::hash::blake2b_224;
use crate::config::PKH_LENGTH;

/// Errors that can occur during key operations.
///
/// Deliberately vague about *why*: error text is not the place to leak
/// anything about key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not hex")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// An Ed25519 payment keypair.
///
/// Intentionally does NOT implement `Serialize`. Persisting a secret key
/// should be a conscious act, done through [`PaymentKeypair::secret_key_hex`].
pub struct PaymentKeypair {
    signing_key: SigningKey,
}

impl PaymentKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build a keypair from a 32-byte seed. A weak seed gives a weak key.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from a hex-encoded 32-byte secret (surrounding
    /// whitespace is ignored, so key files with a trailing newline work).
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; SECRET_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Export the secret as hex. Handle with care.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Raw 32-byte verification key. This is what goes into a vkey witness.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Payment key hash: `blake2b_224(vkey)`. This is the PKH that identifies
    /// owners, proposers and voters in the datum.
    pub fn key_hash(&self) -> [u8; PKH_LENGTH] {
        blake2b_224(&self.public_key_bytes())
    }

    /// Hex form of [`key_hash`](Self::key_hash).
    pub fn key_hash_hex(&self) -> String {
        hex::encode(self.key_hash())
    }

    /// Sign a message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for PaymentKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for PaymentKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentKeypair(pkh={})", self.key_hash_hex())
    }
}

/// Verify a witness signature against a raw verification key.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
    let key_bytes: [u8; 32] = public_key.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| KeyError::InvalidPublicKey)?;
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return Ok(false);
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    Ok(key.verify(message, &sig).is_ok())
}
