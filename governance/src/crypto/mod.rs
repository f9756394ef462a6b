//! # Cryptographic Primitives
//!
//! Thin, typed wrappers around audited implementations. The ledger fixes
//! both choices for us:
//!
//! - **Ed25519** for payment keys and transaction witnesses.
//! - **BLAKE2b** at 224 bits for key and script hashes, 256 bits for
//!   transaction ids and auxiliary-data / script-data hashes.
//!
//! Nothing in here is clever, and it should stay that way.

pub mod hash;
pub mod keys;

pub use hash::{blake2b_224, blake2b_256};
pub use keys::{KeyError, PaymentKeypair};
