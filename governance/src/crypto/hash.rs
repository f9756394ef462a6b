//! # Hashing Utilities
//!
//! The two BLAKE2b widths the ledger uses. Both return fixed-size arrays so
//! the length is part of the type; call `hex::encode` at the edge when a
//! string is needed.

use crate::config::PKH_LENGTH;

/// BLAKE2b with a 224-bit digest.
///
/// Used for payment key hashes (`blake2b_224(vkey)`) and script hashes
/// (`blake2b_224(tag || script)`).
///
/// # Example
///
/// ```
/// use verity_governance::crypto::blake2b_224;
///
/// assert_eq!(blake2b_224(b"verity").len(), 28);
/// ```
pub fn blake2b_224(data: &[u8]) -> [u8; PKH_LENGTH] {
    let digest = blake2b_simd::Params::new().hash_length(PKH_LENGTH).hash(data);
    let mut out = [0u8; PKH_LENGTH];
    out.copy_from_slice(digest.as_bytes());
    out
}

/// BLAKE2b with a 256-bit digest.
///
/// Transaction ids are `blake2b_256(body_cbor)`. So are the auxiliary-data
/// and script-data integrity hashes carried in the body.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let digest = blake2b_simd::Params::new().hash_length(32).hash(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    out
}
