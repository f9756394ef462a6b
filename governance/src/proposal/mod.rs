//! # Proposal Domain Model
//!
//! ```text
//! model.rs: Proposal record, status lifecycle, authorization rules, overrides
//! utxo.rs : UTXOs, multi-asset bundles, backend UTXO records
//! ```

pub mod model;
pub mod utxo;

pub use model::{normalize_pkh, normalize_pkh_keys, Proposal, ProposalOverrides, ProposalStatus};
pub use utxo::{AssetAmount, AssetBundle, MatchingUtxo, Utxo};
