//! Ports to the outside world: the governance backend and the chain API.
//!
//! Both are traits so the codec, builder and poller can be exercised against
//! in-memory doubles ([`crate::mock`]). [`http`] holds the real clients.
//!
//! ## Backend REST shapes
//!
//! ```text
//! GET  /api/proposal/{id}/status   -> Proposal
//! GET  /api/proposal/{id}/utxos    -> { "matching_utxos": [MatchingUtxo] }
//! POST /api/validate_gov_tx        <- ValidateGovTxRequest
//!                                  -> { "valid": bool, "reason": string? }
//! ```

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::proposal::{MatchingUtxo, Proposal, Utxo};

pub use http::{HttpBackend, HttpChain};

/// Body of `POST /api/validate_gov_tx`: the proposal as the client now
/// believes it to be, plus the transaction that got it there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateGovTxRequest {
    pub proposal: Proposal,
    pub tx_hash: String,
    /// `Create` or a redeemer action name.
    pub action: String,
    pub signer_pkh: String,
    /// Hex CBOR of the datum the transaction wrote.
    pub datum: String,
    /// Hex CBOR of the redeemer, for updates.
    #[serde(default)]
    pub redeemer: Option<String>,
}

/// Backend verdict on a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `GET /api/proposal/{id}/utxos` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxosResponse {
    #[serde(default)]
    pub matching_utxos: Vec<MatchingUtxo>,
}

/// The application backend that indexes proposals.
#[async_trait]
pub trait GovernanceBackend: Send + Sync {
    /// Authoritative record of a proposal.
    async fn fetch_status(&self, proposal_id: &str) -> Result<Proposal>;

    /// Outputs at the validator address that belong to the proposal. The
    /// current one is first.
    async fn fetch_utxos(&self, proposal_id: &str) -> Result<Vec<MatchingUtxo>>;

    /// Asks the backend to verify and record a submitted transaction.
    async fn validate_gov_tx(&self, request: &ValidateGovTxRequest) -> Result<ValidationVerdict>;
}

/// Chain indexer and submission endpoint used by the local key wallet.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn address_utxos(&self, address: &str) -> Result<Vec<Utxo>>;

    /// Submits a serialized transaction. Returns its hash.
    async fn submit_tx(&self, tx_cbor: &[u8]) -> Result<String>;
}
