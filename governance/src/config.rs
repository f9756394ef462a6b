//! # Governance Configuration & Constants
//!
//! Every magic number the governance engine depends on lives here. Several of
//! them are shared with the on-chain validator, which we do not control: the
//! redeemer discriminants and the datum layout in particular. Changing one of
//! those on this side only is the fastest way to get every transaction
//! rejected with a script failure.
//!
//! Deployment-specific values (which network, which validator script, which
//! token policy) are carried by [`GovernanceConfig`] instead, so the same
//! binary can talk to a testnet deployment and a mainnet one.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Reconciliation Polling
// ---------------------------------------------------------------------------

/// How many times the poller asks the backend for authoritative state before
/// giving up. 24 attempts at [`POLL_INTERVAL`] is four minutes, comfortably
/// more than the time a transaction needs to land and get indexed.
pub const POLL_MAX_ATTEMPTS: u32 = 24;

/// Fixed delay between status polls. Confirmation latency on the chain is
/// bounded, so there is nothing to gain from exponential backoff.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Prefix of the persisted per-proposal syncing marker key.
pub const SYNC_MARKER_PREFIX: &str = "syncing_";

/// Value stored under a syncing marker. The marker is a flag; only its
/// presence matters.
pub const SYNC_MARKER_VALUE: &str = "1";

// ---------------------------------------------------------------------------
// Redeemer Discriminants
// ---------------------------------------------------------------------------

// These must stay in lockstep with the validator's redeemer constructors.
// Nothing on this side can check that; the chain will tell you, loudly.

pub const REDEEMER_VOTE: u64 = 1;
pub const REDEEMER_UPDATE_AUTHORIZED_PKHS: u64 = 2;
pub const REDEEMER_UPDATE_MIN_VOTING_TOKENS: u64 = 3;
pub const REDEEMER_SET_VOTING_PERIOD: u64 = 4;
pub const REDEEMER_FINALIZE: u64 = 5;
pub const REDEEMER_EXECUTE: u64 = 6;

// ---------------------------------------------------------------------------
// Datum Layout
// ---------------------------------------------------------------------------

/// On-chain outcome value while the vote is still open.
pub const OUTCOME_ONGOING: i128 = 2;

/// On-chain outcome value of an approved proposal.
pub const OUTCOME_APPROVED: i128 = 1;

/// On-chain outcome value of a rejected proposal.
pub const OUTCOME_REJECTED: i128 = 0;

/// Ledger limit on a single CBOR byte or text string inside datums and
/// metadata. Anything longer has to be chunked.
pub const MAX_CHUNK_BYTES: usize = 64;

/// Transaction metadata label under which the proposal record is attached.
pub const PROPOSAL_METADATA_LABEL: u64 = 1694;

/// Schema version of the proposal metadata record.
pub const PROPOSAL_METADATA_VERSION: u32 = 1;

/// Length of a payment key hash in bytes (blake2b-224).
pub const PKH_LENGTH: usize = 28;

// ---------------------------------------------------------------------------
// Transaction Construction
// ---------------------------------------------------------------------------

/// Serialized size of one vkey witness (`[vkey, signature]` with CBOR
/// framing). Added per expected signer when estimating the fee, since the
/// witnesses only exist after the wallet signs.
pub const VKEY_WITNESS_SIZE: u64 = 101;

/// Fixed overhead the min-UTxO rule adds to every output's serialized size.
pub const UTXO_ENTRY_OVERHEAD: u64 = 160;

/// Execution budget declared for the governance validator. The validator is
/// small; this leaves generous headroom and is re-priced with fresh
/// parameters on every build.
pub const DEFAULT_EX_UNITS_MEM: u64 = 2_000_000;

/// See [`DEFAULT_EX_UNITS_MEM`].
pub const DEFAULT_EX_UNITS_STEPS: u64 = 800_000_000;

/// Upper bound on fee fixed-point iterations. Three rounds settle the fee in
/// practice; the bound keeps a pathological size jump from looping.
pub const MAX_FEE_ITERATIONS: usize = 4;

/// Lovelace per ADA.
pub const LOVELACE_PER_ADA: u64 = 1_000_000;

/// Display decimals of the native currency.
pub const NATIVE_DECIMALS: u8 = 6;

/// Asset unit that denotes the native currency inside an asset bundle.
pub const NATIVE_UNIT: &str = "lovelace";

// ---------------------------------------------------------------------------
// Deployment Configuration
// ---------------------------------------------------------------------------

/// Which ledger the client talks to. Only affects address headers and HRPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Network id nibble carried in the address header byte.
    pub fn id(self) -> u8 {
        match self {
            Network::Mainnet => 1,
            Network::Testnet => 0,
        }
    }

    /// Bech32 human-readable prefix for payment addresses.
    pub fn address_hrp(self) -> &'static str {
        match self {
            Network::Mainnet => "addr",
            Network::Testnet => "addr_test",
        }
    }

    /// Parse a network name. Accepts "mainnet", "testnet", "preprod" and
    /// "preview" (case-insensitive). Returns `None` for anything else, we
    /// don't guess with money.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mainnet" => Some(Network::Mainnet),
            "testnet" | "preprod" | "preview" => Some(Network::Testnet),
            _ => None,
        }
    }
}

/// Plutus language the governance validator is compiled for. Determines the
/// script hash prefix and the cost model the script-data hash commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlutusVersion {
    V2,
    V3,
}

impl PlutusVersion {
    /// Tag byte prepended to the script bytes before hashing.
    pub fn script_tag(self) -> u8 {
        match self {
            PlutusVersion::V2 => 0x02,
            PlutusVersion::V3 => 0x03,
        }
    }

    /// Key of this language in the witness set map.
    pub fn witness_key(self) -> u64 {
        match self {
            PlutusVersion::V2 => 6,
            PlutusVersion::V3 => 7,
        }
    }

    /// Language id used in the cost-model view of the script-data hash.
    pub fn language_id(self) -> u64 {
        match self {
            PlutusVersion::V2 => 1,
            PlutusVersion::V3 => 2,
        }
    }
}

/// Deployment values for one governance instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Target ledger.
    pub network: Network,

    /// Hex-encoded flat bytes of the governance validator.
    pub validator_script_hex: String,

    /// Language version of the validator.
    pub plutus_version: PlutusVersion,

    /// Policy id (56 hex chars) of the governance voting token. Balances
    /// only count assets under this policy.
    pub token_policy_id: String,

    /// Display decimals of the governance token.
    pub token_decimals: u8,

    /// Lovelace locked in the proposal output on creation.
    pub proposal_deposit: u64,

    /// Base URI of the off-chain proposal record; the proposal id is appended.
    pub proposal_uri_base: String,

    /// Wallet names the application is willing to talk to.
    pub wallet_allow_list: Vec<String>,

    /// Maximum number of status polls after a submission.
    pub poll_attempts: u32,

    /// Delay between status polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            validator_script_hex: String::new(),
            plutus_version: PlutusVersion::V3,
            token_policy_id: String::new(),
            token_decimals: 0,
            proposal_deposit: 2 * LOVELACE_PER_ADA,
            proposal_uri_base: "https://verity.example/governance/proposal".to_string(),
            wallet_allow_list: vec![
                "eternl".to_string(),
                "lace".to_string(),
                "nami".to_string(),
                "flint".to_string(),
                "typhon".to_string(),
                "local".to_string(),
            ],
            poll_attempts: POLL_MAX_ATTEMPTS,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl GovernanceConfig {
    /// Delay between status polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Full URI of a proposal's off-chain record.
    pub fn proposal_uri(&self, proposal_id: &str) -> String {
        format!("{}/{}", self.proposal_uri_base.trim_end_matches('/'), proposal_id)
    }

    /// Returns `true` if the wallet name is on the allow-list.
    pub fn wallet_allowed(&self, name: &str) -> bool {
        self.wallet_allow_list
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(name))
    }
}

/// Builds the persisted syncing marker key for a proposal.
pub fn sync_marker_key(proposal_id: &str) -> String {
    format!("{}{}", SYNC_MARKER_PREFIX, proposal_id)
}
