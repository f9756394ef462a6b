//! # CLI Interface
//!
//! Argument structure for `verity-gov`. Deployment settings are top-level
//! flags, each with a `VERITY_*` environment fallback so a shell profile can
//! pin a deployment once.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::logging::LogFormat;
use verity_governance::config::{Network, PlutusVersion, LOVELACE_PER_ADA, POLL_INTERVAL, POLL_MAX_ATTEMPTS};

/// Verity governance client.
///
/// Creates proposals and drives their lifecycle from a local payment key,
/// then waits for the governance backend to confirm each step.
#[derive(Parser, Debug)]
#[command(
    name = "verity-gov",
    about = "Verity proposal governance client",
    version,
    propagate_version = true
)]
pub struct VerityCli {
    #[command(flatten)]
    pub deployment: DeploymentArgs,

    #[arg(long, value_enum, env = "VERITY_LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a fresh payment key and print its key hash and address.
    Keygen,
    /// List the available wallets with their balances.
    Wallets,
    /// Create a proposal.
    Create(CreateArgs),
    /// Apply a lifecycle action to a proposal.
    Act(ActArgs),
    /// Print the backend's record of a proposal.
    Status(StatusArgs),
    /// Resume polling for proposals left pending by an earlier run.
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NetworkArg {
    Mainnet,
    Preprod,
    Preview,
}

impl From<NetworkArg> for Network {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Mainnet => Network::Mainnet,
            NetworkArg::Preprod | NetworkArg::Preview => Network::Testnet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlutusArg {
    V2,
    V3,
}

impl From<PlutusArg> for PlutusVersion {
    fn from(arg: PlutusArg) -> Self {
        match arg {
            PlutusArg::V2 => PlutusVersion::V2,
            PlutusArg::V3 => PlutusVersion::V3,
        }
    }
}

/// Where the deployment lives and how to talk to it.
#[derive(Args, Debug)]
pub struct DeploymentArgs {
    /// Base URL of the governance backend.
    #[arg(long, env = "VERITY_BACKEND_URL", default_value = "http://127.0.0.1:8080", global = true)]
    pub backend_url: String,

    /// Base URL of the Blockfrost-compatible chain API.
    #[arg(
        long,
        env = "VERITY_CHAIN_URL",
        default_value = "https://cardano-preprod.blockfrost.io/api/v0",
        global = true
    )]
    pub chain_url: String,

    /// Chain API project id, sent as the `project_id` header.
    #[arg(long, env = "VERITY_PROJECT_ID", global = true)]
    pub project_id: Option<String>,

    #[arg(long, value_enum, env = "VERITY_NETWORK", default_value = "preprod", global = true)]
    pub network: NetworkArg,

    /// Hex-encoded governance validator.
    #[arg(long, env = "VERITY_VALIDATOR_SCRIPT", default_value = "", global = true)]
    pub validator_script: String,

    #[arg(long, value_enum, env = "VERITY_PLUTUS_VERSION", default_value = "v3", global = true)]
    pub plutus_version: PlutusArg,

    /// Policy id of the governance voting token.
    #[arg(long, env = "VERITY_TOKEN_POLICY", default_value = "", global = true)]
    pub token_policy: String,

    #[arg(long, env = "VERITY_TOKEN_DECIMALS", default_value_t = 0, global = true)]
    pub token_decimals: u8,

    /// Lovelace locked with a new proposal.
    #[arg(long, env = "VERITY_PROPOSAL_DEPOSIT", default_value_t = 2 * LOVELACE_PER_ADA, global = true)]
    pub deposit: u64,

    /// Base URI of the off-chain proposal record.
    #[arg(
        long,
        env = "VERITY_PROPOSAL_URI_BASE",
        default_value = "https://verity.example/governance/proposal",
        global = true
    )]
    pub uri_base: String,

    /// Hex-encoded Ed25519 payment key.
    ///
    /// **Prefer the environment variable** over the flag; flags end up in
    /// shell history.
    #[arg(long, env = "VERITY_SIGNING_KEY", hide_env_values = true, global = true)]
    pub signing_key: Option<String>,

    /// Directory for durable syncing markers.
    #[arg(long, env = "VERITY_DATA_DIR", default_value = ".verity", global = true)]
    pub data_dir: PathBuf,

    #[arg(long, env = "VERITY_POLL_ATTEMPTS", default_value_t = POLL_MAX_ATTEMPTS, global = true)]
    pub poll_attempts: u32,

    #[arg(long, env = "VERITY_POLL_INTERVAL_MS", default_value_t = POLL_INTERVAL.as_millis() as u64, global = true)]
    pub poll_interval_ms: u64,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Proposal id. A UUID is generated when omitted.
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long)]
    pub title: String,

    #[arg(long, default_value = "")]
    pub description: String,

    #[arg(long, default_value = "")]
    pub discussion_url: String,

    /// Owner key hash. Defaults to the signing key's.
    #[arg(long)]
    pub owner: Option<String>,

    /// Voting window start, Unix epoch milliseconds.
    #[arg(long)]
    pub voting_start: i64,

    /// Voting window end, Unix epoch milliseconds.
    #[arg(long)]
    pub voting_end: i64,

    #[arg(long, default_value_t = 0)]
    pub min_voting_tokens: u64,

    /// Authorized voter as `pkh=weight`. Repeatable.
    #[arg(long = "voter")]
    pub voters: Vec<String>,

    /// Return after submission instead of waiting for confirmation.
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Debug)]
pub struct ActArgs {
    pub id: String,

    /// One of Vote, UpdateAuthorizedPKHs, UpdateMinVotingTokens,
    /// SetVotingPeriod, Finalize, Execute.
    pub action: String,

    /// JSON payload for the action, e.g. `{"min_voting_tokens": 500}`.
    #[arg(long, default_value = "{}")]
    pub payload: String,

    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    pub id: String,
}
