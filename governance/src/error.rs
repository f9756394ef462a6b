//! Error taxonomy for the governance engine.
//!
//! Every fallible operation in the crate returns a [`GovernanceError`]. The
//! variants fall into three groups:
//!
//! - **Pre-flight** (`Validation`, `MissingField`, `UnknownAction`,
//!   `InvalidInput`, `Encoding`): raised before any wallet or network call.
//!   Nothing has been mutated and the action can simply be corrected.
//! - **In-flight** (`WalletUnavailable`, `Wallet`, `InsufficientFunds`,
//!   `Submission`, `Backend`): a collaborator refused. Submission failures are
//!   never retried here, because a blind retry can try to spend the same UTXO
//!   twice.
//! - **Post-flight** (`BackendValidation`, `PollingTimeout`): the transaction
//!   is on its way or already on-chain, but the authoritative record did not
//!   confirm. These degrade to a visible pending state, not a rollback.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Errors that can occur anywhere in the proposal pipeline.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Bad input caught before touching the network.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A redeemer action was requested without one of its required fields.
    #[error("missing field `{field}` for action {action}")]
    MissingField {
        /// Action being built.
        action: String,
        /// Name of the absent payload field.
        field: String,
    },

    /// A redeemer action name outside the closed action set.
    #[error("unknown governance action: {0}")]
    UnknownAction(String),

    /// A UTXO handed to the transaction builder is not spendable as given.
    #[error("invalid input UTXO: {0}")]
    InvalidInput(String),

    /// The wallet could not be enabled (not installed, locked, refused).
    #[error("wallet {wallet} unavailable: {reason}")]
    WalletUnavailable {
        /// Wallet identifier.
        wallet: String,
        /// What the wallet (or its absence) told us.
        reason: String,
    },

    /// A capability call on an already-enabled wallet failed.
    #[error("wallet error: {0}")]
    Wallet(String),

    /// An internal serialization invariant was violated.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Bytes from the outside world did not decode into the expected shape.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The wallet cannot fund the transaction.
    #[error("insufficient funds: required {required} {unit}, available {available}")]
    InsufficientFunds {
        /// Asset unit that ran short.
        unit: String,
        /// Amount the transaction needs.
        required: u64,
        /// Amount the wallet holds.
        available: u64,
    },

    /// The network or the validator rejected the transaction.
    #[error("submission rejected: {message}")]
    Submission {
        /// Raw rejection text, forwarded verbatim.
        message: String,
        /// Validator trace code recognised in the message, if any.
        trace: Option<TraceCode>,
    },

    /// Authoritative state never changed within the polling budget.
    #[error("proposal {proposal_id} not confirmed after {attempts} polls")]
    PollingTimeout {
        /// Proposal being reconciled.
        proposal_id: String,
        /// Number of polls made.
        attempts: u32,
    },

    /// The transaction went through but the backend refused its record.
    /// Funds have moved; the proposal record is unconfirmed.
    #[error("backend rejected transaction {tx_hash}: {reason}")]
    BackendValidation {
        /// Hash of the submitted transaction.
        tx_hash: String,
        /// Backend's explanation.
        reason: String,
    },

    /// Transport or protocol failure talking to the backend or chain API.
    #[error("backend error: {0}")]
    Backend(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The persisted marker store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl GovernanceError {
    /// Returns `true` for errors raised before anything left the process.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::MissingField { .. }
                | Self::UnknownAction(_)
                | Self::InvalidInput(_)
                | Self::Encoding(_)
        )
    }

    /// Message suitable for showing to a user. Submission failures carrying a
    /// recognised trace code get that code's message; everything else gets
    /// the error's display text.
    pub fn user_message(&self) -> String {
        match self {
            Self::Submission { trace: Some(code), .. } => code.user_message().to_string(),
            Self::Submission { trace: None, .. } => GENERIC_SUBMISSION_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for GovernanceError {
    fn from(err: reqwest::Error) -> Self {
        GovernanceError::Backend(err.to_string())
    }
}

impl From<sled::Error> for GovernanceError {
    fn from(err: sled::Error) -> Self {
        GovernanceError::Storage(err.to_string())
    }
}

impl From<hex::FromHexError> for GovernanceError {
    fn from(err: hex::FromHexError) -> Self {
        GovernanceError::Decoding(format!("invalid hex: {}", err))
    }
}

// ---------------------------------------------------------------------------
// Validator Trace Codes
// ---------------------------------------------------------------------------

const GENERIC_SUBMISSION_MESSAGE: &str =
    "The transaction was rejected by the network. Please try again in a moment.";

/// Failure reasons the governance validator (or the ledger) reports in its
/// trace output that we know how to explain to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceCode {
    NotSignedByOwner,
    VoterNotAuthorized,
    VotingClosed,
    VotingNotStarted,
    InsufficientVotingTokens,
    InvalidStatusTransition,
    ValueNotPreserved,
    DatumMismatch,
    AlreadyVoted,
    /// Ledger-level: the input UTXO was already spent. Stale local state.
    BadInputs,
}

impl TraceCode {
    const ALL: [TraceCode; 10] = [
        TraceCode::NotSignedByOwner,
        TraceCode::VoterNotAuthorized,
        TraceCode::VotingClosed,
        TraceCode::VotingNotStarted,
        TraceCode::InsufficientVotingTokens,
        TraceCode::InvalidStatusTransition,
        TraceCode::ValueNotPreserved,
        TraceCode::DatumMismatch,
        TraceCode::AlreadyVoted,
        TraceCode::BadInputs,
    ];

    /// The literal marker that appears in rejection text.
    pub fn marker(self) -> &'static str {
        match self {
            Self::NotSignedByOwner => "NOT_SIGNED_BY_OWNER",
            Self::VoterNotAuthorized => "VOTER_NOT_AUTHORIZED",
            Self::VotingClosed => "VOTING_CLOSED",
            Self::VotingNotStarted => "VOTING_NOT_STARTED",
            Self::InsufficientVotingTokens => "INSUFFICIENT_VOTING_TOKENS",
            Self::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            Self::ValueNotPreserved => "VALUE_NOT_PRESERVED",
            Self::DatumMismatch => "DATUM_MISMATCH",
            Self::AlreadyVoted => "ALREADY_VOTED",
            Self::BadInputs => "BadInputsUTxO",
        }
    }

    /// Finds the first known trace code inside a raw rejection message.
    pub fn recognize(message: &str) -> Option<TraceCode> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| message.contains(code.marker()))
    }

    /// Fixed user-facing explanation.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::NotSignedByOwner => "Only the proposal owner can change its governance parameters.",
            Self::VoterNotAuthorized => "Your wallet is not on this proposal's list of authorized voters.",
            Self::VotingClosed => "The voting period for this proposal has ended.",
            Self::VotingNotStarted => "Voting on this proposal has not started yet.",
            Self::InsufficientVotingTokens => "Your wallet does not hold enough governance tokens to vote.",
            Self::InvalidStatusTransition => "The proposal is not in a state that allows this action.",
            Self::ValueNotPreserved => "The transaction must keep the proposal's locked value unchanged.",
            Self::DatumMismatch => "The proposal data on-chain does not match the submitted update.",
            Self::AlreadyVoted => "This wallet has already voted on the proposal.",
            Self::BadInputs => "The proposal changed on-chain in the meantime. Refresh and try again.",
        }
    }
}

impl fmt::Display for TraceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_trace_inside_script_failure() {
        let raw = "ScriptFailures: [ValidationFailure \"trace: VOTER_NOT_AUTHORIZED\"]";
        assert_eq!(TraceCode::recognize(raw), Some(TraceCode::VoterNotAuthorized));
    }

    #[test]
    fn recognizes_ledger_bad_inputs() {
        let raw = "ConwayUtxowFailure (UtxoFailure (BadInputsUTxO (fromList [...])))";
        assert_eq!(TraceCode::recognize(raw), Some(TraceCode::BadInputs));
    }

    #[test]
    fn unknown_failure_gets_generic_message() {
        let err = GovernanceError::Submission {
            message: "something exploded".into(),
            trace: TraceCode::recognize("something exploded"),
        };
        assert_eq!(err.user_message(), GENERIC_SUBMISSION_MESSAGE);
    }

    #[test]
    fn known_failure_gets_specific_message() {
        let err = GovernanceError::Submission {
            message: "trace: ALREADY_VOTED".into(),
            trace: Some(TraceCode::AlreadyVoted),
        };
        assert!(err.user_message().contains("already voted"));
    }

    #[test]
    fn preflight_classification() {
        assert!(GovernanceError::Validation("x".into()).is_preflight());
        assert!(GovernanceError::UnknownAction("Bogus".into()).is_preflight());
        assert!(!GovernanceError::Backend("down".into()).is_preflight());
    }
}
