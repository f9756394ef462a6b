//! # Governance Datum Codec
//!
//! The proposal output carries its whole contract state inline. The validator
//! reads it as nested constructors, and it is unforgiving: one field out of
//! place and every spend of the output fails its script check.
//!
//! ```text
//! GovDatum        = Constr 0 [ GovParams, Maybe OnChainProposal, Status ]
//! GovParams       = Constr 0 [ owner_pkh: Bytes, min_voting_tokens: Int,
//!                              authorized_pkhs: Map Bytes Int ]
//! OnChainProposal = Constr 0 [ proposal_id: Bytes (utf-8), proposer_pkh: Bytes,
//!                              voting_start: Int, voting_end: Int,
//!                              vote_tally: Map Bytes Int, outcome: Int ]
//! Maybe a         = Constr 0 [ a ] | Constr 1 [ ]
//! Status          = Constr i [ ]       (i = ProposalStatus::on_chain_index)
//! ```
//!
//! Next to the datum, every governance transaction carries a small metadata
//! record pointing at the off-chain proposal document.

use ciborium::value::Value;
use std::collections::BTreeMap;

use super::data::PlutusData;
use super::{pkh_bytes, pkh_map, pkh_map_from};
use crate::config::{
    MAX_CHUNK_BYTES, OUTCOME_APPROVED, OUTCOME_ONGOING, OUTCOME_REJECTED, PROPOSAL_METADATA_VERSION,
};
use crate::error::{GovernanceError, Result};
use crate::proposal::{Proposal, ProposalOverrides, ProposalStatus};

const CONSTR_JUST: u64 = 0;
const CONSTR_NOTHING: u64 = 1;

// ---------------------------------------------------------------------------
// Typed datum
// ---------------------------------------------------------------------------

/// Who may steer the proposal and how many votes it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovParams {
    pub owner_pkh: String,
    pub min_voting_tokens: u64,
    pub authorized_pkhs: BTreeMap<String, u64>,
}

/// Vote outcome as the validator stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Rejected,
    Approved,
    Ongoing,
}

impl Outcome {
    /// Outcome implied by a status: only the two decided statuses are final.
    pub fn for_status(status: ProposalStatus) -> Self {
        match status {
            ProposalStatus::Approved => Outcome::Approved,
            ProposalStatus::Rejected => Outcome::Rejected,
            _ => Outcome::Ongoing,
        }
    }

    pub fn to_int(self) -> i128 {
        match self {
            Outcome::Rejected => OUTCOME_REJECTED,
            Outcome::Approved => OUTCOME_APPROVED,
            Outcome::Ongoing => OUTCOME_ONGOING,
        }
    }

    pub fn from_int(n: i128) -> Result<Self> {
        match n {
            OUTCOME_REJECTED => Ok(Outcome::Rejected),
            OUTCOME_APPROVED => Ok(Outcome::Approved),
            OUTCOME_ONGOING => Ok(Outcome::Ongoing),
            other => Err(GovernanceError::Decoding(format!("unknown outcome {}", other))),
        }
    }
}

/// The proposal half of the datum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainProposal {
    pub proposal_id: String,
    pub proposer_pkh: String,
    pub voting_start: i64,
    pub voting_end: i64,
    pub vote_tally: BTreeMap<String, u64>,
    pub outcome: Outcome,
}

/// Complete inline datum of a proposal output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovDatum {
    pub params: GovParams,
    pub proposal: Option<OnChainProposal>,
    pub status: ProposalStatus,
}

impl GovDatum {
    pub fn to_plutus(&self) -> Result<PlutusData> {
        let params = PlutusData::Constr(
            0,
            vec![
                PlutusData::Bytes(pkh_bytes("owner_pkh", &self.params.owner_pkh)?),
                PlutusData::Int(i128::from(self.params.min_voting_tokens)),
                pkh_map("authorized_pkhs", &self.params.authorized_pkhs)?,
            ],
        );

        let proposal = match &self.proposal {
            Some(p) => PlutusData::Constr(
                CONSTR_JUST,
                vec![PlutusData::Constr(
                    0,
                    vec![
                        PlutusData::Bytes(p.proposal_id.as_bytes().to_vec()),
                        PlutusData::Bytes(pkh_bytes("proposer_pkh", &p.proposer_pkh)?),
                        PlutusData::Int(i128::from(p.voting_start)),
                        PlutusData::Int(i128::from(p.voting_end)),
                        pkh_map("vote_tally", &p.vote_tally)?,
                        PlutusData::Int(p.outcome.to_int()),
                    ],
                )],
            ),
            None => PlutusData::unit(CONSTR_NOTHING),
        };

        Ok(PlutusData::Constr(
            0,
            vec![params, proposal, PlutusData::unit(self.status.on_chain_index())],
        ))
    }

    pub fn from_plutus(data: &PlutusData) -> Result<Self> {
        let top = data.expect_constr(0, 3, "datum")?;

        let params = top[0].expect_constr(0, 3, "gov_params")?;
        let params = GovParams {
            owner_pkh: hex::encode(params[0].as_bytes("owner_pkh")?),
            min_voting_tokens: params[1].as_u64("min_voting_tokens")?,
            authorized_pkhs: pkh_map_from(&params[2], "authorized_pkhs")?,
        };

        let proposal = match &top[1] {
            PlutusData::Constr(CONSTR_NOTHING, fields) if fields.is_empty() => None,
            maybe => {
                let inner = maybe.expect_constr(CONSTR_JUST, 1, "proposal")?;
                let fields = inner[0].expect_constr(0, 6, "proposal")?;
                let id = String::from_utf8(fields[0].as_bytes("proposal_id")?.to_vec())
                    .map_err(|_| GovernanceError::Decoding("proposal_id is not utf-8".into()))?;
                Some(OnChainProposal {
                    proposal_id: id,
                    proposer_pkh: hex::encode(fields[1].as_bytes("proposer_pkh")?),
                    voting_start: fields[2].as_i64("voting_start")?,
                    voting_end: fields[3].as_i64("voting_end")?,
                    vote_tally: pkh_map_from(&fields[4], "vote_tally")?,
                    outcome: Outcome::from_int(fields[5].as_int("outcome")?)?,
                })
            }
        };

        let status = match &top[2] {
            PlutusData::Constr(index, fields) if fields.is_empty() => ProposalStatus::from_on_chain_index(*index)
                .ok_or_else(|| GovernanceError::Decoding(format!("unknown status index {}", index)))?,
            _ => return Err(GovernanceError::Decoding("status: expected nullary constructor".into())),
        };

        Ok(Self { params, proposal, status })
    }

    pub fn to_hex(&self) -> Result<String> {
        self.to_plutus()?.to_hex()
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::from_plutus(&PlutusData::from_hex(hex_str)?)
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Side record attached to every governance transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalMetadata {
    pub proposal_id: String,
    pub proposer_pkh: String,
    pub proposal_uri: String,
    pub version: u32,
}

impl ProposalMetadata {
    /// Metadatum map. Strings over the 64-byte ledger limit become arrays of
    /// chunks, split on character boundaries.
    pub fn to_metadatum(&self) -> Value {
        Value::Map(vec![
            (Value::Text("proposal_id".into()), chunked_text(&self.proposal_id)),
            (Value::Text("proposer_pkh".into()), chunked_text(&self.proposer_pkh)),
            (Value::Text("proposal_uri".into()), chunked_text(&self.proposal_uri)),
            (Value::Text("version".into()), Value::Integer(self.version.into())),
        ])
    }
}

fn chunked_text(s: &str) -> Value {
    if s.len() <= MAX_CHUNK_BYTES {
        return Value::Text(s.to_string());
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in s.chars() {
        if current.len() + ch.len_utf8() > MAX_CHUNK_BYTES {
            chunks.push(Value::Text(std::mem::take(&mut current)));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(Value::Text(current));
    }
    Value::Array(chunks)
}

// ---------------------------------------------------------------------------
// DatumCodec
// ---------------------------------------------------------------------------

/// Inputs for the datum of a brand-new proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDatumRequest {
    pub proposal_id: String,
    pub proposer_pkh: String,
    pub owner_pkh: String,
    pub voting_start: i64,
    pub voting_end: i64,
    pub min_voting_tokens: u64,
    pub authorized_pkhs: BTreeMap<String, u64>,
}

/// Builds governance datums and their metadata records.
#[derive(Debug, Clone)]
pub struct DatumCodec {
    uri_base: String,
}

impl DatumCodec {
    pub fn new(uri_base: impl Into<String>) -> Self {
        Self { uri_base: uri_base.into() }
    }

    fn metadata(&self, proposal_id: &str, proposer_pkh: &str) -> ProposalMetadata {
        ProposalMetadata {
            proposal_id: proposal_id.to_string(),
            proposer_pkh: proposer_pkh.to_string(),
            proposal_uri: format!("{}/{}", self.uri_base.trim_end_matches('/'), proposal_id),
            version: PROPOSAL_METADATA_VERSION,
        }
    }

    /// Datum for a new proposal: status Proposed, empty tally, outcome
    /// Ongoing.
    pub fn encode_create(&self, req: &CreateDatumRequest) -> Result<(GovDatum, ProposalMetadata)> {
        if req.proposal_id.is_empty() {
            return Err(GovernanceError::Validation("proposal id must not be empty".into()));
        }
        if req.proposal_id.len() > MAX_CHUNK_BYTES {
            return Err(GovernanceError::Validation(format!(
                "proposal id longer than {} bytes",
                MAX_CHUNK_BYTES
            )));
        }
        if req.voting_end <= req.voting_start {
            return Err(GovernanceError::Validation(
                "voting end must be after voting start".into(),
            ));
        }

        let datum = GovDatum {
            params: GovParams {
                owner_pkh: req.owner_pkh.clone(),
                min_voting_tokens: req.min_voting_tokens,
                authorized_pkhs: req.authorized_pkhs.clone(),
            },
            proposal: Some(OnChainProposal {
                proposal_id: req.proposal_id.clone(),
                proposer_pkh: req.proposer_pkh.clone(),
                voting_start: req.voting_start,
                voting_end: req.voting_end,
                vote_tally: BTreeMap::new(),
                outcome: Outcome::Ongoing,
            }),
            status: ProposalStatus::Proposed,
        };
        // Surface malformed key hashes now rather than inside the builder.
        datum.to_plutus()?;

        Ok((datum, self.metadata(&req.proposal_id, &req.proposer_pkh)))
    }

    /// Datum for the next state of `proposal`. Fields not named in
    /// `overrides` carry over verbatim.
    pub fn encode_update(
        &self,
        proposal: &Proposal,
        overrides: &ProposalOverrides,
    ) -> Result<(GovDatum, ProposalMetadata)> {
        let status = overrides.status.unwrap_or(proposal.status);

        let mut vote_tally = proposal.vote_tally.clone();
        if let Some((voter, amount)) = &overrides.vote {
            if vote_tally.contains_key(voter) {
                return Err(GovernanceError::Validation(format!("{} has already voted", voter)));
            }
            vote_tally.insert(voter.clone(), *amount);
        }

        let voting_start = overrides.voting_start.unwrap_or(proposal.voting_start);
        let voting_end = overrides.voting_end.unwrap_or(proposal.voting_end);

        let datum = GovDatum {
            params: GovParams {
                owner_pkh: proposal.owner_pkh.clone(),
                min_voting_tokens: overrides.min_voting_tokens.unwrap_or(proposal.min_voting_tokens),
                authorized_pkhs: overrides
                    .authorized_pkhs
                    .clone()
                    .unwrap_or_else(|| proposal.authorized_pkhs.clone()),
            },
            proposal: Some(OnChainProposal {
                proposal_id: proposal.id.clone(),
                proposer_pkh: proposal.proposer_pkh.clone(),
                voting_start,
                voting_end,
                vote_tally,
                outcome: Outcome::for_status(status),
            }),
            status,
        };
        datum.to_plutus()?;

        Ok((datum, self.metadata(&proposal.id, &proposal.proposer_pkh)))
    }

    /// Decodes an inline datum from hex CBOR.
    pub fn decode(&self, hex_str: &str) -> Result<GovDatum> {
        GovDatum::from_hex(hex_str)
    }
}
