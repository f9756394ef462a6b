//! Proposal records and their lifecycle rules.
//!
//! A [`Proposal`] is the application's view of one governance proposal: the
//! on-chain governance parameters plus the off-chain presentation fields the
//! backend stores next to them. The status only ever moves forward:
//!
//! ```text
//! Draft ──► Proposed ──► Voting ──┬──► Approved ──► Executed
//!                                 └──► Rejected
//! ```
//!
//! `Proposed → Proposed` (parameter updates) and `Voting → Voting` (votes)
//! are the only self-transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{GovernanceError, Result};
use crate::plutus::redeemer::GovAction;

// ---------------------------------------------------------------------------
// ProposalStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// Created locally, not yet confirmed on-chain.
    Draft,
    /// Live on-chain; the owner may still tune its parameters.
    Proposed,
    /// Voting window set; authorized voters may vote.
    Voting,
    Approved,
    Rejected,
    /// Approved and carried out. Terminal.
    Executed,
}

impl ProposalStatus {
    const ORDER: [ProposalStatus; 6] = [
        ProposalStatus::Draft,
        ProposalStatus::Proposed,
        ProposalStatus::Voting,
        ProposalStatus::Approved,
        ProposalStatus::Rejected,
        ProposalStatus::Executed,
    ];

    /// Constructor index of this status in the datum.
    pub fn on_chain_index(self) -> u64 {
        match self {
            Self::Draft => 0,
            Self::Proposed => 1,
            Self::Voting => 2,
            Self::Approved => 3,
            Self::Rejected => 4,
            Self::Executed => 5,
        }
    }

    /// Inverse of [`on_chain_index`](Self::on_chain_index).
    pub fn from_on_chain_index(index: u64) -> Option<Self> {
        Self::ORDER.iter().copied().find(|s| s.on_chain_index() == index)
    }

    /// Whether the status may move from `self` to `next`.
    pub fn can_advance_to(self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Draft, Proposed)
                | (Proposed, Proposed)
                | (Proposed, Voting)
                | (Voting, Voting)
                | (Voting, Approved)
                | (Voting, Rejected)
                | (Approved, Executed)
        )
    }

    /// `true` once nothing can change any more.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Executed)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "Draft",
            Self::Proposed => "Proposed",
            Self::Voting => "Voting",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Executed => "Executed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Key hashes
// ---------------------------------------------------------------------------

/// Canonical form of a key hash: trimmed, lowercase hex.
pub fn normalize_pkh(pkh: &str) -> String {
    pkh.trim().to_ascii_lowercase()
}

/// Rekeys a pkh map by [`normalize_pkh`]. Keys that collide after
/// normalization keep the last weight.
pub fn normalize_pkh_keys(map: BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    map.into_iter().map(|(pkh, n)| (normalize_pkh(&pkh), n)).collect()
}

fn de_pkh<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    String::deserialize(de).map(|pkh| normalize_pkh(&pkh))
}

fn de_pkh_keys<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<BTreeMap<String, u64>, D::Error> {
    BTreeMap::<String, u64>::deserialize(de).map(normalize_pkh_keys)
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// One governance proposal, as the backend reports it.
///
/// PKHs are lowercase hex; deserializing normalizes them. Voting bounds
/// are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    #[serde(deserialize_with = "de_pkh")]
    pub owner_pkh: String,
    #[serde(deserialize_with = "de_pkh")]
    pub proposer_pkh: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub discussion_url: String,
    pub status: ProposalStatus,
    pub min_voting_tokens: u64,
    /// Voter PKH to voting weight.
    #[serde(default, deserialize_with = "de_pkh_keys")]
    pub authorized_pkhs: BTreeMap<String, u64>,
    /// Voter PKH to tokens committed.
    #[serde(default, deserialize_with = "de_pkh_keys")]
    pub vote_tally: BTreeMap<String, u64>,
    pub voting_start: i64,
    pub voting_end: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub owner_address: Option<String>,
}

/// Field overrides for a copy-on-write update of a proposal.
///
/// Every `None` means "keep what the proposal already has". `vote` is not
/// an override but an addition: one new tally entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalOverrides {
    pub status: Option<ProposalStatus>,
    pub min_voting_tokens: Option<u64>,
    pub authorized_pkhs: Option<BTreeMap<String, u64>>,
    pub voting_start: Option<i64>,
    pub voting_end: Option<i64>,
    pub vote: Option<(String, u64)>,
}

impl Proposal {
    /// Sum of all committed vote amounts.
    pub fn tallied_amount(&self) -> u64 {
        self.vote_tally.values().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Checks that `signer_pkh` may perform `action` on this proposal at
    /// `now_ms`, and returns the status the proposal moves to.
    ///
    /// This mirrors the validator's rules so obviously doomed transactions
    /// are refused before the wallet ever prompts.
    pub fn authorize(&self, action: &GovAction, signer_pkh: &str, now_ms: i64) -> Result<ProposalStatus> {
        let deny = |reason: String| Err(GovernanceError::Validation(reason));
        let is_owner = self.owner_pkh.eq_ignore_ascii_case(signer_pkh);

        let next = match action {
            GovAction::UpdateAuthorizedPkhs { .. } | GovAction::UpdateMinVotingTokens { .. } => {
                if !is_owner {
                    return deny("only the owner can change governance parameters".into());
                }
                if self.status != ProposalStatus::Proposed {
                    return deny(format!("parameters are frozen once the proposal is {}", self.status));
                }
                ProposalStatus::Proposed
            }
            GovAction::SetVotingPeriod { start, end } => {
                if !is_owner {
                    return deny("only the owner can open voting".into());
                }
                if self.status != ProposalStatus::Proposed {
                    return deny(format!("cannot open voting on a {} proposal", self.status));
                }
                if end <= start {
                    return deny("voting end must be after voting start".into());
                }
                ProposalStatus::Voting
            }
            GovAction::Vote { voter_pkh, amount } => {
                if self.status != ProposalStatus::Voting {
                    return deny(format!("cannot vote on a {} proposal", self.status));
                }
                if !voter_pkh.eq_ignore_ascii_case(signer_pkh) {
                    return deny("votes must be signed by the voter".into());
                }
                let voter = normalize_pkh(voter_pkh);
                if !self.authorized_pkhs.contains_key(&voter) {
                    return deny(format!("{} is not an authorized voter", voter_pkh));
                }
                if self.vote_tally.contains_key(&voter) {
                    return deny(format!("{} has already voted", voter_pkh));
                }
                if *amount == 0 {
                    return deny("vote amount must be positive".into());
                }
                if now_ms < self.voting_start {
                    return deny("voting has not started".into());
                }
                if now_ms > self.voting_end {
                    return deny("voting has closed".into());
                }
                ProposalStatus::Voting
            }
            GovAction::Finalize => {
                if self.status != ProposalStatus::Voting {
                    return deny(format!("cannot finalize a {} proposal", self.status));
                }
                if now_ms <= self.voting_end {
                    return deny("voting is still open".into());
                }
                if self.tallied_amount() >= self.min_voting_tokens {
                    ProposalStatus::Approved
                } else {
                    ProposalStatus::Rejected
                }
            }
            GovAction::Execute => {
                if self.status != ProposalStatus::Approved {
                    return deny(format!("cannot execute a {} proposal", self.status));
                }
                ProposalStatus::Executed
            }
        };

        debug_assert!(self.status.can_advance_to(next));
        Ok(next)
    }

    /// Overrides that carry out `action`, given the status it leads to.
    pub fn overrides_for(action: &GovAction, next: ProposalStatus) -> ProposalOverrides {
        let mut overrides = ProposalOverrides {
            status: Some(next),
            ..ProposalOverrides::default()
        };
        match action {
            GovAction::UpdateAuthorizedPkhs { pkhs } => overrides.authorized_pkhs = Some(pkhs.clone()),
            GovAction::UpdateMinVotingTokens { amount } => overrides.min_voting_tokens = Some(*amount),
            GovAction::SetVotingPeriod { start, end } => {
                overrides.voting_start = Some(*start);
                overrides.voting_end = Some(*end);
            }
            GovAction::Vote { voter_pkh, amount } => overrides.vote = Some((voter_pkh.clone(), *amount)),
            GovAction::Finalize | GovAction::Execute => {}
        }
        overrides
    }

    /// Copy of this proposal with the overrides applied. Used for the
    /// optimistic local view; the datum codec applies the same rules.
    pub fn with_overrides(&self, overrides: &ProposalOverrides) -> Proposal {
        let mut next = self.clone();
        if let Some(status) = overrides.status {
            next.status = status;
        }
        if let Some(min) = overrides.min_voting_tokens {
            next.min_voting_tokens = min;
        }
        if let Some(pkhs) = &overrides.authorized_pkhs {
            next.authorized_pkhs = pkhs.clone();
        }
        if let Some(start) = overrides.voting_start {
            next.voting_start = start;
        }
        if let Some(end) = overrides.voting_end {
            next.voting_end = end;
        }
        if let Some((voter, amount)) = &overrides.vote {
            next.vote_tally.insert(voter.clone(), *amount);
        }
        next.updated_at = Utc::now();
        next
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const OWNER: &str = "aa000000000000000000000000000000000000000000000000000000";
    pub(crate) const VOTER: &str = "bb000000000000000000000000000000000000000000000000000000";

    pub(crate) fn sample_proposal(status: ProposalStatus) -> Proposal {
        let now = Utc::now();
        Proposal {
            id: "prop-1".into(),
            owner_pkh: OWNER.into(),
            proposer_pkh: OWNER.into(),
            title: "Raise the verification bounty".into(),
            description: "Double the bounty for verified submissions.".into(),
            discussion_url: "https://forum.verity.example/t/42".into(),
            status,
            min_voting_tokens: 100,
            authorized_pkhs: BTreeMap::from([(VOTER.to_string(), 1)]),
            vote_tally: BTreeMap::new(),
            voting_start: 1_000,
            voting_end: 2_000,
            created_at: now,
            updated_at: now,
            transaction_hash: None,
            owner_address: None,
        }
    }

    #[test]
    fn transitions_only_move_forward() {
        use ProposalStatus::*;
        assert!(Draft.can_advance_to(Proposed));
        assert!(Voting.can_advance_to(Rejected));
        assert!(!Voting.can_advance_to(Proposed));
        assert!(!Executed.can_advance_to(Voting));
        assert!(!Rejected.can_advance_to(Executed));
    }

    #[test]
    fn on_chain_index_roundtrip() {
        for status in ProposalStatus::ORDER {
            assert_eq!(ProposalStatus::from_on_chain_index(status.on_chain_index()), Some(status));
        }
        assert_eq!(ProposalStatus::from_on_chain_index(9), None);
    }

    #[test]
    fn only_owner_updates_params_while_proposed() {
        let p = sample_proposal(ProposalStatus::Proposed);
        let action = GovAction::UpdateMinVotingTokens { amount: 5 };
        assert_eq!(p.authorize(&action, OWNER, 0).unwrap(), ProposalStatus::Proposed);
        assert!(p.authorize(&action, VOTER, 0).is_err());

        let voting = sample_proposal(ProposalStatus::Voting);
        assert!(voting.authorize(&action, OWNER, 0).is_err());
    }

    #[test]
    fn vote_rules() {
        let p = sample_proposal(ProposalStatus::Voting);
        let vote = GovAction::Vote { voter_pkh: VOTER.into(), amount: 10 };
        assert_eq!(p.authorize(&vote, VOTER, 1_500).unwrap(), ProposalStatus::Voting);
        assert!(p.authorize(&vote, VOTER, 500).is_err(), "before window");
        assert!(p.authorize(&vote, VOTER, 2_500).is_err(), "after window");
        assert!(p.authorize(&vote, OWNER, 1_500).is_err(), "signed by someone else");

        let stranger = GovAction::Vote { voter_pkh: OWNER.into(), amount: 10 };
        assert!(p.authorize(&stranger, OWNER, 1_500).is_err(), "not authorized");

        let mut voted = p.clone();
        voted.vote_tally.insert(VOTER.into(), 10);
        assert!(voted.authorize(&vote, VOTER, 1_500).is_err(), "double vote");
    }

    #[test]
    fn vote_lookups_ignore_pkh_case() {
        let mut p = sample_proposal(ProposalStatus::Voting);
        let shouting = GovAction::Vote { voter_pkh: VOTER.to_uppercase(), amount: 10 };
        assert_eq!(p.authorize(&shouting, VOTER, 1_500).unwrap(), ProposalStatus::Voting);

        p.vote_tally.insert(VOTER.into(), 10);
        assert!(p.authorize(&shouting, VOTER, 1_500).is_err(), "double vote in other case");
    }

    #[test]
    fn decoded_pkhs_are_lowercased() {
        let mut json = serde_json::to_value(sample_proposal(ProposalStatus::Voting)).unwrap();
        json["owner_pkh"] = serde_json::json!(OWNER.to_uppercase());
        json["authorized_pkhs"] = serde_json::json!({ VOTER.to_uppercase(): 1 });
        json["vote_tally"] = serde_json::json!({ VOTER.to_uppercase(): 4 });

        let p: Proposal = serde_json::from_value(json).unwrap();
        assert_eq!(p.owner_pkh, OWNER);
        assert_eq!(p.authorized_pkhs.get(VOTER), Some(&1));
        assert_eq!(p.vote_tally.get(VOTER), Some(&4));
    }

    #[test]
    fn finalize_outcome_follows_tally() {
        let mut p = sample_proposal(ProposalStatus::Voting);
        assert!(p.authorize(&GovAction::Finalize, OWNER, 1_500).is_err());
        assert_eq!(p.authorize(&GovAction::Finalize, OWNER, 3_000).unwrap(), ProposalStatus::Rejected);
        p.vote_tally.insert(VOTER.into(), 150);
        assert_eq!(p.authorize(&GovAction::Finalize, OWNER, 3_000).unwrap(), ProposalStatus::Approved);
    }

    #[test]
    fn overrides_preserve_untouched_fields() {
        let p = sample_proposal(ProposalStatus::Proposed);
        let overrides = Proposal::overrides_for(
            &GovAction::UpdateMinVotingTokens { amount: 7 },
            ProposalStatus::Proposed,
        );
        let next = p.with_overrides(&overrides);
        assert_eq!(next.min_voting_tokens, 7);
        assert_eq!(next.authorized_pkhs, p.authorized_pkhs);
        assert_eq!(next.voting_end, p.voting_end);
        assert_eq!(next.title, p.title);
    }

    #[test]
    fn proposal_json_roundtrip() {
        let p = sample_proposal(ProposalStatus::Voting);
        let json = serde_json::to_string(&p).unwrap();
        let back: Proposal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
