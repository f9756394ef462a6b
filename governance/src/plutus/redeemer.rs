//! Lifecycle actions and their redeemer encoding.
//!
//! The validator reads a redeemer as `Constr(discriminant, args)`. The set of
//! actions is closed, so it is a Rust enum: adding an action is a compile
//! error everywhere an action is matched, never a silent fall-through.
//!
//! The only stringly-typed entry point is [`GovAction::from_request`], the
//! boundary where action names and JSON payloads arrive from the outside.
//! It fails closed: an unknown name is [`GovernanceError::UnknownAction`], an
//! absent field is [`GovernanceError::MissingField`].

use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;

use super::data::PlutusData;
use super::{pkh_bytes, pkh_map};
use crate::config::{
    REDEEMER_EXECUTE, REDEEMER_FINALIZE, REDEEMER_SET_VOTING_PERIOD, REDEEMER_UPDATE_AUTHORIZED_PKHS,
    REDEEMER_UPDATE_MIN_VOTING_TOKENS, REDEEMER_VOTE,
};
use crate::error::{GovernanceError, Result};
use crate::proposal::normalize_pkh;

/// A governance lifecycle action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovAction {
    /// Commit `amount` voting tokens from `voter_pkh`.
    Vote { voter_pkh: String, amount: u64 },
    /// Replace the authorized voter set (pkh to weight).
    UpdateAuthorizedPkhs { pkhs: BTreeMap<String, u64> },
    /// Replace the approval threshold.
    UpdateMinVotingTokens { amount: u64 },
    /// Open voting over `[start, end]` (epoch ms).
    SetVotingPeriod { start: i64, end: i64 },
    /// Close voting and record the outcome.
    Finalize,
    /// Mark an approved proposal as carried out.
    Execute,
}

impl GovAction {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vote { .. } => "Vote",
            Self::UpdateAuthorizedPkhs { .. } => "UpdateAuthorizedPKHs",
            Self::UpdateMinVotingTokens { .. } => "UpdateMinVotingTokens",
            Self::SetVotingPeriod { .. } => "SetVotingPeriod",
            Self::Finalize => "Finalize",
            Self::Execute => "Execute",
        }
    }

    /// Validator-side constructor index.
    pub fn discriminant(&self) -> u64 {
        match self {
            Self::Vote { .. } => REDEEMER_VOTE,
            Self::UpdateAuthorizedPkhs { .. } => REDEEMER_UPDATE_AUTHORIZED_PKHS,
            Self::UpdateMinVotingTokens { .. } => REDEEMER_UPDATE_MIN_VOTING_TOKENS,
            Self::SetVotingPeriod { .. } => REDEEMER_SET_VOTING_PERIOD,
            Self::Finalize => REDEEMER_FINALIZE,
            Self::Execute => REDEEMER_EXECUTE,
        }
    }

    /// Parses an action name plus JSON payload.
    ///
    /// Payload fields: `voter_pkh` + `amount` (Vote), `authorized_pkhs`
    /// (UpdateAuthorizedPKHs, an object of pkh to weight),
    /// `min_voting_tokens` (UpdateMinVotingTokens), `voting_start` +
    /// `voting_end` (SetVotingPeriod). Finalize and Execute take none.
    pub fn from_request(action: &str, payload: &Json) -> Result<Self> {
        let fields = Payload { action, payload };
        match action {
            "Vote" => Ok(Self::Vote {
                voter_pkh: normalize_pkh(&fields.string("voter_pkh")?),
                amount: fields.u64("amount")?,
            }),
            "UpdateAuthorizedPKHs" => Ok(Self::UpdateAuthorizedPkhs {
                pkhs: fields.weights("authorized_pkhs")?,
            }),
            "UpdateMinVotingTokens" => Ok(Self::UpdateMinVotingTokens {
                amount: fields.u64("min_voting_tokens")?,
            }),
            "SetVotingPeriod" => Ok(Self::SetVotingPeriod {
                start: fields.i64("voting_start")?,
                end: fields.i64("voting_end")?,
            }),
            "Finalize" => Ok(Self::Finalize),
            "Execute" => Ok(Self::Execute),
            other => Err(GovernanceError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for GovAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed field access over a JSON payload, reporting errors against the
/// action being parsed.
struct Payload<'a> {
    action: &'a str,
    payload: &'a Json,
}

impl Payload<'_> {
    fn field(&self, name: &str) -> Result<&Json> {
        match self.payload.get(name) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(GovernanceError::MissingField {
                action: self.action.to_string(),
                field: name.to_string(),
            }),
        }
    }

    fn wrong_type(&self, name: &str, expected: &str) -> GovernanceError {
        GovernanceError::Validation(format!("{}: field `{}` must be {}", self.action, name, expected))
    }

    fn string(&self, name: &str) -> Result<String> {
        self.field(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.wrong_type(name, "a string"))
    }

    fn u64(&self, name: &str) -> Result<u64> {
        self.field(name)?
            .as_u64()
            .ok_or_else(|| self.wrong_type(name, "an unsigned integer"))
    }

    fn i64(&self, name: &str) -> Result<i64> {
        self.field(name)?
            .as_i64()
            .ok_or_else(|| self.wrong_type(name, "an integer"))
    }

    fn weights(&self, name: &str) -> Result<BTreeMap<String, u64>> {
        let object = self
            .field(name)?
            .as_object()
            .ok_or_else(|| self.wrong_type(name, "an object of pkh to weight"))?;
        object
            .iter()
            .map(|(pkh, weight)| {
                weight
                    .as_u64()
                    .map(|w| (normalize_pkh(pkh), w))
                    .ok_or_else(|| self.wrong_type(name, "an object of pkh to weight"))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Redeemer
// ---------------------------------------------------------------------------

/// Encoded redeemer: the validator's `(discriminant, args)` tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redeemer {
    pub discriminant: u64,
    pub args: Vec<PlutusData>,
}

impl Redeemer {
    /// Encodes an action.
    pub fn build(action: &GovAction) -> Result<Self> {
        let args = match action {
            GovAction::Vote { voter_pkh, amount } => vec![
                PlutusData::Bytes(pkh_bytes("voter_pkh", voter_pkh)?),
                PlutusData::Int(i128::from(*amount)),
            ],
            GovAction::UpdateAuthorizedPkhs { pkhs } => vec![pkh_map("authorized_pkhs", pkhs)?],
            GovAction::UpdateMinVotingTokens { amount } => vec![PlutusData::Int(i128::from(*amount))],
            GovAction::SetVotingPeriod { start, end } => {
                if end <= start {
                    return Err(GovernanceError::Validation(
                        "voting_end must be after voting_start".to_string(),
                    ));
                }
                vec![PlutusData::Int(i128::from(*start)), PlutusData::Int(i128::from(*end))]
            }
            GovAction::Finalize | GovAction::Execute => Vec::new(),
        };
        Ok(Self {
            discriminant: action.discriminant(),
            args,
        })
    }

    /// Parses and encodes in one step, for callers holding a name + payload.
    pub fn from_request(action: &str, payload: &Json) -> Result<Self> {
        Self::build(&GovAction::from_request(action, payload)?)
    }

    pub fn to_plutus(&self) -> PlutusData {
        PlutusData::Constr(self.discriminant, self.args.clone())
    }

    /// Hex CBOR of the redeemer, checked to be whole bytes.
    pub fn to_hex(&self) -> Result<String> {
        let hex_str = self.to_plutus().to_hex()?;
        whole_bytes(&hex_str)?;
        Ok(hex_str)
    }
}

/// Decodes a hex redeemer payload, refusing anything that is not a whole
/// number of bytes. An odd-length string is a serialization bug upstream and
/// must never reach the wallet.
pub fn whole_bytes(hex_str: &str) -> Result<Vec<u8>> {
    if hex_str.len() % 2 != 0 {
        return Err(GovernanceError::Encoding(format!(
            "redeemer hex has odd length {}",
            hex_str.len()
        )));
    }
    hex::decode(hex_str).map_err(|e| GovernanceError::Encoding(format!("redeemer is not hex: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PKH: &str = "bb000000000000000000000000000000000000000000000000000000";

    #[test]
    fn unknown_action_fails_closed() {
        let err = Redeemer::from_request("Bogus", &json!({})).unwrap_err();
        assert!(matches!(err, GovernanceError::UnknownAction(ref a) if a == "Bogus"));
    }

    #[test]
    fn missing_field_is_named() {
        let err = GovAction::from_request("Vote", &json!({ "voter_pkh": PKH })).unwrap_err();
        match err {
            GovernanceError::MissingField { field, action } => {
                assert_eq!(field, "amount");
                assert_eq!(action, "Vote");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = GovAction::from_request("SetVotingPeriod", &json!({ "voting_start": 1 })).unwrap_err();
        assert!(matches!(err, GovernanceError::MissingField { ref field, .. } if field == "voting_end"));
    }

    #[test]
    fn null_counts_as_missing() {
        let err = GovAction::from_request("UpdateMinVotingTokens", &json!({ "min_voting_tokens": null }))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::MissingField { .. }));
    }

    #[test]
    fn wrong_type_is_validation() {
        let err = GovAction::from_request("UpdateMinVotingTokens", &json!({ "min_voting_tokens": "ten" }))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
    }

    #[test]
    fn discriminants_match_validator() {
        let cases = [
            ("Vote", json!({ "voter_pkh": PKH, "amount": 5 }), 1),
            ("UpdateAuthorizedPKHs", json!({ "authorized_pkhs": { PKH: 1 } }), 2),
            ("UpdateMinVotingTokens", json!({ "min_voting_tokens": 10 }), 3),
            ("SetVotingPeriod", json!({ "voting_start": 1, "voting_end": 2 }), 4),
            ("Finalize", json!({}), 5),
            ("Execute", json!({}), 6),
        ];
        for (name, payload, expected) in cases {
            let redeemer = Redeemer::from_request(name, &payload).unwrap();
            assert_eq!(redeemer.discriminant, expected, "{}", name);
            assert_eq!(GovAction::from_request(name, &payload).unwrap().name(), name);
        }
    }

    #[test]
    fn request_pkhs_are_lowercased() {
        let upper = PKH.to_uppercase();
        let vote = GovAction::from_request("Vote", &json!({ "voter_pkh": upper, "amount": 1 })).unwrap();
        assert_eq!(vote, GovAction::Vote { voter_pkh: PKH.into(), amount: 1 });

        let update = GovAction::from_request("UpdateAuthorizedPKHs", &json!({ "authorized_pkhs": { upper: 3 } }))
            .unwrap();
        assert_eq!(update, GovAction::UpdateAuthorizedPkhs { pkhs: BTreeMap::from([(PKH.to_string(), 3)]) });
    }

    #[test]
    fn vote_args_are_pkh_bytes_and_amount() {
        let redeemer = Redeemer::build(&GovAction::Vote { voter_pkh: PKH.into(), amount: 42 }).unwrap();
        assert_eq!(redeemer.args.len(), 2);
        assert_eq!(redeemer.args[0], PlutusData::Bytes(hex::decode(PKH).unwrap()));
        assert_eq!(redeemer.args[1], PlutusData::Int(42));
    }

    #[test]
    fn finalize_hex_is_tag_126_empty() {
        // Constr 5 → tag 121 + 5 = 126 (d8 7e), empty array (80).
        assert_eq!(Redeemer::build(&GovAction::Finalize).unwrap().to_hex().unwrap(), "d87e80");
    }

    #[test]
    fn odd_length_hex_is_encoding_error() {
        assert!(matches!(whole_bytes("d87e8"), Err(GovernanceError::Encoding(_))));
        assert!(matches!(whole_bytes("zz"), Err(GovernanceError::Encoding(_))));
        assert_eq!(whole_bytes("d87e80").unwrap(), vec![0xd8, 0x7e, 0x80]);
    }

    #[test]
    fn malformed_pkh_is_rejected() {
        let err = Redeemer::build(&GovAction::Vote { voter_pkh: "abc".into(), amount: 1 }).unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
    }
}
