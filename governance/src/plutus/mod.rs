//! On-chain data: the generic structured value, the governance datum and the
//! action redeemers.

pub mod data;
pub mod datum;
pub mod redeemer;

pub use data::PlutusData;
pub use datum::{CreateDatumRequest, DatumCodec, GovDatum, GovParams, OnChainProposal, Outcome, ProposalMetadata};
pub use redeemer::{GovAction, Redeemer};

use std::collections::BTreeMap;

use crate::config::PKH_LENGTH;
use crate::error::{GovernanceError, Result};

/// Decodes a hex key hash, insisting on exactly [`PKH_LENGTH`] bytes.
pub(crate) fn pkh_bytes(field: &str, pkh: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(pkh)
        .map_err(|_| GovernanceError::Validation(format!("{}: {:?} is not hex", field, pkh)))?;
    if bytes.len() != PKH_LENGTH {
        return Err(GovernanceError::Validation(format!(
            "{}: key hash must be {} bytes, got {}",
            field,
            PKH_LENGTH,
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// `pkh -> n` as an on-chain map, keys as raw bytes in key order.
pub(crate) fn pkh_map(field: &str, entries: &BTreeMap<String, u64>) -> Result<PlutusData> {
    let pairs = entries
        .iter()
        .map(|(pkh, n)| Ok((PlutusData::Bytes(pkh_bytes(field, pkh)?), PlutusData::Int(i128::from(*n)))))
        .collect::<Result<Vec<_>>>()?;
    Ok(PlutusData::Map(pairs))
}

/// Inverse of [`pkh_map`].
pub(crate) fn pkh_map_from(data: &PlutusData, field: &str) -> Result<BTreeMap<String, u64>> {
    data.as_map(field)?
        .iter()
        .map(|(k, v)| Ok((hex::encode(k.as_bytes(field)?), v.as_u64(field)?)))
        .collect()
}
