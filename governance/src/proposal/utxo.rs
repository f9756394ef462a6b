//! UTXOs and multi-asset value bundles.
//!
//! A UTXO is both the unit of value and the unit of contract state: the
//! proposal lives in exactly one output at the validator's address, and an
//! update must spend that exact output. If someone else spent it first, the
//! ledger rejects our transaction (`BadInputsUTxO`) and the caller has to
//! refresh. There is no client-side lock; the ledger is the arbiter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::NATIVE_UNIT;
use crate::error::{GovernanceError, Result};

// ---------------------------------------------------------------------------
// AssetBundle
// ---------------------------------------------------------------------------

/// Quantities per asset unit. The native currency is keyed by
/// [`NATIVE_UNIT`]; native tokens by `policy_id_hex || asset_name_hex`.
///
/// Backed by a `BTreeMap` so iteration order (and therefore any CBOR built
/// from it) is deterministic. Zero quantities are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetBundle(BTreeMap<String, u64>);

impl AssetBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle holding only the native currency.
    pub fn from_lovelace(lovelace: u64) -> Self {
        let mut bundle = Self::new();
        bundle.insert(NATIVE_UNIT, lovelace);
        bundle
    }

    /// Sets a unit's quantity, dropping the entry when it is zero.
    pub fn insert(&mut self, unit: &str, quantity: u64) {
        if quantity == 0 {
            self.0.remove(unit);
        } else {
            self.0.insert(unit.to_string(), quantity);
        }
    }

    pub fn get(&self, unit: &str) -> u64 {
        self.0.get(unit).copied().unwrap_or(0)
    }

    pub fn lovelace(&self) -> u64 {
        self.get(NATIVE_UNIT)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(unit, quantity)` in unit order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Non-native entries only.
    pub fn tokens(&self) -> impl Iterator<Item = (&str, u64)> {
        self.iter().filter(|(unit, _)| *unit != NATIVE_UNIT)
    }

    /// Sum of every token minted under `policy_id`. A bundle without any
    /// such entry simply has zero.
    pub fn policy_total(&self, policy_id: &str) -> u64 {
        if policy_id.is_empty() {
            return 0;
        }
        self.tokens()
            .filter(|(unit, _)| unit.starts_with(policy_id))
            .fold(0u64, |acc, (_, q)| acc.saturating_add(q))
    }

    /// Adds `quantity` of `unit`.
    pub fn add(&mut self, unit: &str, quantity: u64) -> Result<()> {
        let total = self.get(unit).checked_add(quantity).ok_or_else(|| {
            GovernanceError::Validation(format!("asset quantity overflow for {}", unit))
        })?;
        self.insert(unit, total);
        Ok(())
    }

    /// Adds every entry of `other`.
    pub fn merge(&mut self, other: &AssetBundle) -> Result<()> {
        for (unit, quantity) in other.iter() {
            self.add(unit, quantity)?;
        }
        Ok(())
    }

    /// `self - other`, or `None` if any unit would go negative.
    pub fn checked_sub(&self, other: &AssetBundle) -> Option<AssetBundle> {
        let mut out = self.clone();
        for (unit, quantity) in other.iter() {
            let left = out.get(unit).checked_sub(quantity)?;
            out.insert(unit, left);
        }
        Some(out)
    }

    /// Whether this bundle holds at least `other` of every unit.
    pub fn covers(&self, other: &AssetBundle) -> bool {
        other.iter().all(|(unit, quantity)| self.get(unit) >= quantity)
    }
}

impl FromIterator<(String, u64)> for AssetBundle {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut bundle = AssetBundle::new();
        for (unit, quantity) in iter {
            bundle.insert(&unit, quantity);
        }
        bundle
    }
}

/// Splits a token unit into `(policy_id_hex, asset_name_hex)`.
pub fn split_unit(unit: &str) -> Result<(&str, &str)> {
    if unit.len() < 56 || !unit.is_char_boundary(56) {
        return Err(GovernanceError::Validation(format!("malformed asset unit {}", unit)));
    }
    Ok(unit.split_at(56))
}

// ---------------------------------------------------------------------------
// Utxo
// ---------------------------------------------------------------------------

/// A fully-known unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_hash: String,
    pub output_index: u32,
    pub address: String,
    pub assets: AssetBundle,
    /// Hex CBOR of the inline datum, if the output carries one.
    #[serde(default)]
    pub inline_datum: Option<String>,
}

impl Utxo {
    /// `txhash#index`, the usual human-readable reference.
    pub fn reference(&self) -> String {
        format!("{}#{}", self.tx_hash, self.output_index)
    }
}

/// Quantity entry as the backend and chain API report it (quantities are
/// decimal strings so they survive JavaScript number precision).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub unit: String,
    pub quantity: String,
}

/// Parses a list of [`AssetAmount`]s into a bundle.
pub fn bundle_from_amounts(amounts: &[AssetAmount]) -> Result<AssetBundle> {
    let mut bundle = AssetBundle::new();
    for entry in amounts {
        let quantity: u64 = entry.quantity.parse().map_err(|_| {
            GovernanceError::InvalidInput(format!(
                "quantity {:?} of {} is not an unsigned integer",
                entry.quantity, entry.unit
            ))
        })?;
        bundle.add(&entry.unit, quantity)?;
    }
    Ok(bundle)
}

/// A proposal UTXO as `GET /api/proposal/{id}/utxos` reports it.
///
/// Every field is optional on the wire; [`MatchingUtxo::to_script_utxo`]
/// insists on the ones a spend needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingUtxo {
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub output_index: Option<u32>,
    #[serde(default)]
    pub amount: Option<Vec<AssetAmount>>,
    #[serde(default)]
    pub inline_datum: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl MatchingUtxo {
    /// Converts into a spendable script UTXO. Fails with
    /// [`GovernanceError::InvalidInput`] naming the first missing piece:
    /// transaction hash, output index, assets or datum.
    pub fn to_script_utxo(&self) -> Result<Utxo> {
        let missing = |field: &str| GovernanceError::InvalidInput(format!("UTXO is missing {}", field));

        let tx_hash = self
            .tx_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| missing("tx_hash"))?;
        let output_index = self.output_index.ok_or_else(|| missing("output_index"))?;
        let amounts = self
            .amount
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| missing("assets"))?;
        let datum = self
            .inline_datum
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| missing("datum"))?;

        Ok(Utxo {
            tx_hash: tx_hash.to_string(),
            output_index,
            address: self.address.clone().unwrap_or_default(),
            assets: bundle_from_amounts(amounts)?,
            inline_datum: Some(datum.to_string()),
        })
    }
}
