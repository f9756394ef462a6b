//! Network parameters that price a transaction.
//!
//! These are fetched fresh for every build. The ledger revises them at
//! epoch boundaries, and a transaction priced with last epoch's numbers is
//! rejected for an insufficient fee or an out-of-date script-data hash.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{PlutusVersion, UTXO_ENTRY_OVERHEAD};
use crate::error::{GovernanceError, Result};

/// Exact rational, for the execution unit prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: u64,
    pub denominator: u64,
}

impl Ratio {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self { numerator, denominator }
    }

    /// Converts a decimal the chain API reports (e.g. `0.0577`) into a ratio
    /// with the given denominator, rounding to nearest.
    pub fn from_decimal(value: f64, denominator: u64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 || denominator == 0 {
            return Err(GovernanceError::Backend(format!("invalid execution price {}", value)));
        }
        Ok(Self {
            numerator: (value * denominator as f64).round() as u64,
            denominator,
        })
    }
}

/// Fee, size and execution-price parameters of the current epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    /// Fee per transaction byte (the `a` in `a·size + b`).
    pub min_fee_a: u64,
    /// Constant fee term.
    pub min_fee_b: u64,
    pub max_tx_size: u64,
    pub price_mem: Ratio,
    pub price_step: Ratio,
    pub coins_per_utxo_byte: u64,
    /// Collateral required, as a percentage of the fee.
    pub collateral_percent: u64,
    /// Cost models keyed by language name (`PlutusV2`, `PlutusV3`).
    pub cost_models: BTreeMap<String, Vec<i64>>,
}

impl ProtocolParameters {
    /// Linear fee for a transaction of `size` bytes plus the price of the
    /// declared execution units, rounded up.
    pub fn min_fee(&self, size: u64, mem: u64, steps: u64) -> Result<u64> {
        let linear = u128::from(self.min_fee_a) * u128::from(size) + u128::from(self.min_fee_b);
        let scripts = ex_units_fee(self.price_mem, self.price_step, mem, steps)?;
        u64::try_from(linear + scripts)
            .map_err(|_| GovernanceError::Encoding("fee overflows u64".to_string()))
    }

    /// Minimum lovelace an output of `output_size` serialized bytes must hold.
    pub fn min_utxo(&self, output_size: u64) -> u64 {
        self.coins_per_utxo_byte
            .saturating_mul(UTXO_ENTRY_OVERHEAD.saturating_add(output_size))
    }

    /// Collateral needed to cover `fee`.
    pub fn required_collateral(&self, fee: u64) -> u64 {
        let scaled = u128::from(fee) * u128::from(self.collateral_percent);
        u64::try_from(scaled.div_ceil(100)).unwrap_or(u64::MAX)
    }

    /// Cost model of the validator's language.
    pub fn cost_model(&self, version: PlutusVersion) -> Result<&[i64]> {
        let key = match version {
            PlutusVersion::V2 => "PlutusV2",
            PlutusVersion::V3 => "PlutusV3",
        };
        self.cost_models
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| GovernanceError::Backend(format!("network parameters carry no {} cost model", key)))
    }
}

fn ex_units_fee(price_mem: Ratio, price_step: Ratio, mem: u64, steps: u64) -> Result<u128> {
    if price_mem.denominator == 0 || price_step.denominator == 0 {
        return Err(GovernanceError::Backend("execution price with zero denominator".to_string()));
    }
    if mem == 0 && steps == 0 {
        return Ok(0);
    }
    let (dm, ds) = (u128::from(price_mem.denominator), u128::from(price_step.denominator));
    let numerator = u128::from(mem) * u128::from(price_mem.numerator) * ds
        + u128::from(steps) * u128::from(price_step.numerator) * dm;
    Ok(numerator.div_ceil(dm * ds))
}

/// Source of the current network parameters.
#[async_trait]
pub trait ParameterSource: Send + Sync {
    async fn protocol_parameters(&self) -> Result<ProtocolParameters>;
}
