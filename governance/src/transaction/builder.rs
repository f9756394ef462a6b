//! Assembles unsigned governance transactions.
//!
//! Two shapes exist:
//!
//! - **create** pays a deposit into a fresh output at the validator's
//!   address, carrying the initial datum inline. Wallet UTXOs fund it.
//! - **update** spends the proposal's current output through the validator
//!   and recreates it at the same address with the *same* value and the
//!   next datum. The signer is declared as a required signer so the
//!   validator can check ownership or voter identity.
//!
//! Everything that can be checked locally is checked before the first
//! network call. Parameters are fetched fresh per build.
//!
//! ## Balancing
//!
//! The fee depends on the size, the size depends on the inputs and change,
//! and the inputs depend on the fee. We iterate: build with a fee guess,
//! measure, re-price, and stop as soon as the body already pays what its
//! own size demands. An update settles in three rounds: the first has no
//! funding inputs yet.

use ciborium::value::{Integer, Value};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::body::{auxiliary_data_hash, SpendRedeemer, Transaction, TxBody, TxInput, TxOutput, WitnessSet};
use super::params::{ParameterSource, ProtocolParameters};
use crate::address::{script_hash, Address, PaymentCredential};
use crate::config::{
    GovernanceConfig, Network, PlutusVersion, DEFAULT_EX_UNITS_MEM, DEFAULT_EX_UNITS_STEPS, MAX_FEE_ITERATIONS,
    NATIVE_UNIT, PKH_LENGTH, PROPOSAL_METADATA_LABEL, VKEY_WITNESS_SIZE,
};
use crate::error::{GovernanceError, Result};
use crate::plutus::data::PlutusData;
use crate::plutus::datum::ProposalMetadata;
use crate::plutus::pkh_bytes;
use crate::plutus::redeemer::whole_bytes;
use crate::proposal::{AssetBundle, MatchingUtxo, Utxo};
use crate::wallet::api::WalletApi;

// ---------------------------------------------------------------------------
// Validator script
// ---------------------------------------------------------------------------

/// The governance validator, as attached to update transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorScript {
    pub bytes: Vec<u8>,
    pub version: PlutusVersion,
}

impl ValidatorScript {
    pub fn new(bytes: Vec<u8>, version: PlutusVersion) -> Self {
        Self { bytes, version }
    }

    pub fn from_config(config: &GovernanceConfig) -> Result<Self> {
        if config.validator_script_hex.is_empty() {
            return Err(GovernanceError::Validation("no validator script configured".into()));
        }
        Ok(Self::new(hex::decode(&config.validator_script_hex)?, config.plutus_version))
    }

    pub fn hash(&self) -> [u8; PKH_LENGTH] {
        script_hash(&self.bytes, self.version)
    }

    /// Enterprise address locked by this script.
    pub fn address(&self, network: Network) -> Address {
        Address::enterprise_script(network, &self.hash())
    }
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// What a transaction must do, before funding and pricing.
struct Draft {
    /// Inputs that must be spent (the script input of an update).
    fixed_inputs: Vec<Utxo>,
    outputs: Vec<TxOutput>,
    /// Outputs whose value may be raised to the min-UTxO floor. Update
    /// outputs are value-preserving and must not be touched.
    adjustable_outputs: bool,
    script_spend: Option<(TxInput, PlutusData)>,
    required_signers: Vec<[u8; PKH_LENGTH]>,
    auxiliary_data: Option<Value>,
}

/// Builds unsigned create and update transactions for one wallet.
pub struct GovTxBuilder {
    params: Arc<dyn ParameterSource>,
    wallet: Arc<dyn WalletApi>,
    script: ValidatorScript,
}

impl GovTxBuilder {
    pub fn new(params: Arc<dyn ParameterSource>, wallet: Arc<dyn WalletApi>, script: ValidatorScript) -> Self {
        Self { params, wallet, script }
    }

    /// Unsigned transaction locking `amount` plus `datum` at `output_address`,
    /// funded by the wallet. The deposit is raised to the min-UTxO floor if
    /// it falls short.
    pub async fn create(
        &self,
        output_address: &str,
        datum: &PlutusData,
        amount: &AssetBundle,
        metadata: Option<&ProposalMetadata>,
    ) -> Result<Transaction> {
        let address = self.script_address(output_address)?;
        if amount.is_empty() {
            return Err(GovernanceError::Validation("deposit must not be empty".into()));
        }
        // Catch datum encoding problems before any network round-trip.
        datum.to_cbor()?;

        let draft = Draft {
            fixed_inputs: Vec::new(),
            outputs: vec![TxOutput {
                address: address.as_bytes().to_vec(),
                value: amount.clone(),
                datum: Some(datum.clone()),
            }],
            adjustable_outputs: true,
            script_spend: None,
            required_signers: Vec::new(),
            auxiliary_data: metadata.map(metadata_aux),
        };
        self.balance(draft).await
    }

    /// Unsigned transaction spending `input` through the validator with
    /// `redeemer_hex` and recreating it at `output_address` with the same
    /// value and `datum`.
    pub async fn update(
        &self,
        input: &MatchingUtxo,
        datum: &PlutusData,
        redeemer_hex: &str,
        output_address: &str,
        signer_pkh: &str,
    ) -> Result<Transaction> {
        let script_utxo = input.to_script_utxo()?;
        let redeemer = PlutusData::from_cbor(&whole_bytes(redeemer_hex)?)?;
        let signer: [u8; PKH_LENGTH] = pkh_bytes("signer_pkh", signer_pkh)?
            .try_into()
            .map_err(|_| GovernanceError::Validation("signer_pkh has the wrong length".into()))?;
        let address = self.script_address(output_address)?;
        let script_input = TxInput::from_utxo(&script_utxo)?;
        datum.to_cbor()?;

        let draft = Draft {
            outputs: vec![TxOutput {
                address: address.as_bytes().to_vec(),
                value: script_utxo.assets.clone(),
                datum: Some(datum.clone()),
            }],
            fixed_inputs: vec![script_utxo],
            adjustable_outputs: false,
            script_spend: Some((script_input, redeemer)),
            required_signers: vec![signer],
            auxiliary_data: None,
        };
        self.balance(draft).await
    }

    fn script_address(&self, output_address: &str) -> Result<Address> {
        let address = Address::parse(output_address)
            .map_err(|e| GovernanceError::Validation(format!("bad output address: {}", e)))?;
        match address.payment_credential() {
            PaymentCredential::Script(hash) if hash == self.script.hash() => Ok(address),
            _ => Err(GovernanceError::Validation(
                "output address is not locked by the governance validator".into(),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Balancing
    // -----------------------------------------------------------------------

    async fn balance(&self, mut draft: Draft) -> Result<Transaction> {
        let params = self.params.protocol_parameters().await?;
        let change_address = Address::parse(&self.wallet.get_change_address().await?)?;
        let wallet_utxos = self.wallet.get_utxos().await?;
        let cost_model = match draft.script_spend {
            Some(_) => params.cost_model(self.script.version)?.to_vec(),
            None => Vec::new(),
        };

        for output in &mut draft.outputs {
            enforce_min_utxo(output, &params, draft.adjustable_outputs)?;
        }

        let mut fee = 0u64;
        for round in 0..MAX_FEE_ITERATIONS {
            let tx = self.assemble(&draft, &params, &wallet_utxos, &change_address, fee, &cost_model)?;
            let size = tx.to_cbor()?.len() as u64 + VKEY_WITNESS_SIZE * witness_estimate(&tx, &draft, &wallet_utxos);
            let (mem, steps) = match draft.script_spend {
                Some(_) => (DEFAULT_EX_UNITS_MEM, DEFAULT_EX_UNITS_STEPS),
                None => (0, 0),
            };
            let needed = params.min_fee(size, mem, steps)?;
            debug!(round, size, fee = tx.fee(), needed, "fee round");

            if needed <= tx.fee() {
                if size > params.max_tx_size {
                    return Err(GovernanceError::Validation(format!(
                        "transaction is {} bytes, the network limit is {}",
                        size, params.max_tx_size
                    )));
                }
                info!(
                    tx_id = %tx.id()?,
                    fee = tx.fee(),
                    inputs = tx.body.inputs.len(),
                    "built unsigned transaction"
                );
                return Ok(tx);
            }
            fee = needed;
        }

        Err(GovernanceError::Encoding(format!(
            "fee did not settle within {} rounds",
            MAX_FEE_ITERATIONS
        )))
    }

    fn assemble(
        &self,
        draft: &Draft,
        params: &ProtocolParameters,
        wallet_utxos: &[Utxo],
        change_address: &Address,
        fee: u64,
        cost_model: &[i64],
    ) -> Result<Transaction> {
        let mut target = AssetBundle::from_lovelace(fee);
        for output in &draft.outputs {
            target.merge(&output.value)?;
        }
        let mut provided = AssetBundle::new();
        for utxo in &draft.fixed_inputs {
            provided.merge(&utxo.assets)?;
        }

        let mut selection = CoinSelection::new(wallet_utxos);
        let shortfall: AssetBundle = target
            .iter()
            .map(|(unit, q)| (unit.to_string(), q.saturating_sub(provided.get(unit))))
            .collect();
        selection.cover(&shortfall)?;

        let mut outputs = draft.outputs.clone();
        let mut fee = fee;
        loop {
            let mut gathered = provided.clone();
            gathered.merge(&selection.gathered)?;
            let change = gathered.checked_sub(&target).ok_or_else(|| {
                GovernanceError::Encoding("coin selection left a deficit".into())
            })?;
            if change.is_empty() {
                break;
            }
            let change_output = TxOutput {
                address: change_address.as_bytes().to_vec(),
                value: change.clone(),
                datum: None,
            };
            if change.lovelace() >= params.min_utxo(change_output.encoded_size()?) {
                outputs.push(change_output);
                break;
            }
            if selection.take_more_lovelace() {
                continue;
            }
            if change.tokens().next().is_none() {
                // Dust too small for its own output goes to the fee.
                fee += change.lovelace();
                break;
            }
            return Err(GovernanceError::InsufficientFunds {
                unit: NATIVE_UNIT.to_string(),
                required: target.lovelace() + params.min_utxo(change_output.encoded_size()?),
                available: gathered.lovelace(),
            });
        }

        let mut body = TxBody {
            inputs: draft
                .fixed_inputs
                .iter()
                .chain(selection.selected())
                .map(TxInput::from_utxo)
                .collect::<Result<Vec<_>>>()?,
            outputs,
            fee,
            required_signers: draft.required_signers.clone(),
            ..TxBody::default()
        };
        body.sort_inputs();

        let mut witnesses = WitnessSet::default();
        if let Some((script_input, redeemer)) = &draft.script_spend {
            let index = body.input_position(script_input).ok_or_else(|| {
                GovernanceError::Encoding("script input missing from the input set".into())
            })?;
            witnesses.script = Some((self.script.version, self.script.bytes.clone()));
            witnesses.redeemers.push(SpendRedeemer {
                index,
                data: redeemer.clone(),
                mem: DEFAULT_EX_UNITS_MEM,
                steps: DEFAULT_EX_UNITS_STEPS,
            });
            body.collateral = vec![TxInput::from_utxo(select_collateral(
                wallet_utxos,
                params.required_collateral(fee),
            )?)?];
            body.script_data_hash = witnesses.script_data_hash(cost_model)?;
        }

        if let Some(aux) = &draft.auxiliary_data {
            body.auxiliary_data_hash = Some(auxiliary_data_hash(aux)?);
        }

        Ok(Transaction {
            body,
            witnesses,
            auxiliary_data: draft.auxiliary_data.clone(),
        })
    }
}

fn enforce_min_utxo(output: &mut TxOutput, params: &ProtocolParameters, adjustable: bool) -> Result<()> {
    // The floor grows with the lovelace integer's width, so settle it twice.
    for _ in 0..2 {
        let floor = params.min_utxo(output.encoded_size()?);
        if output.value.lovelace() >= floor {
            return Ok(());
        }
        if !adjustable {
            return Err(GovernanceError::Validation(format!(
                "proposal output holds {} lovelace, the new datum needs at least {}",
                output.value.lovelace(),
                floor
            )));
        }
        debug!(from = output.value.lovelace(), to = floor, "raising output to min-UTxO");
        output.value.insert(NATIVE_UNIT, floor);
    }
    Ok(())
}

/// Distinct key hashes that will have to sign: owners of the spent wallet
/// inputs and collateral, plus the declared signers.
fn witness_estimate(tx: &Transaction, draft: &Draft, wallet_utxos: &[Utxo]) -> u64 {
    let spent: BTreeSet<&TxInput> = tx.body.inputs.iter().chain(tx.body.collateral.iter()).collect();
    let mut signers: BTreeSet<[u8; PKH_LENGTH]> = draft.required_signers.iter().copied().collect();
    for utxo in wallet_utxos {
        let Ok(input) = TxInput::from_utxo(utxo) else { continue };
        if !spent.contains(&input) {
            continue;
        }
        if let Ok(address) = Address::parse(&utxo.address) {
            if let PaymentCredential::Key(hash) = address.payment_credential() {
                signers.insert(hash);
            }
        }
    }
    signers.len().max(1) as u64
}

fn metadata_aux(metadata: &ProposalMetadata) -> Value {
    Value::Map(vec![(
        Value::Integer(Integer::from(PROPOSAL_METADATA_LABEL)),
        metadata.to_metadatum(),
    )])
}

/// Largest pure-lovelace wallet output that covers `required`.
fn select_collateral(wallet_utxos: &[Utxo], required: u64) -> Result<&Utxo> {
    let best = wallet_utxos
        .iter()
        .filter(|u| u.assets.tokens().next().is_none())
        .max_by_key(|u| u.assets.lovelace());
    match best {
        Some(utxo) if utxo.assets.lovelace() >= required => Ok(utxo),
        other => Err(GovernanceError::InsufficientFunds {
            unit: "collateral".to_string(),
            required,
            available: other.map(|u| u.assets.lovelace()).unwrap_or(0),
        }),
    }
}

// ---------------------------------------------------------------------------
// Coin selection
// ---------------------------------------------------------------------------

/// Largest-first selection: tokens first, one unit at a time, then lovelace.
struct CoinSelection<'a> {
    available: &'a [Utxo],
    used: Vec<bool>,
    gathered: AssetBundle,
}

impl<'a> CoinSelection<'a> {
    fn new(available: &'a [Utxo]) -> Self {
        Self {
            available,
            used: vec![false; available.len()],
            gathered: AssetBundle::new(),
        }
    }

    fn selected(&self) -> impl Iterator<Item = &'a Utxo> + '_ {
        self.available
            .iter()
            .zip(&self.used)
            .filter(|(_, used)| **used)
            .map(|(utxo, _)| utxo)
    }

    fn cover(&mut self, target: &AssetBundle) -> Result<()> {
        if self.gathered.covers(target) {
            return Ok(());
        }
        let units: Vec<(String, u64)> = target
            .tokens()
            .chain(std::iter::once((NATIVE_UNIT, target.lovelace())))
            .map(|(u, q)| (u.to_string(), q))
            .collect();
        for (unit, needed) in units {
            self.cover_unit(&unit, needed)?;
        }
        Ok(())
    }

    fn cover_unit(&mut self, unit: &str, needed: u64) -> Result<()> {
        if self.gathered.get(unit) >= needed {
            return Ok(());
        }
        let mut order: Vec<usize> = (0..self.available.len())
            .filter(|&i| !self.used[i] && self.available[i].assets.get(unit) > 0)
            .collect();
        order.sort_by_key(|&i| Reverse(self.available[i].assets.get(unit)));

        for i in order {
            self.take(i)?;
            if self.gathered.get(unit) >= needed {
                return Ok(());
            }
        }
        Err(GovernanceError::InsufficientFunds {
            unit: unit.to_string(),
            required: needed,
            available: self.gathered.get(unit),
        })
    }

    /// Adds the largest unused lovelace holder. `false` when none is left.
    fn take_more_lovelace(&mut self) -> bool {
        let next = (0..self.available.len())
            .filter(|&i| !self.used[i])
            .max_by_key(|&i| self.available[i].assets.lovelace());
        match next {
            Some(i) => self.take(i).is_ok(),
            None => false,
        }
    }

    fn take(&mut self, i: usize) -> Result<()> {
        self.used[i] = true;
        self.gathered.merge(&self.available[i].assets)
    }
}
