//! Ledger transaction model and its CBOR form.
//!
//! ```text
//! transaction  = [ body, witness_set, is_valid: true, auxiliary_data / null ]
//! body         = { 0: inputs, 1: outputs, 2: fee, ?7: aux_data_hash,
//!                  ?11: script_data_hash, ?13: collateral, ?14: required_signers }
//! output       = { 0: address, 1: value, ?2: [1, #6.24(datum_cbor)] }
//! value        = coin / [coin, { policy: { asset_name: qty } }]
//! witness_set  = { ?0: [[vkey, sig]], ?5: [redeemer], ?6|7: [script] }
//! redeemer     = [tag, index, data, [mem, steps]]
//! ```
//!
//! The transaction id is `blake2b_256` of the body bytes, so the body is
//! encoded exactly once and never touched again after the wallet signs.

use ciborium::value::{Integer, Value};
use std::collections::BTreeMap;

use crate::config::{PlutusVersion, NATIVE_UNIT};
use crate::crypto::blake2b_256;
use crate::error::{GovernanceError, Result};
use crate::plutus::data::{decode_value, encode_value, PlutusData};
use crate::proposal::utxo::{split_unit, AssetBundle, Utxo};

const REDEEMER_TAG_SPEND: u64 = 0;
const INLINE_DATUM: u64 = 1;
const TAG_ENCODED_CBOR: u64 = 24;
const WITNESS_VKEYS: u64 = 0;
const WITNESS_REDEEMERS: u64 = 5;

fn uint(n: u64) -> Value {
    Value::Integer(Integer::from(n))
}

// ---------------------------------------------------------------------------
// Inputs & outputs
// ---------------------------------------------------------------------------

/// Reference to an output being spent. Orders by `(tx_hash, index)`, which
/// is the order the ledger uses for input sets and redeemer indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxInput {
    pub tx_hash: [u8; 32],
    pub index: u32,
}

impl TxInput {
    pub fn from_utxo(utxo: &Utxo) -> Result<Self> {
        let bytes = hex::decode(&utxo.tx_hash)?;
        let tx_hash: [u8; 32] = bytes.try_into().map_err(|_| {
            GovernanceError::InvalidInput(format!(
                "input {} has a transaction hash that is not 32 bytes",
                utxo.reference()
            ))
        })?;
        Ok(Self { tx_hash, index: utxo.output_index })
    }

    fn to_cbor_value(self) -> Value {
        Value::Array(vec![Value::Bytes(self.tx_hash.to_vec()), uint(u64::from(self.index))])
    }
}

/// A new output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: Vec<u8>,
    pub value: AssetBundle,
    pub datum: Option<PlutusData>,
}

impl TxOutput {
    pub fn to_cbor_value(&self) -> Result<Value> {
        let mut entries = vec![
            (uint(0), Value::Bytes(self.address.clone())),
            (uint(1), value_to_cbor(&self.value)?),
        ];
        if let Some(datum) = &self.datum {
            entries.push((
                uint(2),
                Value::Array(vec![
                    uint(INLINE_DATUM),
                    Value::Tag(TAG_ENCODED_CBOR, Box::new(Value::Bytes(datum.to_cbor()?))),
                ]),
            ));
        }
        Ok(Value::Map(entries))
    }

    /// Serialized size, which the min-UTxO rule charges for.
    pub fn encoded_size(&self) -> Result<u64> {
        Ok(encode_value(&self.to_cbor_value()?)?.len() as u64)
    }
}

/// Encodes a multi-asset value. Token units are `policy_hex || name_hex`.
pub fn value_to_cbor(bundle: &AssetBundle) -> Result<Value> {
    let coin = uint(bundle.lovelace());
    let mut policies: BTreeMap<Vec<u8>, Vec<(Vec<u8>, u64)>> = BTreeMap::new();
    for (unit, quantity) in bundle.tokens() {
        let (policy, name) = split_unit(unit)?;
        policies
            .entry(hex::decode(policy)?)
            .or_default()
            .push((hex::decode(name)?, quantity));
    }
    if policies.is_empty() {
        return Ok(coin);
    }
    let multiasset = policies
        .into_iter()
        .map(|(policy, assets)| {
            let assets = assets
                .into_iter()
                .map(|(name, qty)| (Value::Bytes(name), uint(qty)))
                .collect();
            (Value::Bytes(policy), Value::Map(assets))
        })
        .collect();
    Ok(Value::Array(vec![coin, Value::Map(multiasset)]))
}

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// The signed part of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxBody {
    /// Kept sorted; see [`TxBody::sort_inputs`].
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    pub auxiliary_data_hash: Option<[u8; 32]>,
    pub script_data_hash: Option<[u8; 32]>,
    pub collateral: Vec<TxInput>,
    pub required_signers: Vec<[u8; 28]>,
}

impl TxBody {
    pub fn sort_inputs(&mut self) {
        self.inputs.sort();
        self.inputs.dedup();
    }

    /// Position of `input` in the sorted input set.
    pub fn input_position(&self, input: &TxInput) -> Option<u32> {
        self.inputs.iter().position(|i| i == input).map(|p| p as u32)
    }

    pub fn to_cbor_value(&self) -> Result<Value> {
        let mut entries = vec![
            (uint(0), Value::Array(self.inputs.iter().map(|i| i.to_cbor_value()).collect())),
            (
                uint(1),
                Value::Array(
                    self.outputs
                        .iter()
                        .map(TxOutput::to_cbor_value)
                        .collect::<Result<Vec<_>>>()?,
                ),
            ),
            (uint(2), uint(self.fee)),
        ];
        if let Some(hash) = self.auxiliary_data_hash {
            entries.push((uint(7), Value::Bytes(hash.to_vec())));
        }
        if let Some(hash) = self.script_data_hash {
            entries.push((uint(11), Value::Bytes(hash.to_vec())));
        }
        if !self.collateral.is_empty() {
            entries.push((uint(13), Value::Array(self.collateral.iter().map(|i| i.to_cbor_value()).collect())));
        }
        if !self.required_signers.is_empty() {
            entries.push((
                uint(14),
                Value::Array(self.required_signers.iter().map(|s| Value::Bytes(s.to_vec())).collect()),
            ));
        }
        Ok(Value::Map(entries))
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        encode_value(&self.to_cbor_value()?)
    }

    /// Transaction id.
    pub fn hash(&self) -> Result<[u8; 32]> {
        Ok(blake2b_256(&self.to_cbor()?))
    }
}

// ---------------------------------------------------------------------------
// Witnesses
// ---------------------------------------------------------------------------

/// A spend redeemer with its declared execution budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendRedeemer {
    pub index: u32,
    pub data: PlutusData,
    pub mem: u64,
    pub steps: u64,
}

impl SpendRedeemer {
    fn to_cbor_value(&self) -> Result<Value> {
        Ok(Value::Array(vec![
            uint(REDEEMER_TAG_SPEND),
            uint(u64::from(self.index)),
            self.data.to_cbor_value()?,
            Value::Array(vec![uint(self.mem), uint(self.steps)]),
        ]))
    }
}

/// Witness set. The builder fills in scripts and redeemers; the wallet
/// contributes the vkey witnesses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WitnessSet {
    /// `(vkey, signature)` pairs.
    pub vkeys: Vec<(Vec<u8>, Vec<u8>)>,
    pub script: Option<(PlutusVersion, Vec<u8>)>,
    pub redeemers: Vec<SpendRedeemer>,
}

impl WitnessSet {
    pub fn to_cbor_value(&self) -> Result<Value> {
        let mut entries = Vec::new();
        if !self.vkeys.is_empty() {
            entries.push((uint(WITNESS_VKEYS), vkeys_to_cbor(&self.vkeys)));
        }
        if !self.redeemers.is_empty() {
            entries.push((uint(WITNESS_REDEEMERS), self.redeemers_cbor_value()?));
        }
        if let Some((version, script)) = &self.script {
            entries.push((uint(version.witness_key()), Value::Array(vec![Value::Bytes(script.clone())])));
        }
        Ok(Value::Map(entries))
    }

    fn redeemers_cbor_value(&self) -> Result<Value> {
        Ok(Value::Array(
            self.redeemers
                .iter()
                .map(SpendRedeemer::to_cbor_value)
                .collect::<Result<Vec<_>>>()?,
        ))
    }

    /// Hash committing to redeemers and the cost model:
    /// `blake2b_256(redeemers || language_views)`. Inline datums are not part
    /// of the witness set, so the datum segment is empty.
    pub fn script_data_hash(&self, cost_model: &[i64]) -> Result<Option<[u8; 32]>> {
        let Some((version, _)) = &self.script else {
            return Ok(None);
        };
        let mut preimage = encode_value(&self.redeemers_cbor_value()?)?;
        let views = Value::Map(vec![(
            uint(version.language_id()),
            Value::Array(cost_model.iter().map(|c| Value::Integer(Integer::from(*c))).collect()),
        )]);
        preimage.extend(encode_value(&views)?);
        Ok(Some(blake2b_256(&preimage)))
    }

    /// Decodes the vkey witnesses of a detached witness set, as a wallet
    /// returns it from a partial sign.
    pub fn vkeys_from_cbor(bytes: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let Value::Map(entries) = decode_value(bytes)? else {
            return Err(GovernanceError::Decoding("witness set must be a map".into()));
        };
        let Some((_, vkeys)) = entries.iter().find(|(k, _)| *k == uint(WITNESS_VKEYS)) else {
            return Ok(Vec::new());
        };
        vkeys_from_value(vkeys)
    }
}

fn vkeys_to_cbor(vkeys: &[(Vec<u8>, Vec<u8>)]) -> Value {
    Value::Array(
        vkeys
            .iter()
            .map(|(vkey, sig)| Value::Array(vec![Value::Bytes(vkey.clone()), Value::Bytes(sig.clone())]))
            .collect(),
    )
}

fn vkeys_from_value(value: &Value) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    // Conway allows the set tag 258 around the array.
    let items = match value {
        Value::Array(items) => items,
        Value::Tag(258, inner) => match inner.as_ref() {
            Value::Array(items) => items,
            _ => return Err(GovernanceError::Decoding("vkey witnesses must be an array".into())),
        },
        _ => return Err(GovernanceError::Decoding("vkey witnesses must be an array".into())),
    };
    items
        .iter()
        .map(|item| match item {
            Value::Array(pair) if pair.len() == 2 => match (&pair[0], &pair[1]) {
                (Value::Bytes(vkey), Value::Bytes(sig)) => Ok((vkey.clone(), sig.clone())),
                _ => Err(GovernanceError::Decoding("vkey witness fields must be bytes".into())),
            },
            _ => Err(GovernanceError::Decoding("vkey witness must be a pair".into())),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A complete transaction, signed or not.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub body: TxBody,
    pub witnesses: WitnessSet,
    /// Metadata map `{label: metadatum}`.
    pub auxiliary_data: Option<Value>,
}

impl Transaction {
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        encode_value(&Value::Array(vec![
            self.body.to_cbor_value()?,
            self.witnesses.to_cbor_value()?,
            Value::Bool(true),
            self.auxiliary_data.clone().unwrap_or(Value::Null),
        ]))
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_cbor()?))
    }

    /// Hex transaction id.
    pub fn id(&self) -> Result<String> {
        Ok(hex::encode(self.body.hash()?))
    }

    pub fn fee(&self) -> u64 {
        self.body.fee
    }

    /// Total lovelace across outputs.
    pub fn output_lovelace(&self) -> u64 {
        self.body
            .outputs
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.value.get(NATIVE_UNIT)))
    }
}

/// Hash of auxiliary data.
pub fn auxiliary_data_hash(aux: &Value) -> Result<[u8; 32]> {
    Ok(blake2b_256(&encode_value(aux)?))
}

/// Splits a serialized transaction into its four top-level parts.
fn split_tx(tx_cbor: &[u8]) -> Result<Vec<Value>> {
    match decode_value(tx_cbor)? {
        Value::Array(parts) if parts.len() == 4 => Ok(parts),
        _ => Err(GovernanceError::Decoding("transaction must be a 4-element array".into())),
    }
}

/// Id of a serialized transaction: hash of its body exactly as encoded.
pub fn tx_id_of(tx_cbor: &[u8]) -> Result<[u8; 32]> {
    let parts = split_tx(tx_cbor)?;
    Ok(blake2b_256(&encode_value(&parts[0])?))
}

/// Adds detached vkey witnesses to a serialized transaction. Body and
/// auxiliary data are carried over untouched, so the id does not change.
pub fn merge_vkey_witnesses(tx_cbor: &[u8], witness_cbor: &[u8]) -> Result<Vec<u8>> {
    let mut parts = split_tx(tx_cbor)?;
    let incoming = WitnessSet::vkeys_from_cbor(witness_cbor)?;

    let Value::Map(entries) = &mut parts[1] else {
        return Err(GovernanceError::Decoding("witness set must be a map".into()));
    };
    let position = entries.iter().position(|(k, _)| *k == uint(WITNESS_VKEYS));
    let mut vkeys = match position {
        Some(i) => vkeys_from_value(&entries[i].1)?,
        None => Vec::new(),
    };
    for witness in incoming {
        if !vkeys.iter().any(|(vkey, _)| *vkey == witness.0) {
            vkeys.push(witness);
        }
    }
    match position {
        Some(i) => entries[i].1 = vkeys_to_cbor(&vkeys),
        None => entries.insert(0, (uint(WITNESS_VKEYS), vkeys_to_cbor(&vkeys))),
    }

    encode_value(&Value::Array(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

    fn input(byte: u8, index: u32) -> TxInput {
        TxInput { tx_hash: [byte; 32], index }
    }

    fn sample_tx() -> Transaction {
        let mut body = TxBody {
            inputs: vec![input(2, 0), input(1, 3), input(1, 1)],
            outputs: vec![TxOutput {
                address: vec![0x70; 29],
                value: AssetBundle::from_lovelace(2_000_000),
                datum: Some(PlutusData::unit(0)),
            }],
            fee: 180_000,
            ..TxBody::default()
        };
        body.sort_inputs();
        Transaction { body, witnesses: WitnessSet::default(), auxiliary_data: None }
    }

    #[test]
    fn short_input_hash_names_the_output() {
        let utxo = Utxo {
            tx_hash: "abcd".into(),
            output_index: 7,
            address: String::new(),
            assets: AssetBundle::from_lovelace(1),
            inline_datum: None,
        };
        let err = TxInput::from_utxo(&utxo).unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidInput(ref m) if m.contains("abcd#7")), "{:?}", err);
    }

    #[test]
    fn inputs_sort_by_hash_then_index() {
        let tx = sample_tx();
        assert_eq!(tx.body.inputs, vec![input(1, 1), input(1, 3), input(2, 0)]);
        assert_eq!(tx.body.input_position(&input(2, 0)), Some(2));
    }

    #[test]
    fn pure_coin_value_is_an_integer() {
        assert_eq!(value_to_cbor(&AssetBundle::from_lovelace(5)).unwrap(), uint(5));
    }

    #[test]
    fn multiasset_value_groups_by_policy() {
        let mut bundle = AssetBundle::from_lovelace(5);
        bundle.add(&format!("{}01", POLICY), 3).unwrap();
        bundle.add(&format!("{}02", POLICY), 4).unwrap();
        let Value::Array(parts) = value_to_cbor(&bundle).unwrap() else {
            panic!("expected [coin, multiasset]");
        };
        let Value::Map(policies) = &parts[1] else { panic!("expected map") };
        assert_eq!(policies.len(), 1);
        let Value::Map(assets) = &policies[0].1 else { panic!("expected asset map") };
        assert_eq!(assets.len(), 2);
    }

    #[test]
    fn inline_datum_is_wrapped_in_tag_24() {
        let out = sample_tx().body.outputs[0].to_cbor_value().unwrap();
        let Value::Map(entries) = out else { panic!("output must be a map") };
        let (_, datum) = &entries[2];
        assert_eq!(
            *datum,
            Value::Array(vec![uint(1), Value::Tag(24, Box::new(Value::Bytes(vec![0xd8, 0x79, 0x80])))])
        );
    }

    #[test]
    fn id_is_stable_through_serialization() {
        let tx = sample_tx();
        let cbor = tx.to_cbor().unwrap();
        assert_eq!(hex::encode(tx_id_of(&cbor).unwrap()), tx.id().unwrap());
    }

    #[test]
    fn transactions_compare_by_content() {
        let tx = sample_tx();
        assert_eq!(tx.clone(), tx);

        let mut with_metadata = tx.clone();
        with_metadata.auxiliary_data = Some(Value::Map(vec![(Value::from(674u64), Value::Text("memo".into()))]));
        assert_ne!(with_metadata, tx);
    }

    #[test]
    fn merging_witnesses_keeps_the_id() {
        let tx = sample_tx();
        let cbor = tx.to_cbor().unwrap();
        let detached = WitnessSet {
            vkeys: vec![(vec![7; 32], vec![9; 64])],
            ..WitnessSet::default()
        };
        let witness_cbor = encode_value(&detached.to_cbor_value().unwrap()).unwrap();

        let signed = merge_vkey_witnesses(&cbor, &witness_cbor).unwrap();
        assert_eq!(tx_id_of(&signed).unwrap(), tx_id_of(&cbor).unwrap());

        let parts = split_tx(&signed).unwrap();
        let merged = WitnessSet::vkeys_from_cbor(&encode_value(&parts[1]).unwrap()).unwrap();
        assert_eq!(merged, detached.vkeys);

        // Merging the same witness twice does not duplicate it.
        let again = merge_vkey_witnesses(&signed, &witness_cbor).unwrap();
        let parts = split_tx(&again).unwrap();
        assert_eq!(WitnessSet::vkeys_from_cbor(&encode_value(&parts[1]).unwrap()).unwrap().len(), 1);
    }

    #[test]
    fn script_data_hash_only_with_script() {
        let mut witnesses = WitnessSet::default();
        assert_eq!(witnesses.script_data_hash(&[1, 2]).unwrap(), None);

        witnesses.script = Some((PlutusVersion::V3, vec![1, 2, 3]));
        witnesses.redeemers.push(SpendRedeemer { index: 0, data: PlutusData::unit(5), mem: 1, steps: 1 });
        let a = witnesses.script_data_hash(&[1, 2]).unwrap();
        let b = witnesses.script_data_hash(&[1, 3]).unwrap();
        assert!(a.is_some());
        assert_ne!(a, b, "cost model is committed to");
    }

    #[test]
    fn garbage_is_not_a_transaction() {
        assert!(tx_id_of(&[0x01]).is_err());
    }
}
