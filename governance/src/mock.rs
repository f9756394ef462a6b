//! In-memory doubles for every outside port.
//!
//! Compiled into the library so unit tests, the integration suite and
//! downstream crates can script the chain, the wallet and the backend
//! without a network. Each double records what it was asked so tests can
//! assert on calls that must (or must not) have happened.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::address::Address;
use crate::backend::{ChainProvider, GovernanceBackend, ValidateGovTxRequest, ValidationVerdict};
use crate::config::Network;
use crate::crypto::{blake2b_256, PaymentKeypair};
use crate::error::{GovernanceError, Result, TraceCode};
use crate::plutus::data::encode_value;
use crate::proposal::{AssetBundle, MatchingUtxo, Proposal, Utxo};
use crate::transaction::body::{tx_id_of, WitnessSet};
use crate::transaction::params::{ParameterSource, ProtocolParameters, Ratio};
use crate::wallet::{WalletApi, WalletHost, WalletInfo};

const MOCK_ICON: &str = "data:image/png;base64,iVBORw0KGgo=";

// ---------------------------------------------------------------------------
// Network parameters
// ---------------------------------------------------------------------------

/// Mainnet-like protocol parameters with a fetch counter.
pub struct MockParams {
    params: Mutex<ProtocolParameters>,
    calls: AtomicUsize,
}

impl MockParams {
    pub fn new(params: ProtocolParameters) -> Self {
        Self {
            params: Mutex::new(params),
            calls: AtomicUsize::new(0),
        }
    }

    /// Parameters as they are right now, without counting a fetch.
    pub fn current(&self) -> ProtocolParameters {
        self.params.lock().clone()
    }

    pub fn set(&self, params: ProtocolParameters) {
        *self.params.lock() = params;
    }

    /// Number of `protocol_parameters` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockParams {
    fn default() -> Self {
        Self::new(ProtocolParameters {
            min_fee_a: 44,
            min_fee_b: 155_381,
            max_tx_size: 16_384,
            price_mem: Ratio::new(577, 10_000),
            price_step: Ratio::new(721, 10_000_000),
            coins_per_utxo_byte: 4_310,
            collateral_percent: 150,
            cost_models: BTreeMap::from([
                ("PlutusV2".to_string(), vec![100_788, 420, 1, 1]),
                ("PlutusV3".to_string(), vec![100_788, 420, 1, 1, 1_000]),
            ]),
        })
    }
}

#[async_trait]
impl ParameterSource for MockParams {
    async fn protocol_parameters(&self) -> Result<ProtocolParameters> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.current())
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// A wallet holding one deterministic key and a scripted set of outputs.
///
/// Signing is real: the returned witness verifies against the body hash.
/// Submission returns the transaction id unless rejections are scripted.
pub struct MockWallet {
    keypair: PaymentKeypair,
    address: Address,
    utxos: Mutex<Vec<Utxo>>,
    funded: AtomicUsize,
    calls: AtomicUsize,
    sign_requests: Mutex<Vec<bool>>,
    decline_signing: AtomicBool,
    rejection: Mutex<Option<String>>,
    submit_attempts: AtomicUsize,
    submitted: Mutex<Vec<Vec<u8>>>,
}

impl MockWallet {
    /// Wallet whose key is derived from a seed filled with `seed`.
    pub fn with_seed(seed: u8) -> Self {
        let keypair = PaymentKeypair::from_seed(&[seed; 32]);
        let address = Address::enterprise_key(Network::Testnet, &keypair.key_hash());
        Self {
            keypair,
            address,
            utxos: Mutex::new(Vec::new()),
            funded: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            sign_requests: Mutex::new(Vec::new()),
            decline_signing: AtomicBool::new(false),
            rejection: Mutex::new(None),
            submit_attempts: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn key_hash_hex(&self) -> String {
        self.keypair.key_hash_hex()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    fn bech32(&self) -> String {
        // Enterprise addresses built from a 28-byte hash always encode.
        self.address.to_bech32().unwrap_or_else(|_| self.address.to_hex())
    }

    /// A pure-ADA output at this wallet's address with transaction hash
    /// `[byte; 32]`. Not added to the wallet.
    pub fn make_utxo(&self, byte: u8, lovelace: u64) -> Utxo {
        Utxo {
            tx_hash: hex::encode([byte; 32]),
            output_index: 0,
            address: self.bech32(),
            assets: AssetBundle::from_lovelace(lovelace),
            inline_datum: None,
        }
    }

    pub fn add_utxo(&self, utxo: Utxo) {
        self.utxos.lock().push(utxo);
    }

    /// Adds one pure-ADA output per amount, each with a fresh hash.
    pub fn fund(&self, amounts: &[u64]) {
        for &lovelace in amounts {
            let n = self.funded.fetch_add(1, Ordering::SeqCst) as u64;
            let mut preimage = self.keypair.key_hash().to_vec();
            preimage.extend_from_slice(&n.to_be_bytes());
            self.add_utxo(Utxo {
                tx_hash: hex::encode(blake2b_256(&preimage)),
                output_index: n as u32 % 4,
                address: self.bech32(),
                assets: AssetBundle::from_lovelace(lovelace),
                inline_datum: None,
            });
        }
    }

    /// Current outputs, without counting a wallet call.
    pub fn utxo_snapshot(&self) -> Vec<Utxo> {
        self.utxos.lock().clone()
    }

    /// Number of capability calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The `partial` flag of every signing request, in order.
    pub fn sign_requests(&self) -> Vec<bool> {
        self.sign_requests.lock().clone()
    }

    /// Makes every later signing request fail as if the user declined.
    pub fn decline_signing(&self) {
        self.decline_signing.store(true, Ordering::SeqCst);
    }

    /// Makes every later submission fail with `message`.
    pub fn reject_submissions(&self, message: impl Into<String>) {
        *self.rejection.lock() = Some(message.into());
    }

    pub fn submit_attempts(&self) -> usize {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    /// Transactions accepted so far, as CBOR.
    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.submitted.lock().clone()
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletApi for MockWallet {
    async fn get_change_address(&self) -> Result<String> {
        self.touch();
        Ok(self.address.to_hex())
    }

    async fn get_utxos(&self) -> Result<Vec<Utxo>> {
        self.touch();
        Ok(self.utxo_snapshot())
    }

    async fn get_balance(&self) -> Result<AssetBundle> {
        self.touch();
        let mut total = AssetBundle::new();
        for utxo in self.utxos.lock().iter() {
            total.merge(&utxo.assets)?;
        }
        Ok(total)
    }

    async fn sign_tx(&self, tx_hex: &str, partial: bool) -> Result<String> {
        self.touch();
        self.sign_requests.lock().push(partial);
        if self.decline_signing.load(Ordering::SeqCst) {
            return Err(GovernanceError::Wallet("user declined to sign".into()));
        }
        let tx_id = tx_id_of(&hex::decode(tx_hex)?)?;
        let witnesses = WitnessSet {
            vkeys: vec![(
                self.keypair.public_key_bytes().to_vec(),
                self.keypair.sign(&tx_id).to_vec(),
            )],
            ..WitnessSet::default()
        };
        Ok(hex::encode(encode_value(&witnesses.to_cbor_value()?)?))
    }

    async fn submit_tx(&self, tx_hex: &str) -> Result<String> {
        self.touch();
        self.submit_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.rejection.lock().clone() {
            return Err(GovernanceError::Submission {
                trace: TraceCode::recognize(&message),
                message,
            });
        }
        let tx = hex::decode(tx_hex)?;
        let id = hex::encode(tx_id_of(&tx)?);
        self.submitted.lock().push(tx);
        Ok(id)
    }
}

/// A host with installable, lockable wallets.
#[derive(Default)]
pub struct MockWalletHost {
    wallets: Mutex<BTreeMap<String, Arc<MockWallet>>>,
    locked: Mutex<Vec<String>>,
    enable_calls: Mutex<HashMap<String, usize>>,
}

impl MockWalletHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, name: &str, wallet: Arc<MockWallet>) {
        self.wallets.lock().insert(name.to_string(), wallet);
    }

    /// Makes `enable(name)` fail as a locked extension would.
    pub fn lock(&self, name: &str) {
        self.locked.lock().push(name.to_string());
    }

    pub fn enable_calls(&self, name: &str) -> usize {
        self.enable_calls.lock().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl WalletHost for MockWalletHost {
    fn injected(&self) -> Vec<WalletInfo> {
        self.wallets
            .lock()
            .keys()
            .map(|name| WalletInfo {
                name: name.clone(),
                icon: MOCK_ICON.to_string(),
            })
            .collect()
    }

    async fn enable(&self, name: &str) -> Result<Arc<dyn WalletApi>> {
        *self.enable_calls.lock().entry(name.to_string()).or_insert(0) += 1;
        if self.locked.lock().iter().any(|l| l == name) {
            return Err(GovernanceError::WalletUnavailable {
                wallet: name.to_string(),
                reason: "wallet is locked".into(),
            });
        }
        match self.wallets.lock().get(name) {
            Some(wallet) => Ok(wallet.clone() as Arc<dyn WalletApi>),
            None => Err(GovernanceError::WalletUnavailable {
                wallet: name.to_string(),
                reason: "not installed".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Address-indexed outputs and a submission log.
#[derive(Default)]
pub struct MockChain {
    utxos: Mutex<Vec<Utxo>>,
    submitted: Mutex<Vec<Vec<u8>>>,
}

impl MockChain {
    pub fn add_utxo(&self, utxo: Utxo) {
        self.utxos.lock().push(utxo);
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl ChainProvider for MockChain {
    async fn address_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        Ok(self
            .utxos
            .lock()
            .iter()
            .filter(|u| u.address == address)
            .cloned()
            .collect())
    }

    async fn submit_tx(&self, tx_cbor: &[u8]) -> Result<String> {
        let id = tx_id_of(tx_cbor)?;
        self.submitted.lock().push(tx_cbor.to_vec());
        Ok(hex::encode(id))
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Scripted governance backend.
///
/// `fetch_status` first drains the per-proposal response queue, then serves
/// the stored record. [`change_at`](Self::change_at) swaps the stored record
/// once a given call number is reached, which is how tests make
/// authoritative state move mid-poll.
pub struct MockBackend {
    records: Mutex<HashMap<String, Proposal>>,
    queued: Mutex<HashMap<String, VecDeque<Result<Proposal>>>>,
    scheduled: Mutex<HashMap<String, Vec<(usize, Proposal)>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    utxos: Mutex<HashMap<String, Vec<MatchingUtxo>>>,
    verdict: Mutex<ValidationVerdict>,
    validations: Mutex<Vec<ValidateGovTxRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(HashMap::new()),
            status_calls: Mutex::new(HashMap::new()),
            utxos: Mutex::new(HashMap::new()),
            verdict: Mutex::new(ValidationVerdict { valid: true, reason: None }),
            validations: Mutex::new(Vec::new()),
        }
    }

    /// Stores `proposal` as the authoritative record for its id.
    pub fn insert(&self, proposal: Proposal) {
        self.records.lock().insert(proposal.id.clone(), proposal);
    }

    /// Serves `response` for the next status fetch of `proposal_id`.
    pub fn push_status(&self, proposal_id: &str, response: Result<Proposal>) {
        self.queued
            .lock()
            .entry(proposal_id.to_string())
            .or_default()
            .push_back(response);
    }

    /// From status call number `call` (1-based) onward, serves `proposal`.
    pub fn change_at(&self, call: usize, proposal: Proposal) {
        self.scheduled
            .lock()
            .entry(proposal.id.clone())
            .or_default()
            .push((call, proposal));
    }

    pub fn status_calls(&self, proposal_id: &str) -> usize {
        self.status_calls.lock().get(proposal_id).copied().unwrap_or(0)
    }

    pub fn set_utxos(&self, proposal_id: &str, utxos: Vec<MatchingUtxo>) {
        self.utxos.lock().insert(proposal_id.to_string(), utxos);
    }

    pub fn set_verdict(&self, verdict: ValidationVerdict) {
        *self.verdict.lock() = verdict;
    }

    /// Every validation request received, in order.
    pub fn validations(&self) -> Vec<ValidateGovTxRequest> {
        self.validations.lock().clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GovernanceBackend for MockBackend {
    async fn fetch_status(&self, proposal_id: &str) -> Result<Proposal> {
        let call = {
            let mut calls = self.status_calls.lock();
            let n = calls.entry(proposal_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        if let Some(response) = self.queued.lock().get_mut(proposal_id).and_then(VecDeque::pop_front) {
            return response;
        }

        if let Some(due) = self.scheduled.lock().get_mut(proposal_id) {
            let (ready, pending): (Vec<_>, Vec<_>) = due.drain(..).partition(|(at, _)| *at <= call);
            *due = pending;
            if let Some((_, proposal)) = ready.into_iter().last() {
                self.insert(proposal);
            }
        }

        self.records
            .lock()
            .get(proposal_id)
            .cloned()
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {}", proposal_id)))
    }

    async fn fetch_utxos(&self, proposal_id: &str) -> Result<Vec<MatchingUtxo>> {
        Ok(self.utxos.lock().get(proposal_id).cloned().unwrap_or_default())
    }

    async fn validate_gov_tx(&self, request: &ValidateGovTxRequest) -> Result<ValidationVerdict> {
        self.validations.lock().push(request.clone());
        Ok(self.verdict.lock().clone())
    }
}
