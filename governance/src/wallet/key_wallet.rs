//! A wallet backed by a single local Ed25519 payment key.
//!
//! Used by the command-line front end in place of a browser extension. It
//! pays from, and returns change to, the enterprise address of its key, and
//! reaches the chain through a [`ChainProvider`].

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::api::{WalletApi, WalletHost, WalletInfo};
use crate::address::Address;
use crate::backend::ChainProvider;
use crate::config::Network;
use crate::crypto::PaymentKeypair;
use crate::error::{GovernanceError, Result};
use crate::plutus::data::encode_value;
use crate::proposal::{AssetBundle, Utxo};
use crate::transaction::body::{tx_id_of, WitnessSet};

const LOCAL_ICON: &str = "data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg'/%3E";

/// Wallet capabilities over one payment key.
pub struct KeyWallet {
    keypair: PaymentKeypair,
    address: Address,
    chain: Arc<dyn ChainProvider>,
}

impl KeyWallet {
    pub fn new(keypair: PaymentKeypair, network: Network, chain: Arc<dyn ChainProvider>) -> Self {
        let address = Address::enterprise_key(network, &keypair.key_hash());
        Self { keypair, address, chain }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    fn bech32(&self) -> Result<String> {
        self.address.to_bech32()
    }
}

#[async_trait]
impl WalletApi for KeyWallet {
    async fn get_change_address(&self) -> Result<String> {
        Ok(self.address.to_hex())
    }

    async fn get_utxos(&self) -> Result<Vec<Utxo>> {
        self.chain.address_utxos(&self.bech32()?).await
    }

    async fn get_balance(&self) -> Result<AssetBundle> {
        let mut total = AssetBundle::new();
        for utxo in self.get_utxos().await? {
            total.merge(&utxo.assets)?;
        }
        Ok(total)
    }

    /// A single key can only ever produce one witness, so `partial` changes
    /// nothing here: the result is always the detached witness set.
    async fn sign_tx(&self, tx_hex: &str, partial: bool) -> Result<String> {
        let tx = hex::decode(tx_hex).map_err(|e| GovernanceError::Wallet(format!("tx is not hex: {}", e)))?;
        let tx_id = tx_id_of(&tx)?;
        let signature = self.keypair.sign(&tx_id);
        debug!(tx_id = %hex::encode(tx_id), partial, "signed transaction body");

        let witnesses = WitnessSet {
            vkeys: vec![(self.keypair.public_key_bytes().to_vec(), signature.to_vec())],
            ..WitnessSet::default()
        };
        Ok(hex::encode(encode_value(&witnesses.to_cbor_value()?)?))
    }

    async fn submit_tx(&self, tx_hex: &str) -> Result<String> {
        let tx = hex::decode(tx_hex).map_err(|e| GovernanceError::Wallet(format!("tx is not hex: {}", e)))?;
        let hash = self.chain.submit_tx(&tx).await?;
        info!(tx_hash = %hash, "transaction submitted");
        Ok(hash)
    }
}

/// Named key wallets presented as if a host had injected them.
#[derive(Default)]
pub struct LocalWalletHost {
    wallets: BTreeMap<String, Arc<KeyWallet>>,
}

impl LocalWalletHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, wallet: KeyWallet) {
        self.wallets.insert(name.into(), Arc::new(wallet));
    }
}

#[async_trait]
impl WalletHost for LocalWalletHost {
    fn injected(&self) -> Vec<WalletInfo> {
        self.wallets
            .keys()
            .map(|name| WalletInfo {
                name: name.clone(),
                icon: LOCAL_ICON.to_string(),
            })
            .collect()
    }

    async fn enable(&self, name: &str) -> Result<Arc<dyn WalletApi>> {
        match self.wallets.get(name) {
            Some(wallet) => Ok(wallet.clone() as Arc<dyn WalletApi>),
            None => Err(GovernanceError::WalletUnavailable {
                wallet: name.to_string(),
                reason: "no such local wallet".to_string(),
            }),
        }
    }
}
