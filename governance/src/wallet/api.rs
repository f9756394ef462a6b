//! Wallet capability port.
//!
//! Mirrors the capability object a browser wallet injects once enabled. All
//! binary payloads cross the port as hex. Every call may block on the user
//! (unlock, approve), so none of them has a timeout here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::proposal::{AssetBundle, Utxo};

/// Capabilities of an enabled wallet.
#[async_trait]
pub trait WalletApi: Send + Sync {
    /// Hex address bytes where change should go. Its payment credential is
    /// the wallet's signing key hash.
    async fn get_change_address(&self) -> Result<String>;

    /// Spendable outputs the wallet controls.
    async fn get_utxos(&self) -> Result<Vec<Utxo>>;

    /// Sum of everything the wallet controls.
    async fn get_balance(&self) -> Result<AssetBundle>;

    /// Signs `tx_hex`. With `partial = true` the wallet returns only the
    /// witness set it produced, as hex CBOR, and does not require that it can
    /// witness every input.
    async fn sign_tx(&self, tx_hex: &str, partial: bool) -> Result<String>;

    /// Hands a fully witnessed transaction to the network. Returns its hash.
    async fn submit_tx(&self, tx_hex: &str) -> Result<String>;
}

/// Wallet advertised by the host before it is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    /// Identifier used to enable it (e.g. `eternl`).
    pub name: String,
    /// Icon URI or data URL.
    pub icon: String,
}

/// The environment wallets are injected into.
#[async_trait]
pub trait WalletHost: Send + Sync {
    /// Wallets currently present, allowed or not.
    fn injected(&self) -> Vec<WalletInfo>;

    /// Asks the named wallet for its capabilities. May prompt the user.
    async fn enable(&self, name: &str) -> Result<Arc<dyn WalletApi>>;
}
