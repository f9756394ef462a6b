//! # Wallet Gateway
//!
//! The one place the rest of the crate talks to wallets through. It filters
//! what the host injects down to the wallets we support, enables each one at
//! most once per session (every `enable` can pop a permission prompt, and
//! nobody wants to approve the same site five times), and turns raw wallet
//! answers into what governance cares about: a native balance, a governance
//! token balance and a payment key hash.
//!
//! Enabled handles are shared. Nothing here takes an exclusive lock on a
//! wallet; the ledger arbitrates competing spends of the same output.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::api::{WalletApi, WalletHost, WalletInfo};
use crate::address::Address;
use crate::config::{GovernanceConfig, NATIVE_DECIMALS};
use crate::error::{GovernanceError, Result};
use crate::transaction::Transaction;

/// An enabled wallet, cheap to clone.
#[derive(Clone)]
pub struct WalletHandle {
    name: String,
    api: Arc<dyn WalletApi>,
}

impl WalletHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api(&self) -> Arc<dyn WalletApi> {
        self.api.clone()
    }
}

impl std::fmt::Debug for WalletHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletHandle").field("name", &self.name).finish()
    }
}

/// Balance split the way governance reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    /// Lovelace.
    pub native: u64,
    /// Sum of every asset under the governance token policy.
    pub token: u64,
}

/// Outcome of a dry-run fee estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub is_enough: bool,
    /// Native balance of the wallet.
    pub balance: u64,
    /// What the action itself needs, fee excluded.
    pub required: u64,
    pub estimated_fee: u64,
}

/// One row of the wallet picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSummary {
    pub name: String,
    pub icon: String,
    pub native_balance: u64,
    pub token_balance: u64,
    pub native_display: String,
    pub token_display: String,
    pub enabled: bool,
    pub is_login_wallet: bool,
    /// Set when the wallet could not be read; balances are zero then.
    pub error: Option<String>,
}

/// Renders a raw amount with `decimals` fractional digits.
pub fn format_units(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    // Split the digit string; 10^decimals overflows u64 past 19 places.
    let places = usize::from(decimals);
    let digits = format!("{:0>width$}", amount, width = places + 1);
    let (whole, fraction) = digits.split_at(digits.len() - places);
    format!("{}.{}", whole, fraction)
}

/// Session-scoped access to the host's wallets.
pub struct WalletGateway {
    host: Arc<dyn WalletHost>,
    config: Arc<GovernanceConfig>,
    enabled: Mutex<HashMap<String, WalletHandle>>,
}

impl WalletGateway {
    pub fn new(host: Arc<dyn WalletHost>, config: Arc<GovernanceConfig>) -> Self {
        Self {
            host,
            config,
            enabled: Mutex::new(HashMap::new()),
        }
    }

    /// Injected wallets that are on the allow-list.
    pub fn enumerate(&self) -> Vec<WalletInfo> {
        self.host
            .injected()
            .into_iter()
            .filter(|w| self.config.wallet_allowed(&w.name))
            .collect()
    }

    /// Whether `name` has already been enabled this session.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.lock().contains_key(&name.to_ascii_lowercase())
    }

    /// Enables `name`, reusing the session's handle when there is one.
    pub async fn enable(&self, name: &str) -> Result<WalletHandle> {
        let key = name.to_ascii_lowercase();
        if let Some(handle) = self.enabled.lock().get(&key) {
            return Ok(handle.clone());
        }

        if !self.config.wallet_allowed(name) {
            return Err(GovernanceError::WalletUnavailable {
                wallet: name.to_string(),
                reason: "wallet is not supported".to_string(),
            });
        }
        if !self.host.injected().iter().any(|w| w.name.eq_ignore_ascii_case(name)) {
            return Err(GovernanceError::WalletUnavailable {
                wallet: name.to_string(),
                reason: "wallet is not installed".to_string(),
            });
        }

        // The lock is not held across the prompt.
        let api = self.host.enable(name).await.map_err(|e| match e {
            unavailable @ GovernanceError::WalletUnavailable { .. } => unavailable,
            other => GovernanceError::WalletUnavailable {
                wallet: name.to_string(),
                reason: other.to_string(),
            },
        })?;

        let handle = WalletHandle { name: key.clone(), api };
        let handle = self.enabled.lock().entry(key).or_insert(handle).clone();
        info!(wallet = %handle.name, "wallet enabled");
        Ok(handle)
    }

    /// Native and governance token balance. A wallet without any token under
    /// the governance policy has a token balance of zero.
    pub async fn get_balance(&self, handle: &WalletHandle) -> Result<WalletBalance> {
        let assets = handle.api.get_balance().await?;
        Ok(WalletBalance {
            native: assets.lovelace(),
            token: assets.policy_total(&self.config.token_policy_id),
        })
    }

    /// Payment key hash of the wallet's change address.
    pub async fn get_pub_key_hash(&self, handle: &WalletHandle) -> Result<String> {
        let raw = handle.api.get_change_address().await?;
        let address = Address::parse(&raw)
            .map_err(|e| GovernanceError::Wallet(format!("wallet returned a bad change address: {}", e)))?;
        address.payment_key_hash()
    }

    /// Builds a throwaway transaction with `build` to learn its fee, and
    /// checks the wallet can pay `required` on top. The transaction is
    /// dropped; nothing is signed or submitted.
    pub async fn estimate_fee_sufficiency<F, Fut>(
        &self,
        handle: &WalletHandle,
        required: u64,
        build: F,
    ) -> Result<FeeEstimate>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Transaction>>,
    {
        let balance = self.get_balance(handle).await?.native;
        let estimated_fee = match build().await {
            Ok(tx) => tx.fee(),
            Err(GovernanceError::InsufficientFunds { .. }) => {
                return Ok(FeeEstimate {
                    is_enough: false,
                    balance,
                    required,
                    estimated_fee: 0,
                })
            }
            Err(other) => return Err(other),
        };
        let is_enough = balance >= required.saturating_add(estimated_fee);
        debug!(wallet = %handle.name, balance, required, estimated_fee, is_enough, "fee estimate");
        Ok(FeeEstimate {
            is_enough,
            balance,
            required,
            estimated_fee,
        })
    }

    /// One summary per allowed wallet. A wallet that fails to enable or
    /// report turns into an error row; the rest of the list is unaffected.
    pub async fn summaries(&self, login_wallet: Option<&str>) -> Vec<WalletSummary> {
        let wallets = self.enumerate();
        join_all(wallets.into_iter().map(|info| self.summarize(info, login_wallet))).await
    }

    async fn summarize(&self, info: WalletInfo, login_wallet: Option<&str>) -> WalletSummary {
        let is_login_wallet = login_wallet.is_some_and(|l| l.eq_ignore_ascii_case(&info.name));
        let result = async {
            let handle = self.enable(&info.name).await?;
            self.get_balance(&handle).await
        }
        .await;

        let (balance, error) = match result {
            Ok(balance) => (balance, None),
            Err(e) => {
                warn!(wallet = %info.name, error = %e, "wallet summary degraded");
                (WalletBalance::default(), Some(e.to_string()))
            }
        };

        WalletSummary {
            enabled: self.is_enabled(&info.name),
            native_balance: balance.native,
            token_balance: balance.token,
            native_display: format!("{} ADA", format_units(balance.native, NATIVE_DECIMALS)),
            token_display: format_units(balance.token, self.config.token_decimals),
            name: info.name,
            icon: info.icon,
            is_login_wallet,
            error,
        }
    }
}
