//! Signing and submission.
//!
//! The wallet is always asked for a *detached* witness set (`partial =
//! true`), never a fully signed blob. We merge its witnesses into our own
//! serialization, which keeps the body and auxiliary data exactly as built.
//!
//! Submission is a single attempt. If the network says no, the caller gets
//! the raw message (plus a recognised trace code when there is one) and
//! decides what to do. Resending the same transaction could try to spend the
//! same output twice, and that decision does not belong down here.

use tracing::{info, warn};

use crate::error::{GovernanceError, Result, TraceCode};
use crate::transaction::{merge_vkey_witnesses, Transaction};
use crate::wallet::WalletHandle;

/// A transaction with the wallet's witnesses merged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub id: String,
    pub cbor: Vec<u8>,
}

impl SignedTx {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.cbor)
    }
}

/// Signs through a wallet and submits.
#[derive(Debug, Default, Clone, Copy)]
pub struct SigningSubmitter;

impl SigningSubmitter {
    pub fn new() -> Self {
        Self
    }

    /// Requests a detached witness set for `tx` and merges it.
    pub async fn sign(&self, tx: &Transaction, handle: &WalletHandle) -> Result<SignedTx> {
        let unsigned = tx.to_cbor()?;
        let id = tx.id()?;

        let witness_hex = handle
            .api()
            .sign_tx(&hex::encode(&unsigned), true)
            .await
            .map_err(|e| match e {
                wallet @ GovernanceError::Wallet(_) => wallet,
                other => GovernanceError::Wallet(format!("signing failed: {}", other)),
            })?;
        let witness = hex::decode(witness_hex.trim())
            .map_err(|e| GovernanceError::Wallet(format!("wallet returned non-hex witnesses: {}", e)))?;

        let cbor = merge_vkey_witnesses(&unsigned, &witness)?;
        info!(tx_id = %id, wallet = handle.name(), "transaction signed");
        Ok(SignedTx { id, cbor })
    }

    /// Forwards `signed` to the network through the wallet. No retry.
    pub async fn submit(&self, signed: &SignedTx, handle: &WalletHandle) -> Result<String> {
        let hash = handle.api().submit_tx(&signed.to_hex()).await.map_err(|e| {
            let err = match e {
                submission @ GovernanceError::Submission { .. } => submission,
                other => {
                    let message = other.to_string();
                    GovernanceError::Submission {
                        trace: TraceCode::recognize(&message),
                        message,
                    }
                }
            };
            warn!(tx_id = %signed.id, error = %err, "submission rejected");
            err
        })?;

        if !hash.eq_ignore_ascii_case(&signed.id) {
            warn!(tx_id = %signed.id, reported = %hash, "wallet reported a different transaction hash");
        }
        info!(tx_hash = %hash, "transaction accepted by the network");
        Ok(hash)
    }

    /// [`sign`](Self::sign) then [`submit`](Self::submit).
    pub async fn sign_and_submit(&self, tx: &Transaction, handle: &WalletHandle) -> Result<String> {
        let signed = self.sign(tx, handle).await?;
        self.submit(&signed, handle).await
    }
}
