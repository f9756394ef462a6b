//! Wallets: the capability port, the session gateway and a local key wallet.

pub mod api;
pub mod gateway;
pub mod key_wallet;

pub use api::{WalletApi, WalletHost, WalletInfo};
pub use gateway::{format_units, FeeEstimate, WalletBalance, WalletGateway, WalletHandle, WalletSummary};
pub use key_wallet::{KeyWallet, LocalWalletHost};
