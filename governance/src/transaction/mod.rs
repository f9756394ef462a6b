//! Transaction construction: network parameters, the ledger CBOR model and
//! the governance transaction builder.

pub mod body;
pub mod builder;
pub mod params;

pub use body::{merge_vkey_witnesses, tx_id_of, Transaction, TxBody, TxInput, TxOutput, WitnessSet};
pub use builder::{GovTxBuilder, ValidatorScript};
pub use params::{ParameterSource, ProtocolParameters, Ratio};
