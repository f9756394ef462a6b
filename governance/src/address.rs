//! # Shelley Addresses
//!
//! Just enough address handling for governance: parse what wallets and the
//! backend hand us (hex bytes or bech32), pull out the payment credential,
//! and derive the validator's script address.
//!
//! ## Header byte
//!
//! ```text
//! bits 7..4  address type   (0-3 base, 4-5 pointer, 6-7 enterprise)
//! bits 3..0  network id     (1 mainnet, 0 testnets)
//! ```
//!
//! Even types carry a key-hash payment credential, odd types a script hash.
//! The 28 credential bytes always sit right after the header.

use bech32::{Bech32, Hrp};
use std::fmt;

use crate::config::{Network, PlutusVersion, PKH_LENGTH};
use crate::crypto::blake2b_224;
use crate::error::{GovernanceError, Result};

const TYPE_ENTERPRISE_KEY: u8 = 0b0110;
const TYPE_ENTERPRISE_SCRIPT: u8 = 0b0111;

/// Payment half of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentCredential {
    /// Spending requires a signature from this key hash.
    Key([u8; PKH_LENGTH]),
    /// Spending runs this script.
    Script([u8; PKH_LENGTH]),
}

/// A decoded Shelley-era address.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    bytes: Vec<u8>,
}

impl Address {
    /// Parses a bech32 (`addr...`, `addr_test...`) or raw hex address.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let bytes = if input.starts_with("addr") {
            let (_, data) = bech32::decode(input)
                .map_err(|e| GovernanceError::Decoding(format!("bad bech32 address: {}", e)))?;
            data
        } else {
            hex::decode(input)?
        };
        Self::from_bytes(bytes)
    }

    /// Wraps raw address bytes after a structural check.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 1 + PKH_LENGTH {
            return Err(GovernanceError::Decoding(format!(
                "address too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] >> 4 > TYPE_ENTERPRISE_SCRIPT {
            return Err(GovernanceError::Decoding(format!(
                "unsupported address type {:#x}",
                bytes[0] >> 4
            )));
        }
        Ok(Self { bytes })
    }

    /// Enterprise address paying to a key hash (no staking part).
    pub fn enterprise_key(network: Network, key_hash: &[u8; PKH_LENGTH]) -> Self {
        Self::enterprise(TYPE_ENTERPRISE_KEY, network, key_hash)
    }

    /// Enterprise address locked by a script.
    pub fn enterprise_script(network: Network, script_hash: &[u8; PKH_LENGTH]) -> Self {
        Self::enterprise(TYPE_ENTERPRISE_SCRIPT, network, script_hash)
    }

    fn enterprise(kind: u8, network: Network, hash: &[u8; PKH_LENGTH]) -> Self {
        let mut bytes = Vec::with_capacity(1 + PKH_LENGTH);
        bytes.push((kind << 4) | network.id());
        bytes.extend_from_slice(hash);
        Self { bytes }
    }

    /// Raw address bytes, as they appear in transaction outputs.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Network encoded in the header.
    pub fn network(&self) -> Network {
        if self.bytes[0] & 0x0f == Network::Mainnet.id() {
            Network::Mainnet
        } else {
            Network::Testnet
        }
    }

    /// Bech32 rendering with the HRP matching the header's network.
    pub fn to_bech32(&self) -> Result<String> {
        let hrp = Hrp::parse(self.network().address_hrp())
            .map_err(|e| GovernanceError::Encoding(format!("bad hrp: {}", e)))?;
        bech32::encode::<Bech32>(hrp, &self.bytes)
            .map_err(|e| GovernanceError::Encoding(format!("bech32 encode failed: {}", e)))
    }

    /// The payment credential in the 28 bytes after the header.
    pub fn payment_credential(&self) -> PaymentCredential {
        let mut hash = [0u8; PKH_LENGTH];
        hash.copy_from_slice(&self.bytes[1..1 + PKH_LENGTH]);
        if (self.bytes[0] >> 4) & 1 == 0 {
            PaymentCredential::Key(hash)
        } else {
            PaymentCredential::Script(hash)
        }
    }

    /// Hex payment key hash. Fails for script-locked addresses, which have
    /// no key to sign with.
    pub fn payment_key_hash(&self) -> Result<String> {
        match self.payment_credential() {
            PaymentCredential::Key(hash) => Ok(hex::encode(hash)),
            PaymentCredential::Script(_) => Err(GovernanceError::Validation(
                "address is script-locked, it has no payment key hash".to_string(),
            )),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bech32() {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str(&self.to_hex()),
        }
    }
}

/// Hash of a Plutus script: `blake2b_224(language_tag || script_bytes)`.
pub fn script_hash(script: &[u8], version: PlutusVersion) -> [u8; PKH_LENGTH] {
    let mut tagged = Vec::with_capacity(script.len() + 1);
    tagged.push(version.script_tag());
    tagged.extend_from_slice(script);
    blake2b_224(&tagged)
}
