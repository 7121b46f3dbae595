//! Common types for RenVM operations
//!
//! Network identifiers, transaction status, selectors and the byte/text helpers
//! shared by the codec, the hash functions and the session engine.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RenVmError, Result};

// ============================================================================
// Network
// ============================================================================

/// RenVM network a session runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl Network {
    /// Get the network as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Devnet => "devnet",
        }
    }

    /// Whether UTXO chains should use their testnet parameters
    pub fn is_testnet(&self) -> bool {
        !matches!(self, Network::Mainnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = RenVmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "devnet" => Ok(Network::Devnet),
            other => Err(RenVmError::Config(format!("unknown network: {}", other))),
        }
    }
}

// ============================================================================
// Transaction status
// ============================================================================

/// Status of a RenVM transaction as reported by `ren_queryTx`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Nil,
    Confirming,
    Pending,
    Executing,
    Done,
    Reverted,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Nil => "nil",
            TxStatus::Confirming => "confirming",
            TxStatus::Pending => "pending",
            TxStatus::Executing => "executing",
            TxStatus::Done => "done",
            TxStatus::Reverted => "reverted",
        }
    }

    /// `done` and `reverted` never change again
    pub fn is_final(&self) -> bool {
        matches!(self, TxStatus::Done | TxStatus::Reverted)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = RenVmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nil" => Ok(TxStatus::Nil),
            "confirming" => Ok(TxStatus::Confirming),
            "pending" => Ok(TxStatus::Pending),
            "executing" => Ok(TxStatus::Executing),
            "done" => Ok(TxStatus::Done),
            "reverted" => Ok(TxStatus::Reverted),
            other => Err(RenVmError::decode("txStatus", format!("unknown status {}", other))),
        }
    }
}

// ============================================================================
// Selector
// ============================================================================

/// Asset and direction of a RenVM transaction, e.g. `BTC/toEthereum`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector(pub String);

impl Selector {
    /// Lock on the asset's home chain, mint on `to_chain`
    pub fn mint(asset: &str, to_chain: &str) -> Self {
        Selector(format!("{}/to{}", asset, to_chain))
    }

    /// Burn on `from_chain`, release on the asset's home chain
    pub fn release(asset: &str, from_chain: &str) -> Self {
        Selector(format!("{}/from{}", asset, from_chain))
    }

    /// Burn on one host chain and mint on another
    pub fn burn_and_mint(asset: &str, from_chain: &str, to_chain: &str) -> Self {
        Selector(format!("{}/from{}_to{}", asset, from_chain, to_chain))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Asset symbol before the slash
    pub fn asset(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// Form used for the selector hash: everything from the slash up to the
    /// last `To` collapses to `/to`, so `BTC/fromEthereumToSolana` becomes `BTC/toSolana`.
    pub fn normalized(&self) -> String {
        let Some(slash) = self.0.find('/') else {
            return self.0.clone();
        };
        match self.0[slash..].rfind("To") {
            Some(offset) => {
                let rest = &self.0[slash + offset + 2..];
                format!("{}/to{}", &self.0[..slash], rest)
            }
            None => self.0.clone(),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        Selector(s.to_string())
    }
}

// ============================================================================
// EVM address (mint authority)
// ============================================================================

/// EVM address (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvmAddress(pub [u8; 20]);

impl EvmAddress {
    /// Create from hex string (with or without 0x prefix)
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_hex(hex)?;
        let inner: [u8; 20] = bytes.as_slice().try_into().map_err(|_| {
            RenVmError::InvalidAddress {
                address: hex.to_string(),
                reason: format!("expected 20 bytes, got {}", bytes.len()),
            }
        })?;
        Ok(EvmAddress(inner))
    }

    /// Lowercase hex with 0x prefix
    pub fn as_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

// ============================================================================
// Byte helpers
// ============================================================================

/// Decode hex with or without a 0x prefix
pub fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(stripped).map_err(|e| RenVmError::decode("hex", format!("{}: {}", value, e)))
}

/// Hex with 0x prefix
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// URL-safe base64 without padding, the byte encoding RenVM uses on the wire
pub fn to_url_base64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Inverse of [`to_url_base64`]; trailing padding from older nodes is tolerated
pub fn from_url_base64(value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| RenVmError::decode("base64", format!("{}: {}", value, e)))
}

/// Copy a slice into a fixed 32-byte array
pub fn to_bytes32(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| RenVmError::decode("bytes32", format!("expected 32 bytes, got {}", bytes.len())))
}

/// Left-pad to 32 bytes; longer inputs keep their last 32 bytes
pub fn pad_bytes32(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    if bytes.len() >= 32 {
        out.copy_from_slice(&bytes[bytes.len() - 32..]);
    } else {
        out[32 - bytes.len()..].copy_from_slice(bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_constructors() {
        assert_eq!(Selector::mint("BTC", "Ethereum").as_str(), "BTC/toEthereum");
        assert_eq!(Selector::release("BTC", "Ethereum").as_str(), "BTC/fromEthereum");
        assert_eq!(
            Selector::burn_and_mint("BTC", "Ethereum", "Solana").as_str(),
            "BTC/fromEthereum_toSolana"
        );
        assert_eq!(Selector::mint("ZEC", "Ethereum").asset(), "ZEC");
    }

    #[test]
    fn test_selector_normalization() {
        assert_eq!(Selector::from("BTC/toEthereum").normalized(), "BTC/toEthereum");
        assert_eq!(
            Selector::from("BTC/fromEthereum_toSolana").normalized(),
            "BTC/fromEthereum_toSolana"
        );
        assert_eq!(
            Selector::from("BTC/fromEthereumToSolana").normalized(),
            "BTC/toSolana"
        );
        assert_eq!(Selector::from("BTC/fromEthereum").normalized(), "BTC/fromEthereum");
    }

    #[test]
    fn test_url_base64_roundtrip() {
        let bytes = vec![0xfb, 0xff, 0x00, 0x3e];
        let encoded = to_url_base64(&bytes);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
        assert_eq!(from_url_base64(&encoded).unwrap(), bytes);
        assert_eq!(from_url_base64("-_8A").unwrap(), vec![0xfb, 0xff, 0x00]);
    }

    #[test]
    fn test_url_base64_rejects_standard_alphabet() {
        assert!(from_url_base64("+/8A").is_err());
    }

    #[test]
    fn test_pad_bytes32() {
        let padded = pad_bytes32(&[0xaa; 20]);
        assert_eq!(&padded[..12], &[0u8; 12]);
        assert_eq!(&padded[12..], &[0xaa; 20]);
    }

    #[test]
    fn test_tx_status_parse() {
        assert_eq!("done".parse::<TxStatus>().unwrap(), TxStatus::Done);
        assert!(TxStatus::Reverted.is_final());
        assert!(!TxStatus::Executing.is_final());
        assert!("bogus".parse::<TxStatus>().is_err());
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("Testnet".parse::<Network>().unwrap(), Network::Testnet);
        assert!(Network::Devnet.is_testnet());
        assert!(!Network::Mainnet.is_testnet());
    }

    #[test]
    fn test_evm_address_hex() {
        let addr = EvmAddress::from_hex("0x04084f1cACCB87Dcab9a29a084281294dA96Bf44").unwrap();
        assert_eq!(addr.as_hex(), "0x04084f1caccb87dcab9a29a084281294da96bf44");
        assert!(EvmAddress::from_hex("0x1234").is_err());
    }
}
