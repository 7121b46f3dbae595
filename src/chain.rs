//! Chain capability traits consumed by the session engine
//!
//! A session holds one [`LockChain`] (where deposits are made, e.g. Bitcoin) and one
//! [`MintChain`] (where the representative asset lives, e.g. an EVM chain). Both are
//! chosen when the session is built and stored as trait objects. Adapters work in
//! `eyre::Result`; the engine folds failures into [`crate::RenVmError::Chain`].

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::U256;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::address::AddressFamily;
use crate::hash::encode_payload;
use crate::signature::Signature;

/// A deposit observed at a gateway address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockDeposit {
    /// Chain-native transaction id
    pub tx_hash: String,
    /// Transaction id bytes as RenVM expects them in `txid`
    #[serde(with = "hex::serde")]
    pub txid: Vec<u8>,
    /// Output index
    pub txindex: u32,
    /// Amount in the asset's smallest unit
    pub amount: U256,
    /// Raw chain payload, kept for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl LockDeposit {
    /// Session-map key, one per output: `{tx_hash}_{txindex}`
    pub fn id(&self) -> String {
        format!("{}_{}", self.tx_hash, self.txindex)
    }
}

/// Where discovered deposits are sent
pub type DepositSender = mpsc::UnboundedSender<LockDeposit>;

/// A chain assets are locked on and released from
#[async_trait]
pub trait LockChain: Send + Sync {
    /// Chain name as RenVM spells it, e.g. `Bitcoin`
    fn name(&self) -> &str;

    /// Address parameters for gateway derivation
    fn address_family(&self) -> AddressFamily;

    fn is_testnet(&self) -> bool;

    /// Scan `address` once, sending every deposit found (including ones sent before)
    async fn get_deposits(&self, address: &str, on_deposit: &DepositSender) -> Result<()>;

    /// `(current, target)` confirmations of a deposit
    async fn get_confirmations(&self, deposit: &LockDeposit) -> Result<(u64, u64)>;

    /// Transaction id bytes RenVM uses for a chain-native transaction hash
    fn tx_id_bytes(&self, tx_hash: &str) -> Result<Vec<u8>>;

    fn address_is_valid(&self, address: &str) -> bool;

    fn asset_decimals(&self, asset: &str) -> u8;
}

/// A call made on the mint chain with the mint appended
///
/// `signature` is the full Solidity signature including the three trailing
/// parameters the gateway appends: `(uint256 amount, bytes32 nHash, bytes sig)`.
/// `args` are the user's leading arguments; they form the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub to: String,
    pub signature: String,
    pub args: Vec<CallArg>,
}

/// One ABI argument in text form, e.g. `{kind: "address", value: "0x..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArg {
    pub kind: String,
    pub value: String,
}

impl CallArg {
    pub fn new(kind: &str, value: &str) -> Self {
        Self {
            kind: kind.to_string(),
            value: value.to_string(),
        }
    }

    pub fn to_sol_value(&self) -> Result<DynSolValue> {
        let ty = DynSolType::parse(&self.kind)
            .map_err(|e| eyre!("Invalid ABI type {}: {}", self.kind, e))?;
        ty.coerce_str(&self.value)
            .map_err(|e| eyre!("Invalid {} value {}: {}", self.kind, self.value, e))
    }
}

impl ContractCall {
    pub fn args_as_sol(&self) -> Result<Vec<DynSolValue>> {
        self.args.iter().map(CallArg::to_sol_value).collect()
    }

    /// ABI-encoded user arguments, the preimage of pHash
    pub fn payload(&self) -> Result<Vec<u8>> {
        let values = self
            .args_as_sol()
            .wrap_err_with(|| format!("Invalid arguments for {}", self.signature))?;
        Ok(encode_payload(&values))
    }
}

/// Everything the mint chain needs to execute a signed mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintSubmission {
    pub asset: String,
    /// Recipient, used when there are no contract calls
    pub to: String,
    pub amount: U256,
    pub phash: [u8; 32],
    pub nhash: [u8; 32],
    pub sighash: [u8; 32],
    pub signature: Signature,
}

/// A burn made on the mint chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnDetails {
    pub tx_hash: String,
    /// Release address on the lock chain
    pub to: String,
    pub amount: U256,
    /// Gateway burn counter
    pub nonce: U256,
}

/// A chain the representative asset is minted on and burned from
#[async_trait]
pub trait MintChain: Send + Sync {
    fn name(&self) -> &str;

    /// Gateway contract handling `asset`
    async fn resolve_gateway_contract(&self, asset: &str) -> Result<String>;

    /// Bytes of a recipient address as they enter gHash and sighash
    fn address_to_bytes(&self, address: &str) -> Result<Vec<u8>>;

    fn address_is_valid(&self, address: &str) -> bool;

    /// Execute the mint, returning the destination transaction hash
    async fn submit_mint(&self, calls: &[ContractCall], mint: &MintSubmission) -> Result<String>;

    /// Transaction that already executed the mint for `sighash`, if any
    async fn find_mint(&self, asset: &str, sighash: &[u8; 32]) -> Result<Option<String>>;

    /// Burn `amount` with `to` as the release address
    async fn submit_burn(&self, asset: &str, to: &str, amount: U256) -> Result<BurnDetails>;

    /// `(current, target)` confirmations of a transaction on this chain
    async fn get_confirmations(&self, tx_hash: &str) -> Result<(u64, u64)>;

    fn asset_decimals(&self, asset: &str) -> u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::payload_hash_bytes;

    #[test]
    fn test_contract_call_payload() {
        let call = ContractCall {
            to: "0x0000000000000000000000000000000000000001".into(),
            signature: "mint(address,uint256,bytes32,bytes)".into(),
            args: vec![CallArg::new(
                "address",
                "0x04084f1cACCB87Dcab9a29a084281294dA96Bf44",
            )],
        };
        let payload = call.payload().unwrap();
        assert_eq!(payload.len(), 32);
        assert_eq!(
            hex::encode(&payload[12..]),
            "04084f1caccb87dcab9a29a084281294da96bf44"
        );
        assert_ne!(payload_hash_bytes(&payload), [0u8; 32]);
    }

    #[test]
    fn test_contract_call_rejects_bad_type() {
        let call = ContractCall {
            to: "0x01".into(),
            signature: "f()".into(),
            args: vec![CallArg::new("uint7x", "1")],
        };
        assert!(call.payload().is_err());
    }

    #[test]
    fn test_deposit_serializes_txid_as_hex() {
        let deposit = LockDeposit {
            tx_hash: "ab".into(),
            txid: vec![0xab],
            txindex: 0,
            amount: U256::from(5),
            raw: None,
        };
        let json = serde_json::to_value(&deposit).unwrap();
        assert_eq!(json["txid"], "ab");
        assert_eq!(json["txHash"], "ab");
        let back: LockDeposit = serde_json::from_value(json).unwrap();
        assert_eq!(back, deposit);
    }
}
