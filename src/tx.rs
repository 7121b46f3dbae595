//! RenVM transaction construction and output decoding
//!
//! Builds the typed `in` values for mints, gateway registration and burns, computes
//! their transaction hash, and decodes the `out` value of completed transactions.

use alloy::primitives::U256;

use crate::error::{RenVmError, Result};
use crate::hash::{transaction_hash_b64, TX_VERSION};
use crate::pack::{typed_to_transport, PackType, PackValue, TypedValue};
use crate::rpc::methods::TransactionInput;
use crate::signature::Signature;
use crate::types::Selector;

// ============================================================================
// Schemas
// ============================================================================

/// Input of a lock-and-mint or burn-and-mint transaction
pub fn cross_chain_params_type() -> PackType {
    PackType::structure(&[
        ("txid", PackType::Bytes),
        ("txindex", PackType::U32),
        ("amount", PackType::U256),
        ("payload", PackType::Bytes),
        ("phash", PackType::Bytes32),
        ("to", PackType::Str),
        ("nonce", PackType::Bytes32),
        ("nhash", PackType::Bytes32),
        ("gpubkey", PackType::Bytes),
        ("ghash", PackType::Bytes32),
    ])
}

/// Gateway registration, submitted before any deposit is seen
pub fn submit_gateway_type() -> PackType {
    PackType::structure(&[
        ("payload", PackType::Bytes),
        ("phash", PackType::Bytes32),
        ("to", PackType::Str),
        ("nonce", PackType::Bytes32),
        ("nhash", PackType::Bytes32),
        ("gpubkey", PackType::Bytes),
        ("ghash", PackType::Bytes32),
    ])
}

pub fn burn_params_type() -> PackType {
    PackType::structure(&[
        ("amount", PackType::U256),
        ("to", PackType::Str),
        ("nonce", PackType::Bytes32),
    ])
}

/// `out` of a completed mint
pub fn mint_output_type() -> PackType {
    PackType::structure(&[
        ("amount", PackType::U256),
        ("hash", PackType::Bytes32),
        ("sighash", PackType::Bytes32),
        ("sig", PackType::Bytes65),
        ("txid", PackType::Bytes),
        ("txindex", PackType::U32),
        ("revert", PackType::Str),
    ])
}

// ============================================================================
// Transactions
// ============================================================================

/// A transaction ready to submit, with its hash precomputed
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub hash: String,
    pub version: String,
    pub selector: Selector,
    pub input: TypedValue,
}

impl Transaction {
    /// Compute the hash of `input` under `selector`
    pub fn new(selector: Selector, input: TypedValue) -> Self {
        let hash = transaction_hash_b64(TX_VERSION, &selector, &input);
        Self {
            hash,
            version: TX_VERSION.to_string(),
            selector,
            input,
        }
    }

    /// Wire form for `ren_submitTx` / `ren_submitGateway`
    pub fn to_input(&self) -> TransactionInput {
        TransactionInput {
            hash: Some(self.hash.clone()),
            version: self.version.clone(),
            selector: self.selector.to_string(),
            input: typed_to_transport(&self.input),
        }
    }
}

/// Fields of a cross-chain mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintParams {
    pub txid: Vec<u8>,
    pub txindex: u32,
    pub amount: U256,
    pub payload: Vec<u8>,
    pub phash: [u8; 32],
    pub to: String,
    pub nonce: [u8; 32],
    pub nhash: [u8; 32],
    pub gpubkey: Vec<u8>,
    pub ghash: [u8; 32],
}

impl MintParams {
    pub fn to_pack(&self) -> PackValue {
        PackValue::structure(vec![
            ("txid", PackValue::Bytes(self.txid.clone())),
            ("txindex", PackValue::U32(self.txindex)),
            ("amount", PackValue::U256(self.amount)),
            ("payload", PackValue::Bytes(self.payload.clone())),
            ("phash", PackValue::Bytes32(self.phash)),
            ("to", PackValue::Str(self.to.clone())),
            ("nonce", PackValue::Bytes32(self.nonce)),
            ("nhash", PackValue::Bytes32(self.nhash)),
            ("gpubkey", PackValue::Bytes(self.gpubkey.clone())),
            ("ghash", PackValue::Bytes32(self.ghash)),
        ])
    }

    /// Read the fields back from a decoded `in` value
    pub fn from_pack(value: &PackValue) -> Result<Self> {
        Ok(Self {
            txid: value.field("txid")?.as_bytes()?.to_vec(),
            txindex: u32::try_from(value.field("txindex")?.as_u64()?)
                .map_err(|_| RenVmError::decode("txindex", "overflows u32"))?,
            amount: value.field("amount")?.as_u256()?,
            payload: value.field("payload")?.as_bytes()?.to_vec(),
            phash: value.field("phash")?.as_bytes32()?,
            to: value.field("to")?.as_str()?.to_string(),
            nonce: value.field("nonce")?.as_bytes32()?,
            nhash: value.field("nhash")?.as_bytes32()?,
            gpubkey: value.field("gpubkey")?.as_bytes()?.to_vec(),
            ghash: value.field("ghash")?.as_bytes32()?,
        })
    }
}

/// Build the mint transaction for one deposit
pub fn build_mint_transaction(selector: Selector, params: &MintParams) -> Result<Transaction> {
    let input = TypedValue::new(cross_chain_params_type(), params.to_pack())?;
    Ok(Transaction::new(selector, input))
}

/// Build the gateway registration; the amount and deposit fields are not yet known
pub fn build_submit_gateway(selector: Selector, params: &MintParams) -> Result<Transaction> {
    let value = PackValue::structure(vec![
        ("payload", PackValue::Bytes(params.payload.clone())),
        ("phash", PackValue::Bytes32(params.phash)),
        ("to", PackValue::Str(params.to.clone())),
        ("nonce", PackValue::Bytes32(params.nonce)),
        ("nhash", PackValue::Bytes32(params.nhash)),
        ("gpubkey", PackValue::Bytes(params.gpubkey.clone())),
        ("ghash", PackValue::Bytes32(params.ghash)),
    ]);
    let input = TypedValue::new(submit_gateway_type(), value)?;
    Ok(Transaction::new(selector, input))
}

/// Build the release request for a burn
pub fn build_burn_transaction(
    selector: Selector,
    amount: U256,
    to: &str,
    nonce: [u8; 32],
) -> Result<Transaction> {
    let value = PackValue::structure(vec![
        ("amount", PackValue::U256(amount)),
        ("to", PackValue::Str(to.to_string())),
        ("nonce", PackValue::Bytes32(nonce)),
    ]);
    let input = TypedValue::new(burn_params_type(), value)?;
    Ok(Transaction::new(selector, input))
}

// ============================================================================
// Outputs
// ============================================================================

/// `out` of a completed mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintOutput {
    /// Amount after RenVM fees
    pub amount: U256,
    pub hash: [u8; 32],
    pub sighash: [u8; 32],
    pub signature: Signature,
    pub txid: Vec<u8>,
    pub txindex: u32,
    /// Non-empty when the network reverted the mint
    pub revert: Option<String>,
}

impl MintOutput {
    pub fn from_pack(value: &PackValue) -> Result<Self> {
        let revert = match value.opt_field("revert") {
            Some(r) => Some(r.as_str()?.to_string()).filter(|s| !s.is_empty()),
            None => None,
        };
        let txid = match value.opt_field("txid") {
            Some(t) => t.as_bytes()?.to_vec(),
            None => Vec::new(),
        };
        let txindex = match value.opt_field("txindex") {
            Some(i) => u32::try_from(i.as_u64()?)
                .map_err(|_| RenVmError::decode("txindex", "overflows u32"))?,
            None => 0,
        };
        Ok(Self {
            amount: value.field("amount")?.as_u256()?,
            hash: value.field("hash")?.as_bytes32()?,
            sighash: value.field("sighash")?.as_bytes32()?,
            signature: Signature::from_bytes65(&value.field("sig")?.as_bytes65()?),
            txid,
            txindex,
            revert,
        })
    }
}

/// `out` of a completed release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutput {
    pub amount: Option<U256>,
    /// Release transaction on the asset's home chain, when reported
    pub txid: Option<Vec<u8>>,
    pub revert: Option<String>,
}

impl ReleaseOutput {
    pub fn from_pack(value: &PackValue) -> Result<Self> {
        let amount = match value.opt_field("amount") {
            Some(a) => Some(a.as_u256()?),
            None => None,
        };
        let txid = match value.opt_field("txid") {
            Some(t) => Some(t.as_bytes()?.to_vec()).filter(|t| !t.is_empty()),
            None => None,
        };
        let revert = match value.opt_field("revert") {
            Some(r) => Some(r.as_str()?.to_string()).filter(|s| !s.is_empty()),
            None => None,
        };
        Ok(Self {
            amount,
            txid,
            revert,
        })
    }
}
