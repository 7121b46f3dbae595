//! RenVM JSON-RPC methods, request params and response shapes
//!
//! Responses that carry typed values (`in`/`out` of a transaction, block state) keep
//! them as raw JSON here and are decoded through [`crate::pack::unmarshal_typed`]
//! by [`super::RenVmProvider`], so no call site shapes network JSON by hand.

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RenVmError, Result};
use crate::pack::{PackValue, TypedValue};
use crate::types::TxStatus;

/// RenVM RPC methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    /// Register gateway details ahead of a deposit, for mint recovery
    SubmitGateway,
    /// Submit a transaction for signing or release
    SubmitTx,
    QueryTx,
    QueryTxs,
    QueryBlock,
    QueryBlocks,
    QueryConfig,
    QueryBlockState,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::SubmitGateway => "ren_submitGateway",
            RpcMethod::SubmitTx => "ren_submitTx",
            RpcMethod::QueryTx => "ren_queryTx",
            RpcMethod::QueryTxs => "ren_queryTxs",
            RpcMethod::QueryBlock => "ren_queryBlock",
            RpcMethod::QueryBlocks => "ren_queryBlocks",
            RpcMethod::QueryConfig => "ren_queryConfig",
            RpcMethod::QueryBlockState => "ren_queryBlockState",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Params
// ============================================================================

/// Transaction as submitted: `{hash, version, selector, in}`
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub version: String,
    pub selector: String,
    #[serde(rename = "in")]
    pub input: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamsSubmitTx {
    pub tx: TransactionInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamsSubmitGateway {
    pub gateway: String,
    pub tx: TransactionInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsQueryTx {
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsQueryTxs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_status: Option<TxStatus>,
    pub page: String,
    pub page_size: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsQueryBlock {
    pub block_height: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsQueryBlocks {
    pub block_height: u64,
    pub n: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamsQueryBlockState {
    pub contract: String,
}

// ============================================================================
// Responses
// ============================================================================

/// Transaction as returned by the network, typed values still raw
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub version: String,
    pub hash: String,
    pub selector: String,
    #[serde(rename = "in")]
    pub input: Value,
    #[serde(default)]
    pub out: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseQueryTx {
    pub tx: RawTransaction,
    pub tx_status: TxStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseQueryTxs {
    pub txs: Vec<RawTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseQueryBlock {
    pub block: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseQueryBlocks {
    pub blocks: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseQueryBlockState {
    pub state: Value,
}

/// Node configuration from `ren_queryConfig`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseQueryConfig {
    #[serde(deserialize_with = "de_u64_map")]
    pub confirmations: BTreeMap<String, u64>,
    #[serde(default, deserialize_with = "de_u64_map")]
    pub max_confirmations: BTreeMap<String, u64>,
    pub network: String,
    #[serde(default)]
    pub registries: BTreeMap<String, String>,
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// Marshalled u64 values arrive as decimal strings, older nodes send numbers
fn de_u64_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, u64>, D::Error> {
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(chain, value)| {
            let parsed = match &value {
                Value::String(s) => s.parse().ok(),
                Value::Number(n) => n.as_u64(),
                _ => None,
            };
            parsed
                .map(|v| (chain.clone(), v))
                .ok_or_else(|| serde::de::Error::custom(format!("{}: not a u64: {}", chain, value)))
        })
        .collect()
}

// ============================================================================
// Decoded transaction and block state
// ============================================================================

/// A transaction with its typed values decoded
#[derive(Debug, Clone, PartialEq)]
pub struct RenVmTransaction {
    pub version: String,
    pub hash: String,
    pub selector: String,
    pub input: TypedValue,
    pub output: Option<TypedValue>,
}

/// A decoded transaction plus its status
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionWithStatus {
    pub tx: RenVmTransaction,
    pub status: TxStatus,
}

/// Per-chain fees in basis points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainFees {
    pub chain: String,
    pub mint_fee: u64,
    pub burn_fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub shard: [u8; 32],
    pub pub_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Minted {
    pub chain: String,
    pub amount: U256,
}

/// Block state of one asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBlockState {
    pub latest_height: U256,
    pub gas_cap: U256,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub minimum_amount: U256,
    pub dust_amount: U256,
    pub fees: Vec<ChainFees>,
    pub shards: Vec<Shard>,
    pub minted: Vec<Minted>,
}

impl AssetBlockState {
    /// Extract the fields the client uses from the decoded state of `asset`
    pub fn from_pack(asset: &str, state: &PackValue) -> Result<Self> {
        let asset_state = state
            .field(asset)
            .map_err(|_| RenVmError::decode(asset, "no block state for asset"))?;

        let fees = asset_state
            .field("fees")?
            .field("chains")?
            .as_list()?
            .iter()
            .map(|entry| {
                Ok(ChainFees {
                    chain: entry.field("chain")?.as_str()?.to_string(),
                    mint_fee: entry.field("mintFee")?.as_u64()?,
                    burn_fee: entry.field("burnFee")?.as_u64()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let shards = asset_state
            .field("shards")?
            .as_list()?
            .iter()
            .map(|entry| {
                Ok(Shard {
                    shard: entry.field("shard")?.as_bytes32()?,
                    pub_key: entry.field("pubKey")?.as_bytes()?.to_vec(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let minted = match asset_state.opt_field("minted") {
            Some(list) => list
                .as_list()?
                .iter()
                .map(|entry| {
                    Ok(Minted {
                        chain: entry.field("chain")?.as_str()?.to_string(),
                        amount: entry.field("amount")?.as_u256()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            latest_height: asset_state.field("latestHeight")?.as_u256()?,
            gas_cap: asset_state.field("gasCap")?.as_u256()?,
            gas_limit: asset_state.field("gasLimit")?.as_u256()?,
            gas_price: asset_state.field("gasPrice")?.as_u256()?,
            minimum_amount: asset_state.field("minimumAmount")?.as_u256()?,
            dust_amount: asset_state.field("dustAmount")?.as_u256()?,
            fees,
            shards,
            minted,
        })
    }

    pub fn fees_for(&self, chain: &str) -> Option<&ChainFees> {
        self.fees.iter().find(|f| f.chain == chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names() {
        assert_eq!(RpcMethod::SubmitGateway.as_str(), "ren_submitGateway");
        assert_eq!(RpcMethod::QueryBlockState.to_string(), "ren_queryBlockState");
    }

    #[test]
    fn test_query_config_accepts_strings_and_numbers() {
        let config: ResponseQueryConfig = serde_json::from_value(json!({
            "confirmations": {"Bitcoin": "6", "Ethereum": 30},
            "maxConfirmations": {"Bitcoin": "6"},
            "network": "mainnet",
            "registries": {"Ethereum": "0x21C482f153D0317fe85C60bE1F7fa079019fcEbD"},
            "whitelist": ["BTC/toEthereum"]
        }))
        .unwrap();
        assert_eq!(config.confirmations["Bitcoin"], 6);
        assert_eq!(config.confirmations["Ethereum"], 30);
        assert_eq!(config.whitelist, vec!["BTC/toEthereum"]);
    }

    #[test]
    fn test_query_tx_params_are_camel_case() {
        let params = serde_json::to_value(ParamsQueryTx {
            tx_hash: "abc".into(),
        })
        .unwrap();
        assert_eq!(params, json!({"txHash": "abc"}));

        let params = serde_json::to_value(ParamsQueryBlocks {
            block_height: 10,
            n: 2,
        })
        .unwrap();
        assert_eq!(params, json!({"blockHeight": 10, "n": 2}));
    }

    #[test]
    fn test_transaction_input_renames_in() {
        let tx = TransactionInput {
            hash: None,
            version: "1".into(),
            selector: "BTC/toEthereum".into(),
            input: json!({"t": {"struct": []}, "v": {}}),
        };
        let value = serde_json::to_value(tx).unwrap();
        assert!(value.get("in").is_some());
        assert!(value.get("hash").is_none());
    }
}
