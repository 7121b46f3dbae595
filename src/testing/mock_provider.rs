//! In-process RenVM node
//!
//! [`MockRenVm`] implements [`Provider`] without a network: it stores submitted
//! transactions, reports them pending for a configurable number of polls, then
//! answers with a mint signature made by its own key or a release output. Mints
//! whose gHash does not match their selector, payload, recipient and nonce revert.

use alloy::primitives::U256;
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::error::{RenVmError, Result};
use crate::hash::{gateway_hash, selector_hash, sighash};
use crate::pack::{typed_to_transport, unmarshal_typed, PackType, PackValue, TypedValue};
use crate::rpc::Provider;
use crate::signature::authority_from_pubkey;
use crate::tx::{mint_output_type, MintParams};
use crate::types::{EvmAddress, Selector};

/// Fee taken from every mint and release
pub const MOCK_FEE: u64 = 1_000;

const MOCK_KEY: [u8; 32] = [0x42; 32];

#[derive(Debug, Clone)]
struct StoredTx {
    selector: String,
    input: TypedValue,
    polls_left: u32,
}

/// RenVM stand-in with a deterministic signing key
#[derive(Debug)]
pub struct MockRenVm {
    key: SigningKey,
    pending_polls: u32,
    confirmation_target: u64,
    revert: Mutex<Option<String>>,
    txs: Mutex<HashMap<String, StoredTx>>,
    submit_calls: AtomicU32,
    gateway_calls: AtomicU32,
    query_calls: AtomicU32,
}

impl MockRenVm {
    pub fn new() -> Result<Self> {
        let key = SigningKey::from_slice(&MOCK_KEY)
            .map_err(|e| RenVmError::InvalidSignature(e.to_string()))?;
        Ok(Self {
            key,
            pending_polls: 1,
            confirmation_target: 2,
            revert: Mutex::new(None),
            txs: Mutex::new(HashMap::new()),
            submit_calls: AtomicU32::new(0),
            gateway_calls: AtomicU32::new(0),
            query_calls: AtomicU32::new(0),
        })
    }

    /// Report every transaction pending this many times before it completes
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Confirmations reported for Bitcoin by `ren_queryConfig`
    pub fn with_confirmation_target(mut self, target: u64) -> Self {
        self.confirmation_target = target;
        self
    }

    /// Revert every transaction submitted from now on with `reason`
    pub fn revert_with(&self, reason: &str) {
        if let Ok(mut revert) = self.revert.lock() {
            *revert = Some(reason.to_string());
        }
    }

    /// Compressed public key of the shard
    pub fn shard_pubkey(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// EVM address that signs mints
    pub fn authority(&self) -> Result<EvmAddress> {
        authority_from_pubkey(&self.shard_pubkey())
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn gateway_calls(&self) -> u32 {
        self.gateway_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn lock_txs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredTx>>> {
        self.txs
            .lock()
            .map_err(|_| RenVmError::decode("mock", "transaction store poisoned"))
    }

    fn submit(&self, params: &Value) -> Result<Value> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let tx = &params["tx"];
        let hash = tx["hash"]
            .as_str()
            .ok_or_else(|| RenVmError::decode("tx.hash", "missing"))?
            .to_string();
        let selector = tx["selector"]
            .as_str()
            .ok_or_else(|| RenVmError::decode("tx.selector", "missing"))?
            .to_string();
        let input = unmarshal_typed(&tx["in"])?;
        debug!(hash = %hash, selector = %selector, "Mock RenVM accepted transaction");
        self.lock_txs()?.entry(hash).or_insert(StoredTx {
            selector,
            input,
            polls_left: self.pending_polls,
        });
        Ok(json!({}))
    }

    fn query(&self, params: &Value) -> Result<Value> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let hash = params["txHash"]
            .as_str()
            .ok_or_else(|| RenVmError::decode("txHash", "missing"))?
            .to_string();
        let stored = {
            let mut txs = self.lock_txs()?;
            let stored = txs
                .get_mut(&hash)
                .ok_or_else(|| RenVmError::TransactionNotFound { hash: hash.clone() })?;
            let snapshot = stored.clone();
            stored.polls_left = stored.polls_left.saturating_sub(1);
            snapshot
        };

        let revert = self.revert.lock().ok().and_then(|r| r.clone());
        let is_mint = stored.input.v.opt_field("ghash").is_some();
        let selector = Selector::from(stored.selector.as_str());
        let (status, out) = if stored.polls_left > 0 {
            ("pending", Value::Null)
        } else if let Some(reason) = revert {
            ("reverted", typed_to_transport(&revert_output(reason)?))
        } else if is_mint && !ghash_matches(&selector, &stored.input.v)? {
            ("reverted", typed_to_transport(&revert_output("invalid ghash".into())?))
        } else if is_mint {
            ("done", typed_to_transport(&self.mint_output(&selector, &stored.input.v)?))
        } else {
            ("done", typed_to_transport(&release_output(&stored.input.v)?))
        };

        Ok(json!({
            "tx": {
                "version": "1",
                "hash": hash,
                "selector": stored.selector,
                "in": typed_to_transport(&stored.input),
                "out": out,
            },
            "txStatus": status,
        }))
    }

    fn mint_output(&self, selector: &Selector, input: &PackValue) -> Result<TypedValue> {
        let params = MintParams::from_pack(input)?;
        let to = hex::decode(&params.to).map_err(|e| RenVmError::decode("to", e.to_string()))?;
        let shash = selector_hash(selector);
        let amount = params.amount.saturating_sub(U256::from(MOCK_FEE));
        let hash = sighash(&params.phash, amount, &to, &shash, &params.nhash);
        let value = PackValue::structure(vec![
            ("amount", PackValue::U256(amount)),
            ("hash", PackValue::Bytes32(params.nhash)),
            ("sighash", PackValue::Bytes32(hash)),
            ("sig", PackValue::Bytes65(self.sign(&hash)?)),
            ("txid", PackValue::Bytes(params.txid)),
            ("txindex", PackValue::U32(params.txindex)),
            ("revert", PackValue::Str(String::new())),
        ]);
        TypedValue::new(mint_output_type(), value)
    }

    /// `r ‖ s ‖ v` with the raw 0/1 recovery id, as the network returns it
    fn sign(&self, hash: &[u8; 32]) -> Result<[u8; 65]> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash)
            .map_err(|e| RenVmError::InvalidSignature(e.to_string()))?;
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Ok(bytes)
    }

    fn block_state(&self, params: &Value) -> Result<Value> {
        let asset = params["contract"]
            .as_str()
            .ok_or_else(|| RenVmError::decode("contract", "missing"))?;
        let fee_type = PackType::structure(&[
            ("chain", PackType::Str),
            ("mintFee", PackType::U64),
            ("burnFee", PackType::U64),
        ]);
        let shard_type = PackType::structure(&[("shard", PackType::Bytes32), ("pubKey", PackType::Bytes)]);
        let asset_type = PackType::structure(&[
            ("latestHeight", PackType::U256),
            ("gasCap", PackType::U256),
            ("gasLimit", PackType::U256),
            ("gasPrice", PackType::U256),
            ("minimumAmount", PackType::U256),
            ("dustAmount", PackType::U256),
            ("fees", PackType::structure(&[("chains", PackType::list(fee_type))])),
            ("shards", PackType::list(shard_type)),
        ]);
        let asset_value = PackValue::structure(vec![
            ("latestHeight", PackValue::U256(U256::from(700_000u64))),
            ("gasCap", PackValue::U256(U256::from(2u64))),
            ("gasLimit", PackValue::U256(U256::from(400u64))),
            ("gasPrice", PackValue::U256(U256::from(2u64))),
            ("minimumAmount", PackValue::U256(U256::from(547u64))),
            ("dustAmount", PackValue::U256(U256::from(546u64))),
            (
                "fees",
                PackValue::structure(vec![(
                    "chains",
                    PackValue::List(vec![PackValue::structure(vec![
                        ("chain", PackValue::Str("Ethereum".into())),
                        ("mintFee", PackValue::U64(15)),
                        ("burnFee", PackValue::U64(15)),
                    ])]),
                )]),
            ),
            (
                "shards",
                PackValue::List(vec![PackValue::structure(vec![
                    ("shard", PackValue::Bytes32([0x5a; 32])),
                    ("pubKey", PackValue::Bytes(self.shard_pubkey())),
                ])]),
            ),
        ]);
        let state = TypedValue::new(
            PackType::structure(&[(asset, asset_type)]),
            PackValue::structure(vec![(asset, asset_value)]),
        )?;
        Ok(json!({ "state": typed_to_transport(&state) }))
    }
}

/// Whether a mint's gHash commits to its own selector, payload, recipient and nonce
fn ghash_matches(selector: &Selector, input: &PackValue) -> Result<bool> {
    let params = MintParams::from_pack(input)?;
    let to = hex::decode(&params.to).map_err(|e| RenVmError::decode("to", e.to_string()))?;
    Ok(gateway_hash(&params.phash, &to, &selector_hash(selector), &params.nonce) == params.ghash)
}

fn revert_output(reason: String) -> Result<TypedValue> {
    TypedValue::new(
        PackType::structure(&[("revert", PackType::Str)]),
        PackValue::structure(vec![("revert", PackValue::Str(reason))]),
    )
}

fn release_output(input: &PackValue) -> Result<TypedValue> {
    let amount = input.field("amount")?.as_u256()?;
    let value = PackValue::structure(vec![
        ("amount", PackValue::U256(amount.saturating_sub(U256::from(MOCK_FEE)))),
        ("txid", PackValue::Bytes(vec![0xbb; 32])),
        ("revert", PackValue::Str(String::new())),
    ]);
    TypedValue::new(
        PackType::structure(&[
            ("amount", PackType::U256),
            ("txid", PackType::Bytes),
            ("revert", PackType::Str),
        ]),
        value,
    )
}

#[async_trait]
impl Provider for MockRenVm {
    async fn send_message(
        &self,
        method: &str,
        params: Value,
        _retries: u32,
        _timeout: Duration,
    ) -> Result<Value> {
        match method {
            "ren_submitGateway" => {
                self.gateway_calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({}))
            }
            "ren_submitTx" => self.submit(&params),
            "ren_queryTx" => self.query(&params),
            "ren_queryBlockState" => self.block_state(&params),
            "ren_queryConfig" => Ok(json!({
                "confirmations": {
                    "Bitcoin": self.confirmation_target.to_string(),
                    "Ethereum": "12",
                },
                "maxConfirmations": {"Bitcoin": "6", "Ethereum": "30"},
                "network": "testnet",
                "registries": {},
                "whitelist": ["BTC/toEthereum", "BTC/fromEthereum"],
            })),
            other => Err(RenVmError::Rpc {
                method: other.to_string(),
                code: -32601,
                message: "unsupported method".into(),
            }),
        }
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}
