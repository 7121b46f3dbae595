//! Typed RenVM client over a [`Provider`]
//!
//! Every response is decoded here: transaction `in`/`out` values and block state go
//! through the pack codec, so callers only see [`RenVmTransaction`],
//! [`AssetBlockState`] and friends.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{RenVmError, Result};
use crate::pack::unmarshal_typed;
use crate::tx::{ReleaseOutput, Transaction};
use crate::types::TxStatus;

use super::methods::*;
use super::provider::Provider;
use super::retry::{DEFAULT_RETRIES, DEFAULT_TIMEOUT};

/// Default interval between `ren_queryTx` polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Retries used for block-state lookups, which are cheap and often rate limited
const BLOCK_STATE_RETRIES: u32 = 5;

/// RenVM RPC client
#[derive(Clone)]
pub struct RenVmProvider {
    provider: Arc<dyn Provider>,
    retries: u32,
    timeout: Duration,
}

impl RenVmProvider {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> String {
        self.provider.endpoint()
    }

    async fn send<P: Serialize, R: DeserializeOwned>(
        &self,
        method: RpcMethod,
        params: &P,
        retries: u32,
    ) -> Result<R> {
        let params = serde_json::to_value(params)
            .map_err(|e| RenVmError::decode(method.as_str(), e.to_string()))?;
        let result = self
            .provider
            .send_message(method.as_str(), params, retries, self.timeout)
            .await?;
        serde_json::from_value(result)
            .map_err(|e| RenVmError::decode(method.as_str(), e.to_string()))
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Register gateway details so a mint can be recovered if the client disappears
    pub async fn submit_gateway(&self, gateway: &str, tx: &Transaction) -> Result<()> {
        let params = ParamsSubmitGateway {
            gateway: gateway.to_string(),
            tx: tx.to_input(),
        };
        let _: Value = self
            .send(RpcMethod::SubmitGateway, &params, self.retries)
            .await?;
        info!(gateway = %gateway, selector = %tx.selector, "Submitted gateway details");
        Ok(())
    }

    pub async fn submit_tx(&self, tx: &Transaction) -> Result<()> {
        let params = ParamsSubmitTx { tx: tx.to_input() };
        let _: Value = self.send(RpcMethod::SubmitTx, &params, self.retries).await?;
        info!(selector = %tx.selector, tx_hash = %tx.hash, "Submitted transaction to RenVM");
        Ok(())
    }

    /// Submit, treating a failure as success when the network already knows the hash
    pub async fn submit_tx_with_recovery(&self, tx: &Transaction) -> Result<()> {
        match self.submit_tx(tx).await {
            Ok(()) => Ok(()),
            Err(submit_error) => match self.query_tx(&tx.hash).await {
                Ok(existing) => {
                    warn!(
                        tx_hash = %tx.hash,
                        status = %existing.status,
                        error = %submit_error,
                        "Submission failed but RenVM already has the transaction"
                    );
                    Ok(())
                }
                Err(_) => Err(submit_error),
            },
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn query_tx(&self, tx_hash: &str) -> Result<TransactionWithStatus> {
        let params = ParamsQueryTx {
            tx_hash: tx_hash.to_string(),
        };
        let response: ResponseQueryTx = self.send(RpcMethod::QueryTx, &params, self.retries).await?;
        Ok(TransactionWithStatus {
            tx: decode_transaction(response.tx)?,
            status: response.tx_status,
        })
    }

    /// Page through transactions carrying `tags`
    pub async fn query_txs(
        &self,
        tags: Vec<String>,
        page: u64,
        page_size: u64,
        tx_status: Option<TxStatus>,
    ) -> Result<Vec<RenVmTransaction>> {
        let params = ParamsQueryTxs {
            tx_status,
            page: page.to_string(),
            page_size: page_size.to_string(),
            tags,
        };
        let response: ResponseQueryTxs =
            self.send(RpcMethod::QueryTxs, &params, self.retries).await?;
        response.txs.into_iter().map(decode_transaction).collect()
    }

    pub async fn query_block(&self, block_height: u64) -> Result<Value> {
        let response: ResponseQueryBlock = self
            .send(RpcMethod::QueryBlock, &ParamsQueryBlock { block_height }, self.retries)
            .await?;
        Ok(response.block)
    }

    pub async fn query_blocks(&self, block_height: u64, n: u64) -> Result<Value> {
        let response: ResponseQueryBlocks = self
            .send(
                RpcMethod::QueryBlocks,
                &ParamsQueryBlocks { block_height, n },
                self.retries,
            )
            .await?;
        Ok(response.blocks)
    }

    pub async fn query_config(&self) -> Result<ResponseQueryConfig> {
        self.send(RpcMethod::QueryConfig, &json!({}), self.retries)
            .await
    }

    pub async fn query_block_state(&self, asset: &str) -> Result<AssetBlockState> {
        let params = ParamsQueryBlockState {
            contract: asset.to_string(),
        };
        let response: ResponseQueryBlockState = self
            .send(RpcMethod::QueryBlockState, &params, BLOCK_STATE_RETRIES)
            .await?;
        let state = unmarshal_typed(&response.state)?;
        AssetBlockState::from_pack(asset, &state.v)
    }

    /// Public key of the shard currently handling `asset`
    pub async fn select_shard(&self, asset: &str) -> Result<Vec<u8>> {
        let state = self.query_block_state(asset).await?;
        let shard = state
            .shards
            .first()
            .filter(|shard| !shard.pub_key.is_empty())
            .ok_or_else(|| RenVmError::decode(asset, "no shard public key"))?;
        debug!(asset = %asset, pubkey = %hex::encode(&shard.pub_key), "Selected shard");
        Ok(shard.pub_key.clone())
    }

    /// Confirmations RenVM requires on `chain` before signing
    pub async fn get_confirmation_target(&self, chain: &str) -> Result<u64> {
        let config = self.query_config().await?;
        config
            .confirmations
            .get(chain)
            .copied()
            .ok_or_else(|| RenVmError::decode("confirmations", format!("no entry for {}", chain)))
    }

    /// Mint and burn fees for moving `asset` to or from `chain`
    pub async fn query_fees(&self, asset: &str, chain: &str) -> Result<ChainFees> {
        let state = self.query_block_state(asset).await?;
        state
            .fees_for(chain)
            .cloned()
            .ok_or_else(|| RenVmError::decode("fees.chains", format!("no fees for {}", chain)))
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Poll `ren_queryTx` until the transaction is done
    ///
    /// Not-found and not-available answers mean "keep polling"; transport failures
    /// are logged and polled through. `cancel` is checked before every attempt.
    /// There is no built-in deadline.
    pub async fn wait_for_tx<S, C>(
        &self,
        tx_hash: &str,
        mut on_status: S,
        cancel: C,
        poll_interval: Duration,
    ) -> Result<TransactionWithStatus>
    where
        S: FnMut(TxStatus) + Send,
        C: Fn() -> bool + Send,
    {
        loop {
            if cancel() {
                return Err(RenVmError::Cancelled {
                    hash: tx_hash.to_string(),
                });
            }

            match self.query_tx(tx_hash).await {
                Ok(result) => {
                    on_status(result.status);
                    match result.status {
                        TxStatus::Done => return Ok(result),
                        TxStatus::Reverted => {
                            let reason = result
                                .tx
                                .output
                                .as_ref()
                                .and_then(|out| ReleaseOutput::from_pack(&out.v).ok())
                                .and_then(|out| out.revert)
                                .unwrap_or_else(|| "reverted".to_string());
                            return Err(RenVmError::Reverted {
                                hash: tx_hash.to_string(),
                                reason,
                            });
                        }
                        status => debug!(tx_hash = %tx_hash, status = %status, "Waiting for RenVM"),
                    }
                }
                Err(e) if e.is_pending_query() => {
                    debug!(tx_hash = %tx_hash, "Transaction not yet available");
                }
                Err(e) if e.is_retryable() => {
                    warn!(tx_hash = %tx_hash, error = %e, "Query failed, polling again");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl std::fmt::Debug for RenVmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenVmProvider")
            .field("endpoint", &self.provider.endpoint())
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn decode_transaction(raw: RawTransaction) -> Result<RenVmTransaction> {
    let input = unmarshal_typed(&raw.input)?;
    let output = match raw.out {
        Some(out) if !out.is_null() => Some(unmarshal_typed(&out)?),
        _ => None,
    };
    Ok(RenVmTransaction {
        version: raw.version,
        hash: raw.hash,
        selector: raw.selector,
        input,
        output,
    })
}
