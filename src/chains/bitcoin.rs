//! Bitcoin lock chain over the Blockstream REST API

use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::address::{self, AddressFamily};
use crate::chain::{DepositSender, LockChain, LockDeposit};
use crate::chains::asset_decimals;
use crate::config::NetworkConfig;

/// Confirmations RenVM waits for on Bitcoin mainnet
pub const MAINNET_CONFIRMATIONS: u64 = 6;
/// Confirmations RenVM waits for on Bitcoin testnet
pub const TESTNET_CONFIRMATIONS: u64 = 2;

#[derive(Debug, Clone, Deserialize)]
struct TxStatusBody {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct UtxoBody {
    txid: String,
    vout: u32,
    value: u64,
    status: TxStatusBody,
}

#[derive(Debug, Clone, Deserialize)]
struct TxBody {
    status: TxStatusBody,
}

/// Bitcoin deposits and confirmations from an Esplora-compatible endpoint
pub struct BlockstreamChain {
    base_url: String,
    is_testnet: bool,
    confirmation_target: u64,
    client: Client,
}

impl BlockstreamChain {
    pub fn new(base_url: &str, is_testnet: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to create HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            is_testnet,
            confirmation_target: if is_testnet {
                TESTNET_CONFIRMATIONS
            } else {
                MAINNET_CONFIRMATIONS
            },
            client,
        })
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        let mut chain = Self::new(&config.blockstream_url, config.network.is_testnet())?;
        if let Some(target) = config.confirmation_overrides.get("Bitcoin") {
            chain.confirmation_target = *target;
        }
        Ok(chain)
    }

    pub fn with_confirmation_target(mut self, target: u64) -> Self {
        self.confirmation_target = target;
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err_with(|| format!("Failed to query {}", url))?;

        if !response.status().is_success() {
            return Err(eyre!(
                "Query failed: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        response
            .json()
            .await
            .wrap_err_with(|| format!("Failed to parse response from {}", url))
    }

    /// Current chain height
    pub async fn tip_height(&self) -> Result<u64> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err("Failed to query tip height")?;
        if !response.status().is_success() {
            return Err(eyre!("Tip height query failed: {}", response.status()));
        }
        let body = response.text().await?;
        body.trim()
            .parse()
            .map_err(|e| eyre!("Invalid tip height {}: {}", body, e))
    }

    fn confirmations_at(&self, status: &TxStatusBody, tip: u64) -> u64 {
        match (status.confirmed, status.block_height) {
            (true, Some(height)) => tip.saturating_sub(height) + 1,
            _ => 0,
        }
    }
}

#[async_trait]
impl LockChain for BlockstreamChain {
    fn name(&self) -> &str {
        "Bitcoin"
    }

    fn address_family(&self) -> AddressFamily {
        address::BITCOIN
    }

    fn is_testnet(&self) -> bool {
        self.is_testnet
    }

    async fn get_deposits(&self, address: &str, on_deposit: &DepositSender) -> Result<()> {
        let utxos: Vec<UtxoBody> = self.get_json(&format!("/address/{}/utxo", address)).await?;
        debug!(address = %address, count = utxos.len(), "Fetched gateway UTXOs");

        for utxo in utxos {
            let deposit = LockDeposit {
                txid: self.tx_id_bytes(&utxo.txid)?,
                tx_hash: utxo.txid.clone(),
                txindex: utxo.vout,
                amount: U256::from(utxo.value),
                raw: Some(serde_json::json!({
                    "txid": utxo.txid,
                    "vout": utxo.vout,
                    "value": utxo.value,
                    "confirmed": utxo.status.confirmed,
                    "blockHeight": utxo.status.block_height,
                })),
            };
            if on_deposit.send(deposit).is_err() {
                // receiver gone, the session stopped listening
                break;
            }
        }
        Ok(())
    }

    async fn get_confirmations(&self, deposit: &LockDeposit) -> Result<(u64, u64)> {
        let tx: TxBody = self.get_json(&format!("/tx/{}", deposit.tx_hash)).await?;
        if !tx.status.confirmed {
            return Ok((0, self.confirmation_target));
        }
        let tip = self.tip_height().await?;
        Ok((self.confirmations_at(&tx.status, tip), self.confirmation_target))
    }

    /// Transaction ids are displayed byte-reversed
    fn tx_id_bytes(&self, tx_hash: &str) -> Result<Vec<u8>> {
        let mut bytes = hex::decode(tx_hash.trim_start_matches("0x"))
            .map_err(|e| eyre!("Invalid txid {}: {}", tx_hash, e))?;
        bytes.reverse();
        Ok(bytes)
    }

    fn address_is_valid(&self, address: &str) -> bool {
        address::is_valid_address(&address::BITCOIN, self.is_testnet, address)
    }

    fn asset_decimals(&self, asset: &str) -> u8 {
        asset_decimals(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TXID: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_tx_id_bytes_reversed() {
        let chain = BlockstreamChain::new("http://localhost", true).unwrap();
        let bytes = chain.tx_id_bytes(TXID).unwrap();
        assert_eq!(bytes[0], 0xef);
        assert_eq!(bytes[31], 0x01);
    }

    #[test]
    fn test_default_targets() {
        assert_eq!(
            BlockstreamChain::new("http://x", false).unwrap().confirmation_target,
            6
        );
        assert_eq!(
            BlockstreamChain::new("http://x", true).unwrap().confirmation_target,
            2
        );
    }

    #[tokio::test]
    async fn test_get_deposits_lists_utxos() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/address/2N9ANvDHz7VuhrSLYtMpBpySKBYvB9mbNNj/utxo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "txid": TXID,
                    "vout": 1,
                    "value": 50000,
                    "status": { "confirmed": true, "block_height": 100 }
                }
            ])))
            .mount(&server)
            .await;

        let chain = BlockstreamChain::new(&server.uri(), true).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        chain
            .get_deposits("2N9ANvDHz7VuhrSLYtMpBpySKBYvB9mbNNj", &tx)
            .await
            .unwrap();

        let deposit = rx.recv().await.unwrap();
        assert_eq!(deposit.tx_hash, TXID);
        assert_eq!(deposit.txindex, 1);
        assert_eq!(deposit.amount, U256::from(50000u64));
        assert_eq!(deposit.txid[0], 0xef);
    }

    #[tokio::test]
    async fn test_two_outputs_of_one_tx_are_two_deposits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/address/2N9ANvDHz7VuhrSLYtMpBpySKBYvB9mbNNj/utxo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "txid": TXID, "vout": 0, "value": 50000, "status": { "confirmed": false } },
                { "txid": TXID, "vout": 1, "value": 70000, "status": { "confirmed": false } }
            ])))
            .mount(&server)
            .await;

        let chain = BlockstreamChain::new(&server.uri(), true).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        chain
            .get_deposits("2N9ANvDHz7VuhrSLYtMpBpySKBYvB9mbNNj", &tx)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.tx_hash, second.tx_hash);
        assert_eq!(first.id(), format!("{}_0", TXID));
        assert_eq!(second.id(), format!("{}_1", TXID));
        assert_eq!(second.amount, U256::from(70000u64));
    }

    #[tokio::test]
    async fn test_get_confirmations_counts_from_tip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/tx/{}", TXID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": { "confirmed": true, "block_height": 100 }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blocks/tip/height"))
            .respond_with(ResponseTemplate::new(200).set_body_string("101"))
            .mount(&server)
            .await;

        let chain = BlockstreamChain::new(&server.uri(), true).unwrap();
        let deposit = LockDeposit {
            tx_hash: TXID.into(),
            txid: vec![],
            txindex: 0,
            amount: U256::ZERO,
            raw: None,
        };
        assert_eq!(chain.get_confirmations(&deposit).await.unwrap(), (2, 2));
    }

    #[tokio::test]
    async fn test_unconfirmed_deposit_has_zero_confirmations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/tx/{}", TXID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": { "confirmed": false }
            })))
            .mount(&server)
            .await;

        let chain = BlockstreamChain::new(&server.uri(), false).unwrap();
        let deposit = LockDeposit {
            tx_hash: TXID.into(),
            txid: vec![],
            txindex: 0,
            amount: U256::ZERO,
            raw: None,
        };
        assert_eq!(chain.get_confirmations(&deposit).await.unwrap(), (0, 6));
    }

    #[tokio::test]
    async fn test_http_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let chain = BlockstreamChain::new(&server.uri(), true).unwrap();
        assert!(chain.tip_height().await.is_err());
    }
}
