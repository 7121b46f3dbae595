//! EVM mint chain over alloy
//!
//! Resolves gateways through the GatewayRegistry, executes `mint`/`burn` on the
//! asset's MintGateway and looks up earlier mints by their signed message hash.

use std::collections::HashMap;
use std::str::FromStr;

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt},
    json_abi::Function,
    network::EthereumWallet,
    primitives::{Address, Bytes, FixedBytes, B256, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, Log, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol,
    sol_types::SolEvent,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::chain::{BurnDetails, ContractCall, MintChain, MintSubmission};
use crate::chains::asset_decimals;
use crate::config::EvmChainConfig;

sol! {
    /// Symbol lookups for RenVM gateways
    #[sol(rpc)]
    contract GatewayRegistry {
        function getGatewayBySymbol(string _tokenSymbol) external view returns (address);
    }

    /// Per-asset gateway that mints and burns the representative token
    #[sol(rpc)]
    contract MintGateway {
        function mint(bytes32 _pHash, uint256 _amount, bytes32 _nHash, bytes _sig) external returns (uint256);
        function burn(bytes _to, uint256 _amount) external returns (uint256);
        function status(bytes32 _signedMessageHash) external view returns (bool);

        event LogMint(address indexed _to, uint256 _amount, uint256 indexed _n, bytes32 indexed _signedMessageHash);
        event LogBurn(bytes _to, uint256 _amount, uint256 indexed _n, bytes indexed _indexedTo);
    }
}

/// Mint chain adapter for one EVM network
pub struct EvmMintChain {
    name: String,
    rpc_url: String,
    provider: RootProvider<Http<Client>>,
    signer: Option<PrivateKeySigner>,
    registry: Address,
    confirmations: u64,
    gateways: RwLock<HashMap<String, Address>>,
}

impl EvmMintChain {
    pub fn new(config: &EvmChainConfig) -> Result<Self> {
        let provider = ProviderBuilder::new().on_http(
            config
                .rpc_url
                .parse()
                .map_err(|e| eyre!("Invalid RPC URL: {}", e))?,
        );

        let signer = match &config.private_key {
            Some(key) => Some(
                key.parse::<PrivateKeySigner>()
                    .map_err(|e| eyre!("Invalid private key: {}", e))?,
            ),
            None => None,
        };

        let registry = Address::from_str(&config.gateway_registry)
            .map_err(|e| eyre!("Invalid gateway registry {}: {}", config.gateway_registry, e))?;

        info!(
            chain = %config.name,
            rpc_url = %config.rpc_url,
            registry = %registry,
            signer = ?signer.as_ref().map(|s| s.address()),
            "Created EVM mint chain"
        );

        Ok(Self {
            name: config.name.clone(),
            rpc_url: config.rpc_url.clone(),
            provider,
            signer,
            registry,
            confirmations: config.confirmations.max(1),
            gateways: RwLock::new(HashMap::new()),
        })
    }

    /// Address transactions are sent from, if a key is configured
    pub fn sender(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    fn wallet(&self) -> Result<EthereumWallet> {
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| eyre!("No private key configured for {}", self.name))?;
        Ok(EthereumWallet::from(signer))
    }

    async fn gateway_address(&self, asset: &str) -> Result<Address> {
        if let Some(address) = self.gateways.read().await.get(asset) {
            return Ok(*address);
        }
        let registry = GatewayRegistry::new(self.registry, &self.provider);
        let address = registry
            .getGatewayBySymbol(asset.to_string())
            .call()
            .await
            .wrap_err_with(|| format!("Failed to resolve gateway for {}", asset))?
            ._0;
        if address == Address::ZERO {
            return Err(eyre!("No gateway registered for {} on {}", asset, self.name));
        }
        self.gateways.write().await.insert(asset.to_string(), address);
        Ok(address)
    }

    /// Send raw calldata from the configured key and wait for the receipt
    async fn send_call(&self, to: Address, data: Vec<u8>) -> Result<B256> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet()?)
            .on_http(
                self.rpc_url
                    .parse()
                    .map_err(|e| eyre!("Invalid RPC URL: {}", e))?,
            );
        let tx = TransactionRequest::default()
            .to(to)
            .input(Bytes::from(data).into());
        let receipt = provider
            .send_transaction(tx)
            .await
            .wrap_err("Failed to send transaction")?
            .get_receipt()
            .await
            .wrap_err("Failed to get transaction receipt")?;
        if !receipt.status() {
            return Err(eyre!("Transaction {} reverted", receipt.transaction_hash));
        }
        Ok(receipt.transaction_hash)
    }
}

/// Calldata for a contract call with `(amount, nHash, sig)` appended to the user's arguments
pub fn encode_mint_call(call: &ContractCall, mint: &MintSubmission) -> Result<Vec<u8>> {
    let function = Function::parse(&call.signature)
        .map_err(|e| eyre!("Invalid function signature {}: {}", call.signature, e))?;
    let mut values = call.args_as_sol()?;
    values.push(DynSolValue::Uint(mint.amount, 256));
    values.push(DynSolValue::FixedBytes(B256::from(mint.nhash), 32));
    values.push(DynSolValue::Bytes(mint.signature.to_bytes65().to_vec()));
    function
        .abi_encode_input(&values)
        .map_err(|e| eyre!("Failed to encode {}: {}", call.signature, e))
}

/// Parse a `LogBurn` event out of a receipt log
pub fn parse_burn_log(log: &Log) -> Option<(Vec<u8>, U256, U256)> {
    let topics = log.topics();
    if topics.len() < 2 || topics[0] != MintGateway::LogBurn::SIGNATURE_HASH {
        return None;
    }
    let nonce = U256::from_be_slice(topics[1].as_slice());

    let ty = DynSolType::Tuple(vec![DynSolType::Bytes, DynSolType::Uint(256)]);
    let decoded = ty.abi_decode_params(log.data().data.as_ref()).ok()?;
    let DynSolValue::Tuple(fields) = decoded else {
        return None;
    };
    match fields.as_slice() {
        [DynSolValue::Bytes(to), DynSolValue::Uint(amount, _)] => Some((to.clone(), *amount, nonce)),
        _ => None,
    }
}

fn parse_tx_hash(tx_hash: &str) -> Result<B256> {
    B256::from_str(tx_hash).map_err(|e| eyre!("Invalid transaction hash {}: {}", tx_hash, e))
}

#[async_trait]
impl MintChain for EvmMintChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve_gateway_contract(&self, asset: &str) -> Result<String> {
        Ok(self.gateway_address(asset).await?.to_string())
    }

    fn address_to_bytes(&self, address: &str) -> Result<Vec<u8>> {
        Address::from_str(address)
            .map(|a| a.to_vec())
            .map_err(|e| eyre!("Invalid EVM address {}: {}", address, e))
    }

    fn address_is_valid(&self, address: &str) -> bool {
        Address::from_str(address).is_ok()
    }

    async fn submit_mint(&self, calls: &[ContractCall], mint: &MintSubmission) -> Result<String> {
        let tx_hash = if calls.is_empty() {
            let gateway = self.gateway_address(&mint.asset).await?;
            let provider = ProviderBuilder::new()
                .with_recommended_fillers()
                .wallet(self.wallet()?)
                .on_http(
                    self.rpc_url
                        .parse()
                        .map_err(|e| eyre!("Invalid RPC URL: {}", e))?,
                );
            let contract = MintGateway::new(gateway, &provider);
            let receipt = contract
                .mint(
                    FixedBytes(mint.phash),
                    mint.amount,
                    FixedBytes(mint.nhash),
                    Bytes::from(mint.signature.to_bytes65().to_vec()),
                )
                .send()
                .await
                .wrap_err("Failed to send mint")?
                .get_receipt()
                .await
                .wrap_err("Failed to get mint receipt")?;
            if !receipt.status() {
                return Err(eyre!("Mint {} reverted", receipt.transaction_hash));
            }
            receipt.transaction_hash
        } else {
            let mut last = None;
            for call in calls {
                let to = Address::from_str(&call.to)
                    .map_err(|e| eyre!("Invalid contract address {}: {}", call.to, e))?;
                let data = encode_mint_call(call, mint)?;
                debug!(to = %to, signature = %call.signature, "Sending mint contract call");
                last = Some(self.send_call(to, data).await?);
            }
            last.ok_or_else(|| eyre!("No contract call was sent"))?
        };

        info!(
            chain = %self.name,
            asset = %mint.asset,
            tx_hash = %tx_hash,
            amount = %mint.amount,
            "Mint submitted"
        );
        Ok(tx_hash.to_string())
    }

    async fn find_mint(&self, asset: &str, sighash: &[u8; 32]) -> Result<Option<String>> {
        let gateway_address = self.gateway_address(asset).await?;
        let gateway = MintGateway::new(gateway_address, &self.provider);
        let sighash = B256::from(*sighash);

        let minted = gateway
            .status(sighash)
            .call()
            .await
            .wrap_err("Failed to query mint status")?
            ._0;
        if !minted {
            return Ok(None);
        }

        let filter = Filter::new()
            .address(gateway_address)
            .event_signature(MintGateway::LogMint::SIGNATURE_HASH)
            .topic3(sighash)
            .from_block(0u64);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err("Failed to get LogMint logs")?;

        // The status flag is authoritative; a pruned node may not return the log.
        Ok(Some(
            logs.iter()
                .find_map(|log| log.transaction_hash)
                .map(|hash| hash.to_string())
                .unwrap_or_default(),
        ))
    }

    async fn submit_burn(&self, asset: &str, to: &str, amount: U256) -> Result<BurnDetails> {
        let gateway_address = self.gateway_address(asset).await?;
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet()?)
            .on_http(
                self.rpc_url
                    .parse()
                    .map_err(|e| eyre!("Invalid RPC URL: {}", e))?,
            );
        let gateway = MintGateway::new(gateway_address, &provider);
        let receipt = gateway
            .burn(Bytes::from(to.as_bytes().to_vec()), amount)
            .send()
            .await
            .wrap_err("Failed to send burn")?
            .get_receipt()
            .await
            .wrap_err("Failed to get burn receipt")?;
        if !receipt.status() {
            return Err(eyre!("Burn {} reverted", receipt.transaction_hash));
        }

        let (_, burned, nonce) = receipt
            .inner
            .logs()
            .iter()
            .find_map(parse_burn_log)
            .ok_or_else(|| eyre!("No LogBurn event in {}", receipt.transaction_hash))?;

        info!(
            chain = %self.name,
            asset = %asset,
            tx_hash = %receipt.transaction_hash,
            nonce = %nonce,
            "Burn submitted"
        );

        Ok(BurnDetails {
            tx_hash: receipt.transaction_hash.to_string(),
            to: to.to_string(),
            amount: burned,
            nonce,
        })
    }

    async fn get_confirmations(&self, tx_hash: &str) -> Result<(u64, u64)> {
        let hash = parse_tx_hash(tx_hash)?;
        let Some(receipt) = self.provider.get_transaction_receipt(hash).await? else {
            return Ok((0, self.confirmations));
        };
        let Some(mined) = receipt.block_number else {
            return Ok((0, self.confirmations));
        };
        let current = self.provider.get_block_number().await?;
        Ok((current.saturating_sub(mined) + 1, self.confirmations))
    }

    fn asset_decimals(&self, asset: &str) -> u8 {
        asset_decimals(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::CallArg;
    use crate::signature::Signature;
    use alloy::primitives::LogData;

    fn submission() -> MintSubmission {
        MintSubmission {
            asset: "BTC".into(),
            to: "0x04084f1cACCB87Dcab9a29a084281294dA96Bf44".into(),
            amount: U256::from(9000u64),
            phash: [0u8; 32],
            nhash: [7u8; 32],
            sighash: [9u8; 32],
            signature: Signature {
                r: [1u8; 32],
                s: [2u8; 32],
                v: 27,
            },
        }
    }

    #[test]
    fn test_encode_mint_call_appends_mint_arguments() {
        let call = ContractCall {
            to: "0x0000000000000000000000000000000000000001".into(),
            signature: "mintTo(address,uint256,bytes32,bytes)".into(),
            args: vec![CallArg::new(
                "address",
                "0x04084f1cACCB87Dcab9a29a084281294dA96Bf44",
            )],
        };
        let data = encode_mint_call(&call, &submission()).unwrap();
        let selector = &alloy::primitives::keccak256("mintTo(address,uint256,bytes32,bytes)")[..4];
        assert_eq!(&data[..4], selector);
        // address, amount, nHash, offset
        assert_eq!(U256::from_be_slice(&data[36..68]), U256::from(9000u64));
        assert_eq!(&data[68..100], &[7u8; 32]);
    }

    #[test]
    fn test_encode_mint_call_rejects_arity_mismatch() {
        let call = ContractCall {
            to: "0x0000000000000000000000000000000000000001".into(),
            signature: "mintTo(uint256,bytes32,bytes)".into(),
            args: vec![CallArg::new("uint256", "1")],
        };
        assert!(encode_mint_call(&call, &submission()).is_err());
    }

    #[test]
    fn test_parse_burn_log() {
        let to = b"mxpN8VNVtyBbSXKZxfvXqfBVLNYgWSrmoT".to_vec();
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Bytes(to.clone()),
            DynSolValue::Uint(U256::from(5000u64), 256),
        ])
        .abi_encode_params();
        let nonce = B256::from(U256::from(42u64));
        let inner = alloy::primitives::Log {
            address: Address::ZERO,
            data: LogData::new_unchecked(
                vec![
                    MintGateway::LogBurn::SIGNATURE_HASH,
                    nonce,
                    alloy::primitives::keccak256(&to),
                ],
                data.into(),
            ),
        };
        let log = Log {
            inner,
            ..Default::default()
        };
        let (parsed_to, amount, parsed_nonce) = parse_burn_log(&log).unwrap();
        assert_eq!(parsed_to, to);
        assert_eq!(amount, U256::from(5000u64));
        assert_eq!(parsed_nonce, U256::from(42u64));
    }

    #[test]
    fn test_parse_burn_log_ignores_other_events() {
        let inner = alloy::primitives::Log {
            address: Address::ZERO,
            data: LogData::new_unchecked(
                vec![MintGateway::LogMint::SIGNATURE_HASH, B256::ZERO],
                Bytes::new(),
            ),
        };
        let log = Log {
            inner,
            ..Default::default()
        };
        assert!(parse_burn_log(&log).is_none());
    }

    #[test]
    fn test_new_rejects_bad_registry() {
        let config = EvmChainConfig {
            name: "Ethereum".into(),
            rpc_url: "http://localhost:8545".into(),
            private_key: None,
            gateway_registry: "not-an-address".into(),
            confirmations: 1,
        };
        assert!(EvmMintChain::new(&config).is_err());
    }
}
