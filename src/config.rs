//! Network configuration
//!
//! An explicit [`NetworkConfig`] value is passed to everything that talks to RenVM or
//! a chain; there are no process-wide registries. Presets cover the public networks and
//! [`NetworkConfig::load`] reads a `.env` file and environment variables on top.
//!
//! ## Environment
//!
//! | Variable | Meaning |
//! |---|---|
//! | `RENVM_NETWORK` | `mainnet`, `testnet` or `devnet` |
//! | `RENVM_RPC_URL` | comma-separated RenVM endpoints, tried in order |
//! | `RENVM_MINT_AUTHORITY` | expected signer address; derived from the shard key when unset |
//! | `RENVM_RETRIES` | retries per RPC call |
//! | `RENVM_TIMEOUT_SECS` | per-attempt RPC timeout |
//! | `RENVM_POLL_INTERVAL_MS` | `ren_queryTx` poll interval |
//! | `RENVM_CONFIRMATIONS` | overrides, e.g. `Bitcoin=1,Zcash=2` |
//! | `BLOCKSTREAM_API_URL` | UTXO indexer base URL |
//! | `EVM_RPC_URL`, `EVM_PRIVATE_KEY`, `EVM_GATEWAY_REGISTRY` | mint chain |

use eyre::{eyre, Result, WrapErr};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::rpc::{FallbackProvider, RenVmProvider, RetryConfig};
use crate::types::{EvmAddress, Network};

/// Ethereum GatewayRegistry on mainnet
pub const MAINNET_GATEWAY_REGISTRY: &str = "0xf36666C230Fa12333579b9Bd6196CB634D6BC506";
/// Ethereum GatewayRegistry on testnet
pub const TESTNET_GATEWAY_REGISTRY: &str = "0x5076a1F237531fa4dC8ad99bb68024aB6e1Ff701";

fn default_rpc_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "https://rpc.renproject.io",
        Network::Testnet => "https://rpc-testnet.renproject.io",
        Network::Devnet => "http://localhost:18515",
    }
}

fn default_blockstream_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "https://blockstream.info/api",
        _ => "https://blockstream.info/testnet/api",
    }
}

fn default_retries() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_evm_confirmations() -> u64 {
    1
}

/// Mint chain settings
#[derive(Clone)]
pub struct EvmChainConfig {
    /// Chain name as RenVM spells it, e.g. `Ethereum`
    pub name: String,
    pub rpc_url: String,
    /// Signer for mints and burns; read-only when unset
    pub private_key: Option<String>,
    pub gateway_registry: String,
    pub confirmations: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for EvmChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmChainConfig")
            .field("name", &self.name)
            .field("rpc_url", &self.rpc_url)
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "<redacted>"),
            )
            .field("gateway_registry", &self.gateway_registry)
            .field("confirmations", &self.confirmations)
            .finish()
    }
}

/// Everything needed to reach RenVM and the default chain adapters
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Network,
    /// RenVM endpoints, primary first
    pub rpc_urls: Vec<String>,
    pub mint_authority: Option<EvmAddress>,
    pub retries: u32,
    pub timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    /// Per-chain confirmation targets that take precedence over `ren_queryConfig`
    pub confirmation_overrides: BTreeMap<String, u64>,
    pub blockstream_url: String,
    pub evm: Option<EvmChainConfig>,
}

impl NetworkConfig {
    /// Preset for `network` with public endpoints
    pub fn preset(network: Network) -> Self {
        Self {
            network,
            rpc_urls: vec![default_rpc_url(network).to_string()],
            mint_authority: None,
            retries: default_retries(),
            timeout_secs: default_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_overrides: BTreeMap::new(),
            blockstream_url: default_blockstream_url(network).to_string(),
            evm: None,
        }
    }

    pub fn mainnet() -> Self {
        Self::preset(Network::Mainnet)
    }

    pub fn testnet() -> Self {
        Self::preset(Network::Testnet)
    }

    pub fn devnet() -> Self {
        Self::preset(Network::Devnet)
    }

    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to the network preset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let network: Network = match lookup("RENVM_NETWORK") {
            Some(raw) => raw
                .parse()
                .map_err(|e| eyre!("RENVM_NETWORK: {}", e))?,
            None => Network::Testnet,
        };
        let mut config = Self::preset(network);

        if let Some(raw) = lookup("RENVM_RPC_URL") {
            let urls = parse_rpc_urls(&raw);
            if urls.is_empty() {
                return Err(eyre!("RENVM_RPC_URL cannot be empty"));
            }
            config.rpc_urls = urls;
        }

        config.mint_authority = match lookup("RENVM_MINT_AUTHORITY") {
            Some(raw) => Some(
                EvmAddress::from_hex(raw.trim())
                    .map_err(|e| eyre!("RENVM_MINT_AUTHORITY: {}", e))?,
            ),
            None => None,
        };

        config.retries = lookup("RENVM_RETRIES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_retries());
        config.timeout_secs = lookup("RENVM_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_timeout_secs());
        config.retry_delay_ms = lookup("RENVM_RETRY_DELAY_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_retry_delay_ms());
        config.poll_interval_ms = lookup("RENVM_POLL_INTERVAL_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_poll_interval_ms());

        if let Some(raw) = lookup("RENVM_CONFIRMATIONS") {
            config.confirmation_overrides = parse_confirmations(&raw)?;
        }

        if let Some(url) = lookup("BLOCKSTREAM_API_URL") {
            config.blockstream_url = url.trim_end_matches('/').to_string();
        }

        if let Some(rpc_url) = lookup("EVM_RPC_URL") {
            let default_registry = match network {
                Network::Mainnet => MAINNET_GATEWAY_REGISTRY,
                _ => TESTNET_GATEWAY_REGISTRY,
            };
            config.evm = Some(EvmChainConfig {
                name: lookup("EVM_CHAIN_NAME").unwrap_or_else(|| "Ethereum".to_string()),
                rpc_url,
                private_key: lookup("EVM_PRIVATE_KEY"),
                gateway_registry: lookup("EVM_GATEWAY_REGISTRY")
                    .unwrap_or_else(|| default_registry.to_string()),
                confirmations: lookup("EVM_CONFIRMATIONS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_evm_confirmations()),
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.rpc_urls.is_empty() {
            return Err(eyre!("at least one RenVM RPC URL is required"));
        }
        for url in &self.rpc_urls {
            url::Url::parse(url).wrap_err_with(|| format!("Invalid RPC URL: {}", url))?;
        }
        if self.timeout_secs == 0 {
            return Err(eyre!("RENVM_TIMEOUT_SECS must be greater than zero"));
        }
        if let Some(evm) = &self.evm {
            if evm.gateway_registry.len() != 42 || !evm.gateway_registry.starts_with("0x") {
                return Err(eyre!(
                    "evm.gateway_registry must be a valid hex address (42 chars with 0x prefix)"
                ));
            }
            if let Some(key) = &evm.private_key {
                if key.len() != 66 || !key.starts_with("0x") {
                    return Err(eyre!("evm.private_key must be 66 chars (0x + 64 hex chars)"));
                }
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.retries, self.timeout())
            .with_delay(Duration::from_millis(self.retry_delay_ms))
    }

    /// RenVM client over every configured endpoint
    pub fn build_provider(&self) -> crate::Result<RenVmProvider> {
        let delay = Duration::from_millis(self.retry_delay_ms);
        let providers = self
            .rpc_urls
            .iter()
            .map(|url| {
                crate::rpc::JsonRpcProvider::new(url).map(|p| {
                    Arc::new(p.with_retry_delay(delay)) as Arc<dyn crate::rpc::Provider>
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;
        let fallback = FallbackProvider::new(providers)?;
        Ok(RenVmProvider::new(Arc::new(fallback))
            .with_retries(self.retries)
            .with_timeout(self.timeout()))
    }
}

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `Chain=n,Chain=n`
pub fn parse_confirmations(raw: &str) -> Result<BTreeMap<String, u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (chain, count) = entry
                .split_once('=')
                .ok_or_else(|| eyre!("expected Chain=count, got {}", entry))?;
            let count = count
                .trim()
                .parse()
                .wrap_err_with(|| format!("invalid confirmation count for {}", chain))?;
            Ok((chain.trim().to_string(), count))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_retries(), 2);
        assert_eq!(default_timeout_secs(), 120);
        assert_eq!(default_retry_delay_ms(), 1000);
        assert_eq!(default_poll_interval_ms(), 15_000);
    }

    #[test]
    fn test_presets() {
        let mainnet = NetworkConfig::mainnet();
        assert_eq!(mainnet.network, Network::Mainnet);
        assert_eq!(mainnet.blockstream_url, "https://blockstream.info/api");
        assert!(mainnet.validate().is_ok());

        let testnet = NetworkConfig::testnet();
        assert_eq!(testnet.blockstream_url, "https://blockstream.info/testnet/api");
        assert_eq!(testnet.poll_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = NetworkConfig::from_lookup(lookup_from(&[
            ("RENVM_NETWORK", "mainnet"),
            ("RENVM_RPC_URL", " https://a.example , https://b.example "),
            ("RENVM_MINT_AUTHORITY", "0x04084f1cACCB87Dcab9a29a084281294dA96Bf44"),
            ("RENVM_RETRIES", "4"),
            ("RENVM_CONFIRMATIONS", "Bitcoin=1, Zcash=3"),
        ]))
        .unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.rpc_urls, vec!["https://a.example", "https://b.example"]);
        assert_eq!(config.retries, 4);
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.confirmation_overrides["Zcash"], 3);
        assert!(config.mint_authority.is_some());
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(NetworkConfig::from_lookup(lookup_from(&[("RENVM_NETWORK", "moon")])).is_err());
        assert!(NetworkConfig::from_lookup(lookup_from(&[("RENVM_RPC_URL", ",")])).is_err());
        assert!(NetworkConfig::from_lookup(lookup_from(&[(
            "RENVM_MINT_AUTHORITY",
            "0x1234"
        )]))
        .is_err());
    }

    #[test]
    fn test_evm_private_key_validation_and_redaction() {
        let config = NetworkConfig::from_lookup(lookup_from(&[
            ("EVM_RPC_URL", "http://localhost:8545"),
            (
                "EVM_PRIVATE_KEY",
                "0x0000000000000000000000000000000000000000000000000000000000000001",
            ),
        ]))
        .unwrap();
        let evm = config.evm.as_ref().unwrap();
        assert_eq!(evm.gateway_registry, TESTNET_GATEWAY_REGISTRY);
        let debug = format!("{:?}", evm);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("0000000000000001"));

        assert!(NetworkConfig::from_lookup(lookup_from(&[
            ("EVM_RPC_URL", "http://localhost:8545"),
            ("EVM_PRIVATE_KEY", "0x123"),
        ]))
        .is_err());
    }

    #[test]
    fn test_parse_rpc_urls_ignores_empty() {
        assert_eq!(
            parse_rpc_urls("https://a.com,,https://b.com,"),
            vec!["https://a.com", "https://b.com"]
        );
        assert!(parse_rpc_urls("").is_empty());
    }

    #[test]
    fn test_parse_confirmations_errors() {
        assert!(parse_confirmations("Bitcoin").is_err());
        assert!(parse_confirmations("Bitcoin=x").is_err());
    }

    #[test]
    fn test_build_provider() {
        let provider = NetworkConfig::testnet().build_provider().unwrap();
        assert_eq!(provider.endpoint(), "https://rpc-testnet.renproject.io/");
    }
}
