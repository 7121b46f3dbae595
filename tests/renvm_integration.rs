//! RenVM Node Integration Test
//!
//! Queries a live RenVM node and derives a gateway address from its current shard.
//!
//! ## Setup
//!
//! Set these environment variables (a `.env` file is read too):
//!
//! - `RENVM_RPC_URL` - RenVM JSON-RPC endpoint
//! - `RENVM_NETWORK` - `mainnet`, `testnet` or `devnet` (defaults to mainnet)
//!
//! ## Running
//!
//! ```bash
//! RENVM_RPC_URL=https://rpc.renproject.io \
//! cargo test --test renvm_integration -- --ignored --nocapture
//! ```

use renvm_rs::address::{self, is_valid_address};
use renvm_rs::hash::{gateway_hash, hash160, payload_hash_bytes, selector_hash};
use renvm_rs::types::Selector;
use renvm_rs::{derive_gateway_address, NetworkConfig};

#[tokio::test]
#[ignore = "requires a RenVM node: RENVM_RPC_URL"]
async fn test_live_node_shard_and_gateway() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .ok();

    if std::env::var("RENVM_RPC_URL").is_err() {
        eprintln!("Skipping: RENVM_RPC_URL not set");
        return;
    }
    let config = NetworkConfig::load().expect("config should load from env");
    let renvm = config.build_provider().expect("provider should build");

    let node = renvm.query_config().await.expect("ren_queryConfig should succeed");
    tracing::info!(network = %node.network, chains = node.confirmations.len(), "Node config");
    assert!(node.confirmations.contains_key("Bitcoin"));

    let fees = renvm
        .query_fees("BTC", "Ethereum")
        .await
        .expect("BTC block state should list Ethereum fees");
    tracing::info!(mint_fee = fees.mint_fee, burn_fee = fees.burn_fee, "BTC fees");

    let pubkey = renvm.select_shard("BTC").await.expect("BTC should have a shard");
    let shash = selector_hash(&Selector::mint("BTC", "Ethereum"));
    let ghash = gateway_hash(&payload_hash_bytes(&[]), &[1; 20], &shash, &[3; 32]);
    let testnet = config.network.is_testnet();
    let gateway = derive_gateway_address(&address::BITCOIN, testnet, &hash160(&pubkey), &ghash)
        .expect("gateway address should derive");
    tracing::info!(gateway = %gateway, "Derived gateway");
    assert!(is_valid_address(&address::BITCOIN, testnet, &gateway));
}
