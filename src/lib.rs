//! RenVM-RS: Client Core for RenVM Cross-Chain Transfers
//!
//! This crate moves assets between a lock chain (Bitcoin and other UTXO chains)
//! and a mint chain (EVM) through the RenVM network:
//!
//! - **Pack** - RenVM's typed value format, binary and JSON transport encodings
//! - **Hash Computation** - pHash, gHash, nHash, sighash and transaction hashes
//! - **Signatures** - Low-S canonicalization and mint-authority recovery
//! - **Gateway Addresses** - Per-session P2SH deposit addresses for UTXO chains
//! - **RPC** - JSON-RPC provider with retries, fallback and typed RenVM methods
//! - **Sessions** - Lock-and-mint and burn-and-release state machines
//! - **Chains** - Capability traits plus Bitcoin and EVM adapters
//! - **Testing Module** - In-process RenVM node and scripted chains
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! renvm-rs = { path = "../renvm-rs" }
//! ```
//!
//! ## Feature Flags
//!
//! - `evm` - EVM mint chain adapter (default)
//! - `utxo` - Bitcoin lock chain adapter over Blockstream (default)
//! - `testing` - Mocks for tests in downstream crates
//! - `full` - Enable all features

// Core modules (always available)
pub mod address;
pub mod chain;
pub mod chains;
pub mod config;
pub mod error;
pub mod hash;
pub mod pack;
pub mod rpc;
pub mod session;
pub mod signature;
pub mod tx;
pub mod types;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used items at the crate root
pub use error::{RenVmError, Result};

pub use hash::{
    bytes32_to_hex, gateway_hash, keccak256, nonce_hash, payload_hash, payload_hash_bytes, sighash,
    transaction_hash_b64,
};

pub use address::{derive_gateway_address, gateway_script, is_valid_address, AddressFamily};
pub use chain::{BurnDetails, CallArg, ContractCall, LockChain, LockDeposit, MintChain};
pub use config::{EvmChainConfig, NetworkConfig};
pub use pack::{PackType, PackValue, TypedValue};
pub use rpc::{FallbackProvider, JsonRpcProvider, Provider, RenVmProvider};
pub use session::{
    BurnEvent, BurnHandle, BurnState, DepositState, EngineConfig, GatewayEvent, GatewayHandle,
    GatewaySession, GatewayState, SessionEngine,
};
pub use signature::{fix_signature, Signature};
pub use tx::{MintParams, Transaction};
pub use types::{EvmAddress, Network, Selector, TxStatus};
