//! RenVM RPC: transport, retry policy, method shapes and the typed client

pub mod methods;
pub mod provider;
pub mod renvm;
pub mod retry;

pub use methods::{
    AssetBlockState, ChainFees, ResponseQueryConfig, RenVmTransaction, RpcMethod, Shard,
    TransactionWithStatus,
};
pub use provider::{FallbackProvider, JsonRpcProvider, Provider};
pub use renvm::{RenVmProvider, DEFAULT_POLL_INTERVAL};
pub use retry::{RetryConfig, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY, DEFAULT_TIMEOUT};
