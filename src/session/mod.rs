//! Session lifecycle engine
//!
//! A [`SessionEngine`] owns the RenVM client and the two chains a session moves
//! funds between. Opening a session spawns its machine as a tokio task and returns
//! a handle for commands plus a receiver for progress events:
//!
//! - **gateway** ([`gateway`]): lock-and-mint. Derives the gateway address, watches it
//!   for deposits and runs one [`deposit`] task per deposit.
//! - **burn** ([`burn`]): burn-and-release for a single burn.
//!
//! Tasks only talk through channels. The gateway task is the single writer of the
//! session's transaction map; deposit tasks report updates to it and receive
//! commands tagged with their source transaction hash.

pub mod burn;
pub mod deposit;
pub mod events;
pub mod gateway;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::chain::{LockChain, MintChain};
use crate::config::NetworkConfig;
use crate::error::{RenVmError, Result};
use crate::rpc::{RenVmProvider, DEFAULT_POLL_INTERVAL};
use crate::types::EvmAddress;

pub use burn::{restore_burn_state, BurnHandle};
pub use deposit::restore_deposit_state;
pub use events::{BurnEvent, BurnEvents, GatewayEvent, GatewayEvents};
pub use gateway::{restore_gateway_state, GatewayHandle};
pub use types::{
    now_millis, time_nonce, BurnState, DepositState, Direction, GatewayParams, GatewaySession,
    GatewayState, GatewayTransaction, RenRelease, RenSignature,
};

/// Timing and trust settings for running sessions
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between RenVM and confirmation polls
    pub poll_interval: Duration,
    /// Interval between deposit scans of a gateway address
    pub discovery_interval: Duration,
    /// Expected signer of mint signatures; derived from the shard key when unset
    pub mint_authority: Option<EvmAddress>,
    /// Overrides the lock chain's confirmation target
    pub lock_confirmations: Option<u64>,
    /// Overrides the mint chain's confirmation target for burns
    pub mint_confirmations: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            discovery_interval: DEFAULT_POLL_INTERVAL,
            mint_authority: None,
            lock_confirmations: None,
            mint_confirmations: None,
        }
    }
}

impl EngineConfig {
    /// Settings for sessions between `lock_chain` and `mint_chain` under `config`
    pub fn from_network(config: &NetworkConfig, lock_chain: &str, mint_chain: &str) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            discovery_interval: config.poll_interval(),
            mint_authority: config.mint_authority,
            lock_confirmations: config.confirmation_overrides.get(lock_chain).copied(),
            mint_confirmations: config.confirmation_overrides.get(mint_chain).copied(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.discovery_interval = interval;
        self
    }
}

/// Everything a running session needs, shared by its tasks
pub(crate) struct EngineContext {
    pub renvm: RenVmProvider,
    pub lock: Arc<dyn LockChain>,
    pub mint: Arc<dyn MintChain>,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn lock_error(&self, source: eyre::Report) -> RenVmError {
        RenVmError::chain(self.lock.name(), source)
    }

    pub fn mint_error(&self, source: eyre::Report) -> RenVmError {
        RenVmError::chain(self.mint.name(), source)
    }
}

/// Runs gateway and burn sessions between one lock chain and one mint chain
#[derive(Clone)]
pub struct SessionEngine {
    ctx: Arc<EngineContext>,
}

impl SessionEngine {
    pub fn new(
        renvm: RenVmProvider,
        lock: Arc<dyn LockChain>,
        mint: Arc<dyn MintChain>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(EngineContext {
                renvm,
                lock,
                mint,
                config,
            }),
        }
    }

    pub fn renvm(&self) -> &RenVmProvider {
        &self.ctx.renvm
    }

    /// Gateway address and parameters `session` would listen on, without starting it
    pub async fn derive_gateway(&self, session: &GatewaySession) -> Result<GatewayParams> {
        gateway::derive_gateway(&self.ctx, session).await
    }

    /// Start (or resume) a lock-and-mint session
    pub fn open_gateway(&self, session: GatewaySession) -> Result<(GatewayHandle, GatewayEvents)> {
        if session.direction != Direction::Mint {
            return Err(RenVmError::guard("burn session", "open_gateway"));
        }
        let recipient = session
            .contract_calls
            .last()
            .map(|call| call.to.as_str())
            .unwrap_or(&session.dest_address);
        if !self.ctx.mint.address_is_valid(recipient) {
            return Err(RenVmError::InvalidAddress {
                address: recipient.to_string(),
                reason: format!("not a valid {} address", self.ctx.mint.name()),
            });
        }
        Ok(gateway::spawn(self.ctx.clone(), session))
    }

    /// Start (or resume) a burn-and-release session
    pub fn open_burn(&self, session: GatewaySession) -> Result<(BurnHandle, BurnEvents)> {
        if session.direction != Direction::Burn {
            return Err(RenVmError::guard("mint session", "open_burn"));
        }
        if !self.ctx.lock.address_is_valid(&session.dest_address) {
            return Err(RenVmError::InvalidAddress {
                address: session.dest_address.clone(),
                reason: format!("not a valid {} address", self.ctx.lock.name()),
            });
        }
        if session.target_amount.is_none() && session.transactions.is_empty() {
            return Err(RenVmError::Config("burn session has no amount".into()));
        }
        Ok(burn::spawn(self.ctx.clone(), session))
    }
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("renvm", &self.ctx.renvm)
            .field("lock", &self.ctx.lock.name())
            .field("mint", &self.ctx.mint.name())
            .field("config", &self.ctx.config)
            .finish()
    }
}
