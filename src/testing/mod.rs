//! Testing Utilities Module
//!
//! In-process stand-ins for the network and both chains, so a whole session can
//! run inside one test without endpoints.
//!
//! ## Submodules
//!
//! - `mock_provider` - RenVM node that signs with a fixed key
//! - `mock_chains` - Lock and mint chains driven by the test

pub mod mock_chains;
pub mod mock_provider;

pub use mock_chains::{MockLockChain, MockMintChain};
pub use mock_provider::{MockRenVm, MOCK_FEE};

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::rpc::RenVmProvider;
use crate::session::{EngineConfig, SessionEngine};

/// Handles on every mock behind a [`SessionEngine`]
#[derive(Debug, Clone)]
pub struct MockSetup {
    pub renvm: Arc<MockRenVm>,
    pub lock: Arc<MockLockChain>,
    pub mint: Arc<MockMintChain>,
    pub engine: SessionEngine,
}

impl MockSetup {
    /// Engine polling every few milliseconds, trusting the mock's signing key.
    /// RenVM and the lock chain both require `lock_confirmations`.
    pub fn new(lock_confirmations: u64, mint_confirmations: u64) -> Result<Self> {
        Self::with_targets(lock_confirmations, lock_confirmations, mint_confirmations)
    }

    /// Like [`Self::new`], with RenVM asking for `renvm_confirmations` on the lock chain
    pub fn with_targets(
        renvm_confirmations: u64,
        lock_confirmations: u64,
        mint_confirmations: u64,
    ) -> Result<Self> {
        let renvm = Arc::new(
            MockRenVm::new()?
                .with_pending_polls(1)
                .with_confirmation_target(renvm_confirmations),
        );
        let lock = Arc::new(MockLockChain::new(lock_confirmations));
        let mint = Arc::new(MockMintChain::new(mint_confirmations));
        let config = EngineConfig {
            mint_authority: Some(renvm.authority()?),
            ..EngineConfig::default()
        }
        .with_poll_interval(Duration::from_millis(5));
        let engine = SessionEngine::new(
            RenVmProvider::new(renvm.clone()),
            lock.clone(),
            mint.clone(),
            config,
        );
        Ok(Self {
            renvm,
            lock,
            mint,
            engine,
        })
    }
}
