//! Scripted chain adapters
//!
//! [`MockLockChain`] serves deposits added by the test and confirms them one block
//! per poll. [`MockMintChain`] records every mint and burn so tests can assert on
//! what the engine submitted.

use alloy::primitives::U256;
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::address::{self, AddressFamily};
use crate::chain::{BurnDetails, ContractCall, DepositSender, LockChain, LockDeposit, MintChain, MintSubmission};
use crate::chains::asset_decimals;
use crate::types::EvmAddress;

fn poisoned<T>(_: T) -> eyre::Report {
    eyre!("mock state poisoned")
}

/// Lock chain with test-controlled deposits
#[derive(Debug)]
pub struct MockLockChain {
    target: u64,
    deposits: Mutex<Vec<LockDeposit>>,
    confirmations: Mutex<HashMap<String, u64>>,
    scans: AtomicU32,
}

impl MockLockChain {
    pub fn new(target: u64) -> Self {
        Self {
            target,
            deposits: Mutex::new(Vec::new()),
            confirmations: Mutex::new(HashMap::new()),
            scans: AtomicU32::new(0),
        }
    }

    /// Make a deposit of `amount` visible at every gateway address
    pub fn add_deposit(&self, seed: u8, amount: u64) -> Result<LockDeposit> {
        self.add_output(seed, 0, amount)
    }

    /// Like [`Self::add_deposit`], for output `vout` of the transaction named by `seed`
    pub fn add_output(&self, seed: u8, vout: u32, amount: u64) -> Result<LockDeposit> {
        let txid = vec![seed; 32];
        let deposit = LockDeposit {
            tx_hash: hex::encode(&txid),
            txid,
            txindex: vout,
            amount: U256::from(amount),
            raw: None,
        };
        self.deposits.lock().map_err(poisoned)?.push(deposit.clone());
        Ok(deposit)
    }

    pub fn scans(&self) -> u32 {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockChain for MockLockChain {
    fn name(&self) -> &str {
        "Bitcoin"
    }

    fn address_family(&self) -> AddressFamily {
        address::BITCOIN
    }

    fn is_testnet(&self) -> bool {
        true
    }

    async fn get_deposits(&self, _address: &str, on_deposit: &DepositSender) -> Result<()> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let deposits = self.deposits.lock().map_err(poisoned)?.clone();
        for deposit in deposits {
            on_deposit
                .send(deposit)
                .map_err(|_| eyre!("deposit receiver closed"))?;
        }
        Ok(())
    }

    async fn get_confirmations(&self, deposit: &LockDeposit) -> Result<(u64, u64)> {
        let mut confirmations = self.confirmations.lock().map_err(poisoned)?;
        let current = confirmations.entry(deposit.tx_hash.clone()).or_insert(0);
        *current += 1;
        Ok((*current, self.target))
    }

    fn tx_id_bytes(&self, tx_hash: &str) -> Result<Vec<u8>> {
        hex::decode(tx_hash).map_err(|e| eyre!("Invalid txid {}: {}", tx_hash, e))
    }

    fn address_is_valid(&self, address: &str) -> bool {
        address::is_valid_address(&address::BITCOIN, true, address)
    }

    fn asset_decimals(&self, asset: &str) -> u8 {
        asset_decimals(asset)
    }
}

/// Mint chain that records submissions instead of sending them
#[derive(Debug)]
pub struct MockMintChain {
    target: u64,
    mints: Mutex<Vec<MintSubmission>>,
    calls: Mutex<Vec<ContractCall>>,
    burns: Mutex<Vec<BurnDetails>>,
    burn_nonce: AtomicU64,
    confirmations: Mutex<HashMap<String, u64>>,
    fail_mints: AtomicU32,
}

impl MockMintChain {
    pub fn new(target: u64) -> Self {
        Self {
            target,
            mints: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            burns: Mutex::new(Vec::new()),
            burn_nonce: AtomicU64::new(0),
            confirmations: Mutex::new(HashMap::new()),
            fail_mints: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` mint submissions
    pub fn fail_next_mints(&self, count: u32) {
        self.fail_mints.store(count, Ordering::SeqCst);
    }

    pub fn mints(&self) -> Vec<MintSubmission> {
        self.mints.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn contract_calls(&self) -> Vec<ContractCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn burns(&self) -> Vec<BurnDetails> {
        self.burns.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MintChain for MockMintChain {
    fn name(&self) -> &str {
        "Ethereum"
    }

    async fn resolve_gateway_contract(&self, _asset: &str) -> Result<String> {
        Ok(EvmAddress([0x6a; 20]).as_hex())
    }

    fn address_to_bytes(&self, address: &str) -> Result<Vec<u8>> {
        Ok(EvmAddress::from_hex(address)?.0.to_vec())
    }

    fn address_is_valid(&self, address: &str) -> bool {
        EvmAddress::from_hex(address).is_ok()
    }

    async fn submit_mint(&self, calls: &[ContractCall], mint: &MintSubmission) -> Result<String> {
        let remaining = self.fail_mints.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_mints.store(remaining - 1, Ordering::SeqCst);
            return Err(eyre!("execution reverted: mock failure"));
        }
        let mut mints = self.mints.lock().map_err(poisoned)?;
        mints.push(mint.clone());
        self.calls.lock().map_err(poisoned)?.extend_from_slice(calls);
        Ok(format!("0x{:064x}", mints.len()))
    }

    async fn find_mint(&self, _asset: &str, sighash: &[u8; 32]) -> Result<Option<String>> {
        let mints = self.mints.lock().map_err(poisoned)?;
        Ok(mints
            .iter()
            .position(|m| &m.sighash == sighash)
            .map(|i| format!("0x{:064x}", i + 1)))
    }

    async fn submit_burn(&self, _asset: &str, to: &str, amount: U256) -> Result<BurnDetails> {
        let nonce = self.burn_nonce.fetch_add(1, Ordering::SeqCst);
        let details = BurnDetails {
            tx_hash: format!("0x{:064x}", 0xb000 + nonce),
            to: to.to_string(),
            amount,
            nonce: U256::from(nonce),
        };
        self.burns.lock().map_err(poisoned)?.push(details.clone());
        Ok(details)
    }

    async fn get_confirmations(&self, tx_hash: &str) -> Result<(u64, u64)> {
        let mut confirmations = self.confirmations.lock().map_err(poisoned)?;
        let current = confirmations.entry(tx_hash.to_string()).or_insert(0);
        *current += 1;
        Ok((*current, self.target))
    }

    fn asset_decimals(&self, asset: &str) -> u8 {
        asset_decimals(asset)
    }
}
