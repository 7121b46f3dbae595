//! Per-deposit machine
//!
//! Each deposit runs as its own task: wait for source confirmations, get the mint
//! signed by RenVM, wait for the caller to authorize the claim, submit it on the mint
//! chain. The task never touches the session; every change goes to the gateway task
//! as a [`DepositMessage`].

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::{ContractCall, MintSubmission};
use crate::error::{RenVmError, Result};
use crate::hash::{nonce_hash, sighash};
use crate::signature::{authority_from_pubkey, fix_signature, fix_signature_simple, verify_sighash, Signature};
use crate::tx::{build_mint_transaction, MintOutput, MintParams};
use crate::types::{Selector, TxStatus};

use super::types::{DepositState, GatewayParams, GatewayTransaction, RenSignature};
use super::EngineContext;

/// Where a persisted deposit resumes
///
/// Guards are checked from the most advanced state down, so a restore never
/// repeats a step that already happened.
pub fn restore_deposit_state(tx: &GatewayTransaction) -> DepositState {
    if tx.completed {
        DepositState::Completed
    } else if tx.dest_tx_hash.is_some() {
        DepositState::DestInitiated
    } else if tx.rejected {
        DepositState::Rejected
    } else if tx.ren_signature.is_some() {
        DepositState::Accepted
    } else if tx.is_confirmed() {
        DepositState::SrcConfirmed
    } else if !tx.source_tx_hash.is_empty() && !tx.source_txid.is_empty() {
        DepositState::SrcSettling
    } else {
        DepositState::ErrorRestoring
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepositAction {
    Sign,
    Reject,
    Acknowledge,
    Retry,
}

impl fmt::Display for DepositAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DepositAction::Sign => "sign",
            DepositAction::Reject => "reject",
            DepositAction::Acknowledge => "acknowledge",
            DepositAction::Retry => "retry",
        })
    }
}

/// Caller command routed to one deposit
#[derive(Debug)]
pub(crate) struct DepositCommand {
    pub deposit_id: String,
    pub action: DepositAction,
    pub reply: oneshot::Sender<Result<()>>,
}

/// Change reported by a deposit task
#[derive(Debug, Clone)]
pub(crate) enum DepositUpdate {
    Confirmations { current: u64, target: u64 },
    State(DepositState),
    RenHash(String),
    Signed(RenSignature),
    DestTxHash(String),
    Error(String),
}

#[derive(Debug, Clone)]
pub(crate) struct DepositMessage {
    pub deposit_id: String,
    pub update: DepositUpdate,
}

/// Session fields every deposit of a gateway shares
#[derive(Debug, Clone)]
pub(crate) struct DepositContext {
    pub asset: String,
    pub selector: Selector,
    pub nonce: [u8; 32],
    pub dest_address: String,
    pub contract_calls: Vec<ContractCall>,
    pub gateway: GatewayParams,
}

/// Start a deposit task resuming at `state`
pub(crate) fn spawn(
    ctx: Arc<EngineContext>,
    shared: Arc<DepositContext>,
    tx: GatewayTransaction,
    state: DepositState,
    updates: mpsc::UnboundedSender<DepositMessage>,
) -> (mpsc::UnboundedSender<DepositCommand>, JoinHandle<()>) {
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let machine = DepositMachine {
        deposit_id: tx.deposit_id(),
        state,
        tx,
        ctx,
        shared,
        updates,
        commands,
        deferred: VecDeque::new(),
    };
    (commands_tx, tokio::spawn(machine.run()))
}

struct DepositMachine {
    deposit_id: String,
    state: DepositState,
    tx: GatewayTransaction,
    ctx: Arc<EngineContext>,
    shared: Arc<DepositContext>,
    updates: mpsc::UnboundedSender<DepositMessage>,
    commands: mpsc::UnboundedReceiver<DepositCommand>,
    /// Commands that arrived during a lookup, answered once it finishes
    deferred: VecDeque<DepositCommand>,
}

impl DepositMachine {
    async fn run(mut self) {
        debug!(deposit_id = %self.deposit_id, state = %self.state, "Deposit task started");
        loop {
            let next = match self.state {
                DepositState::SrcSettling => self.settle().await,
                DepositState::SrcConfirmed => self.request_signature().await,
                DepositState::ErrorAccepting => self.await_retry().await,
                DepositState::Accepted | DepositState::ErrorSubmitting => self.await_claim().await,
                DepositState::Claiming => self.claim().await,
                DepositState::DestInitiated => self.await_acknowledgement().await,
                DepositState::RestoringDeposit
                | DepositState::RestoredDeposit
                | DepositState::ErrorRestoring
                | DepositState::Rejected
                | DepositState::Completed => break,
            };
            match next {
                Some(state) => self.transition(state),
                // gateway task is gone
                None => break,
            }
        }
        debug!(deposit_id = %self.deposit_id, state = %self.state, "Deposit task finished");
    }

    fn send(&self, update: DepositUpdate) {
        let _ = self.updates.send(DepositMessage {
            deposit_id: self.deposit_id.clone(),
            update,
        });
    }

    fn transition(&mut self, state: DepositState) {
        debug!(deposit_id = %self.deposit_id, from = %self.state, to = %state, "Deposit transition");
        self.state = state;
        self.send(DepositUpdate::State(state));
    }

    fn report(&mut self, error: &RenVmError) {
        warn!(deposit_id = %self.deposit_id, state = %self.state, error = %error, "Deposit step failed");
        self.tx.error = Some(error.to_string());
        self.send(DepositUpdate::Error(error.to_string()));
    }

    /// Whether `command` is addressed to this deposit; answers it when it is not
    fn owns(&self, command: DepositCommand) -> Option<DepositCommand> {
        if command.deposit_id == self.deposit_id {
            return Some(command);
        }
        warn!(
            deposit_id = %self.deposit_id,
            command_for = %command.deposit_id,
            "Ignoring command for another deposit"
        );
        let _ = command
            .reply
            .send(Err(RenVmError::guard(self.state, format!("{} {}", command.action, command.deposit_id))));
        None
    }

    fn refuse(&self, command: DepositCommand) {
        if let Some(command) = self.owns(command) {
            let _ = command
                .reply
                .send(Err(RenVmError::guard(self.state, command.action)));
        }
    }

    /// Drive `work` to completion, refusing commands meanwhile. `None` if the gateway went away.
    async fn busy<F: Future>(&mut self, work: F) -> Option<F::Output> {
        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return Some(output),
                command = self.commands.recv() => match command {
                    Some(command) => self.refuse(command),
                    None => return None,
                },
            }
        }
    }

    /// Like [`Self::busy`] but keeps commands for [`Self::next_command`]
    async fn deferring<F: Future>(&mut self, work: F) -> Option<F::Output> {
        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return Some(output),
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(command) = self.owns(command) {
                            self.deferred.push_back(command);
                        }
                    }
                    None => return None,
                },
            }
        }
    }

    /// Next command for this deposit, `None` if the gateway went away
    async fn next_command(&mut self) -> Option<DepositCommand> {
        if let Some(command) = self.deferred.pop_front() {
            return Some(command);
        }
        loop {
            let command = self.commands.recv().await?;
            if let Some(command) = self.owns(command) {
                return Some(command);
            }
        }
    }

    // ------------------------------------------------------------------------
    // States
    // ------------------------------------------------------------------------

    async fn settle(&mut self) -> Option<DepositState> {
        let ctx = self.ctx.clone();
        let deposit = self.tx.to_deposit();
        loop {
            match self.busy(ctx.lock.get_confirmations(&deposit)).await? {
                Ok((current, reported)) => {
                    let target = ctx
                        .config
                        .lock_confirmations
                        .or(self.shared.gateway.confirmation_target)
                        .unwrap_or(reported);
                    if self.tx.record_confirmations(current, target) {
                        debug!(
                            deposit_id = %self.deposit_id,
                            confirmations = self.tx.source_tx_confs,
                            target = target,
                            "Deposit confirmations"
                        );
                        self.send(DepositUpdate::Confirmations {
                            current: self.tx.source_tx_confs,
                            target,
                        });
                    }
                    if self.tx.is_confirmed() {
                        return Some(DepositState::SrcConfirmed);
                    }
                }
                Err(e) => {
                    warn!(deposit_id = %self.deposit_id, error = %e, "Failed to fetch confirmations");
                }
            }
            self.busy(tokio::time::sleep(ctx.config.poll_interval)).await?;
        }
    }

    async fn request_signature(&mut self) -> Option<DepositState> {
        match self.submit_and_wait().await? {
            Ok(signature) => {
                info!(
                    deposit_id = %self.deposit_id,
                    amount = %signature.amount,
                    sighash = %hex::encode(signature.sighash),
                    "Deposit signed by RenVM"
                );
                self.tx.ren_signature = Some(signature.clone());
                self.tx.error = None;
                self.send(DepositUpdate::Signed(signature));
                Some(DepositState::Accepted)
            }
            Err(e) => {
                self.report(&e);
                Some(DepositState::ErrorAccepting)
            }
        }
    }

    fn mint_params(&self) -> MintParams {
        let gateway = &self.shared.gateway;
        MintParams {
            txid: self.tx.source_txid.clone(),
            txindex: self.tx.source_tx_index,
            amount: self.tx.source_tx_amount,
            payload: gateway.payload.clone(),
            phash: gateway.phash,
            to: gateway.to_field(),
            nonce: self.shared.nonce,
            nhash: nonce_hash(&self.shared.nonce, &self.tx.source_txid, self.tx.source_tx_index),
            gpubkey: gateway.gpubkey.clone(),
            ghash: gateway.ghash,
        }
    }

    /// Submit the mint to RenVM and wait for its signature
    async fn submit_and_wait(&mut self) -> Option<Result<RenSignature>> {
        let params = self.mint_params();
        let transaction = match build_mint_transaction(self.shared.selector.clone(), &params) {
            Ok(transaction) => transaction,
            Err(e) => return Some(Err(e)),
        };
        if self.tx.ren_vm_hash.as_deref() != Some(transaction.hash.as_str()) {
            self.tx.ren_vm_hash = Some(transaction.hash.clone());
            self.send(DepositUpdate::RenHash(transaction.hash.clone()));
        }

        let ctx = self.ctx.clone();
        if let Err(e) = self.busy(ctx.renvm.submit_tx_with_recovery(&transaction)).await? {
            return Some(Err(e));
        }

        let deposit_id = self.deposit_id.clone();
        let closed = self.updates.clone();
        let result = self
            .busy(ctx.renvm.wait_for_tx(
                &transaction.hash,
                move |status: TxStatus| debug!(deposit_id = %deposit_id, status = %status, "RenVM status"),
                move || closed.is_closed(),
                ctx.config.poll_interval,
            ))
            .await?;

        Some(result.and_then(|done| {
            let output = done
                .tx
                .output
                .ok_or_else(|| RenVmError::decode("out", "done transaction has no output"))?;
            let out = MintOutput::from_pack(&output.v)?;
            if let Some(reason) = out.revert.clone() {
                return Err(RenVmError::Reverted {
                    hash: transaction.hash.clone(),
                    reason,
                });
            }

            let gateway = &self.shared.gateway;
            let expected = sighash(&gateway.phash, out.amount, &gateway.to, &gateway.shash, &params.nhash);
            verify_sighash(&expected, &out.sighash, &transaction.hash);

            let signature = self.fix(&out)?;
            Ok(RenSignature {
                amount: out.amount,
                phash: params.phash,
                nhash: params.nhash,
                sighash: out.sighash,
                signature: signature.to_hex(),
            })
        }))
    }

    fn fix(&self, out: &MintOutput) -> Result<Signature> {
        let authority = self
            .ctx
            .config
            .mint_authority
            .or_else(|| authority_from_pubkey(&self.shared.gateway.gpubkey).ok());
        match authority {
            Some(authority) => fix_signature(&out.signature, &out.sighash, &authority),
            None => {
                warn!(deposit_id = %self.deposit_id, "No mint authority known, canonicalizing signature only");
                Ok(fix_signature_simple(&out.signature))
            }
        }
    }

    async fn await_retry(&mut self) -> Option<DepositState> {
        loop {
            let command = self.next_command().await?;
            match command.action {
                DepositAction::Retry => {
                    let _ = command.reply.send(Ok(()));
                    return Some(DepositState::SrcConfirmed);
                }
                DepositAction::Reject => {
                    let _ = command.reply.send(Ok(()));
                    return Some(DepositState::Rejected);
                }
                action => {
                    let _ = command.reply.send(Err(RenVmError::guard(self.state, action)));
                }
            }
        }
    }

    async fn await_claim(&mut self) -> Option<DepositState> {
        if self.state == DepositState::Accepted {
            if let Some(signature) = self.tx.ren_signature.clone() {
                let ctx = self.ctx.clone();
                let asset = self.shared.asset.clone();
                let found = self
                    .deferring(ctx.mint.find_mint(&asset, &signature.sighash))
                    .await?;
                match found {
                    Ok(Some(dest_tx_hash)) => {
                        info!(deposit_id = %self.deposit_id, dest_tx_hash = %dest_tx_hash, "Deposit already minted");
                        self.tx.dest_tx_hash = Some(dest_tx_hash.clone());
                        self.send(DepositUpdate::DestTxHash(dest_tx_hash));
                        return Some(DepositState::DestInitiated);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(deposit_id = %self.deposit_id, error = %e, "Failed to look up existing mint"),
                }
            }
        }

        loop {
            let command = self.next_command().await?;
            match command.action {
                DepositAction::Sign => {
                    let _ = command.reply.send(Ok(()));
                    return Some(DepositState::Claiming);
                }
                DepositAction::Reject => {
                    let _ = command.reply.send(Ok(()));
                    info!(deposit_id = %self.deposit_id, "Deposit rejected");
                    return Some(DepositState::Rejected);
                }
                action => {
                    let _ = command.reply.send(Err(RenVmError::guard(self.state, action)));
                }
            }
        }
    }

    async fn claim(&mut self) -> Option<DepositState> {
        let submission = match self.submission() {
            Ok(submission) => submission,
            Err(e) => {
                self.report(&e);
                return Some(DepositState::ErrorSubmitting);
            }
        };

        let ctx = self.ctx.clone();
        let calls = self.shared.contract_calls.clone();
        match self.busy(ctx.mint.submit_mint(&calls, &submission)).await? {
            Ok(dest_tx_hash) => {
                info!(deposit_id = %self.deposit_id, dest_tx_hash = %dest_tx_hash, "Mint submitted");
                self.tx.dest_tx_hash = Some(dest_tx_hash.clone());
                self.send(DepositUpdate::DestTxHash(dest_tx_hash));
                Some(DepositState::DestInitiated)
            }
            Err(e) => {
                let error = ctx.mint_error(e);
                self.report(&error);
                Some(DepositState::ErrorSubmitting)
            }
        }
    }

    fn submission(&self) -> Result<MintSubmission> {
        let signature = self
            .tx
            .ren_signature
            .as_ref()
            .ok_or_else(|| RenVmError::guard(self.state, "claim without signature"))?;
        Ok(MintSubmission {
            asset: self.shared.asset.clone(),
            to: self.shared.dest_address.clone(),
            amount: signature.amount,
            phash: signature.phash,
            nhash: signature.nhash,
            sighash: signature.sighash,
            signature: signature.signature()?,
        })
    }

    async fn await_acknowledgement(&mut self) -> Option<DepositState> {
        loop {
            let command = self.next_command().await?;
            match command.action {
                DepositAction::Acknowledge => {
                    let _ = command.reply.send(Ok(()));
                    return Some(DepositState::Completed);
                }
                action => {
                    let _ = command.reply.send(Err(RenVmError::guard(self.state, action)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LockDeposit;
    use alloy::primitives::U256;

    fn settling() -> GatewayTransaction {
        GatewayTransaction::from_deposit(
            &LockDeposit {
                tx_hash: "aa".repeat(32),
                txid: vec![0xaa; 32],
                txindex: 0,
                amount: U256::from(100_000u64),
                raw: None,
            },
            0,
        )
    }

    fn signature() -> RenSignature {
        RenSignature {
            amount: U256::from(99_000u64),
            phash: [0; 32],
            nhash: [1; 32],
            sighash: [2; 32],
            signature: format!("0x{}", "11".repeat(65)),
        }
    }

    #[test]
    fn test_restore_new_deposit_settles() {
        assert_eq!(restore_deposit_state(&settling()), DepositState::SrcSettling);
    }

    #[test]
    fn test_restore_confirmed_deposit() {
        let mut tx = settling();
        tx.record_confirmations(6, 6);
        assert_eq!(restore_deposit_state(&tx), DepositState::SrcConfirmed);
    }

    #[test]
    fn test_restore_prefers_most_advanced_state() {
        let mut tx = settling();
        tx.record_confirmations(6, 6);
        tx.ren_signature = Some(signature());
        assert_eq!(restore_deposit_state(&tx), DepositState::Accepted);

        tx.dest_tx_hash = Some("0xdead".into());
        assert_eq!(restore_deposit_state(&tx), DepositState::DestInitiated);

        tx.completed = true;
        assert_eq!(restore_deposit_state(&tx), DepositState::Completed);
    }

    #[test]
    fn test_restore_rejected_deposit() {
        let mut tx = settling();
        tx.ren_signature = Some(signature());
        tx.rejected = true;
        assert_eq!(restore_deposit_state(&tx), DepositState::Rejected);
    }

    #[test]
    fn test_restore_without_deposit_data_fails() {
        let mut tx = settling();
        tx.source_txid.clear();
        assert_eq!(restore_deposit_state(&tx), DepositState::ErrorRestoring);
    }
}
