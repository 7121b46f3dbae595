//! Burn-and-release machine
//!
//! One burn per session: submit the burn on the mint chain, wait for it to confirm,
//! then have RenVM release the underlying asset to the destination address.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RenVmError, Result};
use crate::tx::{build_burn_transaction, ReleaseOutput};
use crate::types::{Selector, TxStatus};

use super::events::{BurnEvent, BurnEvents, Emitter};
use super::types::{now_millis, BurnState, GatewaySession, GatewayTransaction, RenRelease};
use super::EngineContext;

/// Where a persisted burn session resumes
pub fn restore_burn_state(session: &GatewaySession) -> BurnState {
    match session.transactions.values().next() {
        None => BurnState::Created,
        Some(tx) if tx.completed => BurnState::Completed,
        Some(tx) if tx.ren_release.is_some() => BurnState::DestInitiated,
        Some(tx) if tx.is_confirmed() => BurnState::SrcConfirmed,
        Some(_) => BurnState::SrcSettling,
    }
}

#[derive(Debug)]
enum BurnCommand {
    Retry {
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<GatewaySession>>,
    },
    Stop,
}

/// Commands for a running burn session
#[derive(Debug)]
pub struct BurnHandle {
    id: String,
    commands: mpsc::Sender<BurnCommand>,
    task: JoinHandle<Result<GatewaySession>>,
}

impl BurnHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn send_and_wait<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<R>>) -> BurnCommand,
    ) -> Result<R> {
        let stopped = |reason: &str| RenVmError::SessionStopped {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        let (reply, response) = oneshot::channel();
        if self.commands.send(make(reply)).await.is_err() {
            return Err(stopped("burn task exited"));
        }
        match response.await {
            Ok(result) => result,
            Err(_) => Err(stopped("burn task dropped the reply")),
        }
    }

    /// Retry a failed burn or release
    pub async fn retry(&self) -> Result<()> {
        self.send_and_wait(|reply| BurnCommand::Retry { reply }).await
    }

    pub async fn snapshot(&self) -> Result<GatewaySession> {
        self.send_and_wait(|reply| BurnCommand::Snapshot { reply })
            .await
    }

    pub async fn stop(self) -> Result<GatewaySession> {
        let _ = self.commands.send(BurnCommand::Stop).await;
        self.wait().await
    }

    /// Wait for the release to complete
    pub async fn wait(self) -> Result<GatewaySession> {
        let BurnHandle { id, commands, task } = self;
        let result = task.await;
        drop(commands);
        result.map_err(|e| RenVmError::SessionStopped {
            id,
            reason: e.to_string(),
        })?
    }
}

pub(crate) fn spawn(ctx: Arc<EngineContext>, session: GatewaySession) -> (BurnHandle, BurnEvents) {
    let (events, receiver) = Emitter::channel();
    let (commands_tx, commands) = mpsc::channel(8);
    let id = session.id.clone();
    let actor = BurnActor {
        ctx,
        session,
        state: BurnState::Restoring,
        events,
        commands,
    };
    (
        BurnHandle {
            id,
            commands: commands_tx,
            task: tokio::spawn(actor.run()),
        },
        receiver,
    )
}

struct BurnActor {
    ctx: Arc<EngineContext>,
    session: GatewaySession,
    state: BurnState,
    events: Emitter<BurnEvent>,
    commands: mpsc::Receiver<BurnCommand>,
}

impl BurnActor {
    async fn run(mut self) -> Result<GatewaySession> {
        info!(
            session = %self.session.id,
            asset = %self.session.source_asset,
            to = %self.session.dest_address,
            "Starting burn session"
        );
        self.set_state(BurnState::Restoring);
        let restored = restore_burn_state(&self.session);
        self.set_state(restored);

        loop {
            let next = match self.state {
                BurnState::Restoring | BurnState::Created => self.burn().await,
                BurnState::SrcSettling => self.settle().await,
                BurnState::SrcConfirmed => self.release().await,
                BurnState::ErrorBurning => self.await_retry(BurnState::Created).await,
                BurnState::ErrorReleasing => self.await_retry(BurnState::SrcConfirmed).await,
                BurnState::DestInitiated => {
                    if let Some(tx) = self.transaction_mut() {
                        tx.completed = true;
                    }
                    Some(BurnState::Completed)
                }
                BurnState::Completed => return Ok(self.complete()),
            };
            match next {
                Some(state) => self.set_state(state),
                None => {
                    debug!(session = %self.session.id, state = %self.state, "Burn session stopped");
                    return Ok(self.session);
                }
            }
        }
    }

    fn set_state(&mut self, state: BurnState) {
        debug!(session = %self.session.id, from = %self.state, to = %state, "Burn transition");
        self.state = state;
        self.events.emit(BurnEvent::StateChanged { state });
        self.persist();
    }

    fn persist(&self) {
        self.events.emit(BurnEvent::SessionUpdated {
            session: Box::new(self.session.clone()),
        });
    }

    fn fail(&mut self, error: &RenVmError) {
        warn!(session = %self.session.id, state = %self.state, error = %error, "Burn step failed");
        let message = error.to_string();
        self.session.error = Some(message.clone());
        if let Some(tx) = self.transaction_mut() {
            tx.error = Some(message.clone());
        }
        self.events.emit(BurnEvent::Error { message });
    }

    fn transaction_mut(&mut self) -> Option<&mut GatewayTransaction> {
        self.session.transactions.values_mut().next()
    }

    fn answer(&self, command: BurnCommand) -> bool {
        match command {
            BurnCommand::Retry { reply } => {
                let _ = reply.send(Err(RenVmError::guard(self.state, "retry")));
                true
            }
            BurnCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.session.clone()));
                true
            }
            BurnCommand::Stop => false,
        }
    }

    /// Drive `work` while answering commands. `None` when the session is stopped.
    async fn busy<F: Future>(&mut self, work: F) -> Option<F::Output> {
        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return Some(output),
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.answer(command) {
                            return None;
                        }
                    }
                    None => return None,
                },
            }
        }
    }

    async fn burn(&mut self) -> Option<BurnState> {
        let Some(amount) = self.session.target_amount else {
            self.fail(&RenVmError::Config("burn session has no amount".into()));
            return Some(BurnState::ErrorBurning);
        };
        let ctx = self.ctx.clone();
        let asset = self.session.source_asset.clone();
        let to = self.session.dest_address.clone();
        match self.busy(ctx.mint.submit_burn(&asset, &to, amount)).await? {
            Ok(details) => {
                info!(
                    session = %self.session.id,
                    tx_hash = %details.tx_hash,
                    nonce = %details.nonce,
                    "Burn submitted"
                );
                let tx = GatewayTransaction::from_burn(&details, now_millis());
                self.session.transactions.clear();
                self.session.transactions.insert(tx.deposit_id(), tx);
                self.session.error = None;
                Some(BurnState::SrcSettling)
            }
            Err(e) => {
                self.fail(&ctx.mint_error(e));
                Some(BurnState::ErrorBurning)
            }
        }
    }

    async fn settle(&mut self) -> Option<BurnState> {
        let ctx = self.ctx.clone();
        let tx_hash = self.transaction_mut()?.source_tx_hash.clone();
        loop {
            match self.busy(ctx.mint.get_confirmations(&tx_hash)).await? {
                Ok((current, target)) => {
                    let target = ctx.config.mint_confirmations.unwrap_or(target);
                    let tx = self.transaction_mut()?;
                    let changed = tx.record_confirmations(current, target);
                    let (confirmations, confirmed) = (tx.source_tx_confs, tx.is_confirmed());
                    if changed {
                        self.events.emit(BurnEvent::Confirmations {
                            current: confirmations,
                            target,
                        });
                        self.persist();
                    }
                    if confirmed {
                        return Some(BurnState::SrcConfirmed);
                    }
                }
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "Failed to fetch burn confirmations"),
            }
            self.busy(tokio::time::sleep(ctx.config.poll_interval)).await?;
        }
    }

    async fn release(&mut self) -> Option<BurnState> {
        let ctx = self.ctx.clone();
        let tx = self.transaction_mut()?.clone();
        let nonce = tx.burn_nonce.unwrap_or_default().to_be_bytes::<32>();
        let selector = Selector::release(&self.session.source_asset, &self.session.source_chain);
        let transaction = match build_burn_transaction(
            selector,
            tx.source_tx_amount,
            &self.session.dest_address,
            nonce,
        ) {
            Ok(transaction) => transaction,
            Err(e) => {
                self.fail(&e);
                return Some(BurnState::ErrorReleasing);
            }
        };
        if let Some(entry) = self.transaction_mut() {
            entry.ren_vm_hash = Some(transaction.hash.clone());
        }
        self.persist();

        if let Err(e) = self.busy(ctx.renvm.submit_tx_with_recovery(&transaction)).await? {
            self.fail(&e);
            return Some(BurnState::ErrorReleasing);
        }

        let events = self.events.clone();
        let result = self
            .busy(ctx.renvm.wait_for_tx(
                &transaction.hash,
                move |status: TxStatus| events.emit(BurnEvent::RenStatus { status }),
                // the wait is dropped with this step when the session stops
                || false,
                ctx.config.poll_interval,
            ))
            .await?;

        let released = result.and_then(|done| match done.tx.output {
            Some(output) => ReleaseOutput::from_pack(&output.v).and_then(|out| match out.revert {
                Some(reason) => Err(RenVmError::Reverted {
                    hash: transaction.hash.clone(),
                    reason,
                }),
                None => Ok(RenRelease {
                    amount: out.amount,
                    txid: out.txid.map(hex::encode),
                }),
            }),
            None => Ok(RenRelease {
                amount: None,
                txid: None,
            }),
        });

        match released {
            Ok(release) => {
                info!(session = %self.session.id, ren_hash = %transaction.hash, "Release accepted by RenVM");
                if let Some(entry) = self.transaction_mut() {
                    entry.ren_release = Some(release);
                    entry.error = None;
                }
                self.session.error = None;
                Some(BurnState::DestInitiated)
            }
            Err(e) => {
                self.fail(&e);
                Some(BurnState::ErrorReleasing)
            }
        }
    }

    async fn await_retry(&mut self, resume: BurnState) -> Option<BurnState> {
        loop {
            match self.commands.recv().await? {
                BurnCommand::Retry { reply } => {
                    let _ = reply.send(Ok(()));
                    return Some(resume);
                }
                BurnCommand::Snapshot { reply } => {
                    let _ = reply.send(Ok(self.session.clone()));
                }
                BurnCommand::Stop => return None,
            }
        }
    }

    fn complete(self) -> GatewaySession {
        info!(session = %self.session.id, "Burn session completed");
        self.events.emit(BurnEvent::Completed {
            session: Box::new(self.session.clone()),
        });
        self.session
    }
}
