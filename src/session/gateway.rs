//! Gateway (lock-and-mint) machine
//!
//! The gateway task owns the [`GatewaySession`]. It derives the gateway address,
//! runs deposit discovery, spawns one deposit task per deposit and applies their
//! updates to the transaction map. Callers drive it through a [`GatewayHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::derive_gateway_address;
use crate::chain::{DepositSender, LockChain, LockDeposit};
use crate::error::{RenVmError, Result};
use crate::hash::{gateway_hash, hash160, payload_hash_bytes, selector_hash};
use crate::tx::{build_submit_gateway, MintParams};
use crate::types::Selector;

use super::deposit::{
    self, restore_deposit_state, DepositAction, DepositCommand, DepositContext, DepositMessage,
    DepositUpdate,
};
use super::events::{Emitter, GatewayEvent, GatewayEvents};
use super::types::{now_millis, DepositState, GatewayParams, GatewaySession, GatewayState, GatewayTransaction};
use super::EngineContext;

/// Where a persisted gateway session resumes
pub fn restore_gateway_state(session: &GatewaySession, now_ms: i64) -> GatewayState {
    if session.is_expired_at(now_ms) {
        GatewayState::Completed
    } else if session.gateway.is_some() {
        GatewayState::Listening
    } else {
        GatewayState::Creating
    }
}

/// Derive the gateway address and the parameters bound into it
pub(crate) async fn derive_gateway(ctx: &EngineContext, session: &GatewaySession) -> Result<GatewayParams> {
    let asset = &session.source_asset;
    let (gpubkey, confirmation_target) = futures::join!(
        ctx.renvm.select_shard(asset),
        ctx.renvm.get_confirmation_target(ctx.lock.name())
    );
    let gpubkey = gpubkey?;
    let confirmation_target = match confirmation_target {
        Ok(target) => Some(target),
        Err(e) => {
            warn!(chain = %ctx.lock.name(), error = %e, "No RenVM confirmation target, using the chain's");
            None
        }
    };

    let (recipient, payload) = match session.contract_calls.last() {
        Some(call) => (call.to.as_str(), call.payload().map_err(|e| ctx.mint_error(e))?),
        None => (session.dest_address.as_str(), Vec::new()),
    };
    let to = ctx
        .mint
        .address_to_bytes(recipient)
        .map_err(|e| ctx.mint_error(e))?;

    let phash = payload_hash_bytes(&payload);
    let shash = selector_hash(&Selector::mint(asset, &session.dest_chain));
    let ghash = gateway_hash(&phash, &to, &shash, &session.nonce);
    let address = derive_gateway_address(
        &ctx.lock.address_family(),
        ctx.lock.is_testnet(),
        &hash160(&gpubkey),
        &ghash,
    )?;

    Ok(GatewayParams {
        address,
        gpubkey,
        payload,
        phash,
        shash,
        ghash,
        to,
        confirmation_target,
    })
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Debug)]
enum GatewayCommand {
    Deposit {
        deposit_id: String,
        action: DepositAction,
        reply: oneshot::Sender<Result<()>>,
    },
    Retry {
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<GatewaySession>>,
    },
    Stop,
}

/// Commands for a running gateway session
#[derive(Debug)]
pub struct GatewayHandle {
    id: String,
    commands: mpsc::Sender<GatewayCommand>,
    task: JoinHandle<Result<GatewaySession>>,
}

impl GatewayHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn stopped(&self, reason: &str) -> RenVmError {
        RenVmError::SessionStopped {
            id: self.id.clone(),
            reason: reason.to_string(),
        }
    }

    async fn send_and_wait<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<R>>) -> GatewayCommand,
    ) -> Result<R> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(make(reply)).await.is_err() {
            return Err(self.stopped("gateway task exited"));
        }
        match response.await {
            Ok(result) => result,
            Err(_) => Err(self.stopped("gateway task dropped the reply")),
        }
    }

    async fn deposit(&self, deposit_id: &str, action: DepositAction) -> Result<()> {
        self.send_and_wait(|reply| GatewayCommand::Deposit {
            deposit_id: deposit_id.to_string(),
            action,
            reply,
        })
        .await
    }

    /// Authorize the claim of a signed deposit
    pub async fn sign(&self, deposit_id: &str) -> Result<()> {
        self.deposit(deposit_id, DepositAction::Sign).await
    }

    /// Decline a signed deposit; its task stops
    pub async fn reject(&self, deposit_id: &str) -> Result<()> {
        self.deposit(deposit_id, DepositAction::Reject).await
    }

    /// Mark a minted deposit as seen by the caller
    pub async fn acknowledge(&self, deposit_id: &str) -> Result<()> {
        self.deposit(deposit_id, DepositAction::Acknowledge).await
    }

    /// Ask RenVM again for a deposit whose signature request failed
    pub async fn retry_deposit(&self, deposit_id: &str) -> Result<()> {
        self.deposit(deposit_id, DepositAction::Retry).await
    }

    /// Retry gateway creation after a failure
    pub async fn retry(&self) -> Result<()> {
        self.send_and_wait(|reply| GatewayCommand::Retry { reply })
            .await
    }

    /// Current session record
    pub async fn snapshot(&self) -> Result<GatewaySession> {
        self.send_and_wait(|reply| GatewayCommand::Snapshot { reply })
            .await
    }

    /// Stop every task of the session and return its record
    pub async fn stop(self) -> Result<GatewaySession> {
        let _ = self.commands.send(GatewayCommand::Stop).await;
        self.wait().await
    }

    /// Wait for the session to complete
    pub async fn wait(self) -> Result<GatewaySession> {
        let GatewayHandle { id, commands, task } = self;
        let result = task.await;
        drop(commands);
        result.map_err(|e| RenVmError::SessionStopped {
            id,
            reason: e.to_string(),
        })?
    }
}

pub(crate) fn spawn(ctx: Arc<EngineContext>, session: GatewaySession) -> (GatewayHandle, GatewayEvents) {
    let (events, receiver) = Emitter::channel();
    let (commands_tx, commands) = mpsc::channel(32);
    let id = session.id.clone();
    let (deposit_tx, deposits) = mpsc::unbounded_channel();
    let (updates_tx, updates) = mpsc::unbounded_channel();

    let actor = GatewayActor {
        ctx,
        session,
        state: GatewayState::Restoring,
        events,
        slots: HashMap::new(),
        shared: None,
        deposit_tx,
        updates_tx,
        discovery: None,
        expired: false,
    };
    let task = tokio::spawn(actor.run(commands, deposits, updates));
    (
        GatewayHandle {
            id,
            commands: commands_tx,
            task,
        },
        receiver,
    )
}

// ============================================================================
// Actor
// ============================================================================

/// A deposit as the gateway sees it
struct DepositSlot {
    state: DepositState,
    commands: Option<mpsc::UnboundedSender<DepositCommand>>,
    task: Option<JoinHandle<()>>,
}

impl DepositSlot {
    fn release(&mut self) -> bool {
        self.commands = None;
        match self.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

struct GatewayActor {
    ctx: Arc<EngineContext>,
    session: GatewaySession,
    state: GatewayState,
    events: Emitter<GatewayEvent>,
    slots: HashMap<String, DepositSlot>,
    shared: Option<Arc<DepositContext>>,
    deposit_tx: DepositSender,
    updates_tx: mpsc::UnboundedSender<DepositMessage>,
    discovery: Option<JoinHandle<()>>,
    expired: bool,
}

impl GatewayActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<GatewayCommand>,
        mut deposits: mpsc::UnboundedReceiver<LockDeposit>,
        mut updates: mpsc::UnboundedReceiver<DepositMessage>,
    ) -> Result<GatewaySession> {
        info!(
            session = %self.session.id,
            asset = %self.session.source_asset,
            to = %self.session.dest_address,
            "Starting gateway session"
        );
        self.set_state(GatewayState::Restoring);
        match restore_gateway_state(&self.session, now_millis()) {
            GatewayState::Completed => {
                info!(session = %self.session.id, "Gateway expired before restore");
                return Ok(self.complete());
            }
            GatewayState::Listening => self.listen(),
            _ => self.create().await,
        }

        loop {
            if self.expired && !self.has_active_deposits() {
                return Ok(self.complete());
            }
            let until_expiry = Duration::from_millis(
                u64::try_from(self.session.expiry_time - now_millis()).unwrap_or(0),
            );

            tokio::select! {
                command = commands.recv() => match command {
                    Some(GatewayCommand::Stop) | None => return Ok(self.shutdown()),
                    Some(command) => self.handle_command(command).await,
                },
                Some(deposit) = deposits.recv() => self.on_deposit(deposit),
                Some(message) = updates.recv() => self.on_update(message),
                _ = tokio::time::sleep(until_expiry), if !self.expired => self.on_expired(),
            }
        }
    }

    fn set_state(&mut self, state: GatewayState) {
        if self.state != state {
            debug!(session = %self.session.id, from = %self.state, to = %state, "Gateway transition");
        }
        self.state = state;
        self.events.emit(GatewayEvent::StateChanged { state });
    }

    fn persist(&self) {
        self.events.emit(GatewayEvent::SessionUpdated {
            session: Box::new(self.session.clone()),
        });
    }

    fn has_active_deposits(&self) -> bool {
        self.slots.values().any(|slot| slot.state.is_active())
    }

    // ------------------------------------------------------------------------
    // Creating
    // ------------------------------------------------------------------------

    async fn create(&mut self) {
        self.set_state(GatewayState::Creating);
        match derive_gateway(&self.ctx, &self.session).await {
            Ok(params) => {
                info!(session = %self.session.id, gateway = %params.address, "Gateway address derived");
                self.register(&params).await;
                self.events.emit(GatewayEvent::GatewayAddress {
                    address: params.address.clone(),
                });
                self.session.gateway = Some(params);
                self.session.error = None;
                self.persist();
                self.listen();
            }
            Err(e) => {
                warn!(session = %self.session.id, error = %e, "Failed to create gateway");
                self.session.error = Some(e.to_string());
                self.set_state(GatewayState::ErrorCreating);
                self.events.emit(GatewayEvent::Error {
                    deposit_id: None,
                    message: e.to_string(),
                });
                self.persist();
            }
        }
    }

    /// Tell RenVM about the gateway so a mint can be recovered without this client
    async fn register(&self, params: &GatewayParams) {
        let selector = Selector::mint(&self.session.source_asset, &self.session.dest_chain);
        let details = MintParams {
            txid: Vec::new(),
            txindex: 0,
            amount: Default::default(),
            payload: params.payload.clone(),
            phash: params.phash,
            to: params.to_field(),
            nonce: self.session.nonce,
            nhash: [0u8; 32],
            gpubkey: params.gpubkey.clone(),
            ghash: params.ghash,
        };
        let result = match build_submit_gateway(selector, &details) {
            Ok(tx) => self.ctx.renvm.submit_gateway(&params.address, &tx).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(gateway = %params.address, error = %e, "Failed to submit gateway details");
        }
    }

    // ------------------------------------------------------------------------
    // Listening
    // ------------------------------------------------------------------------

    fn listen(&mut self) {
        let Some(gateway) = self.session.gateway.clone() else {
            return;
        };
        self.set_state(GatewayState::Listening);
        self.shared = Some(Arc::new(DepositContext {
            asset: self.session.source_asset.clone(),
            selector: Selector::mint(&self.session.source_asset, &self.session.dest_chain),
            nonce: self.session.nonce,
            dest_address: self.session.dest_address.clone(),
            contract_calls: self.session.contract_calls.clone(),
            gateway: gateway.clone(),
        }));

        let known: Vec<GatewayTransaction> = self.session.transactions.values().cloned().collect();
        for tx in known {
            if !self.slots.contains_key(&tx.deposit_id()) {
                self.start_deposit(tx);
            }
        }
        self.refresh_state();

        if !self.expired && self.discovery.is_none() {
            self.discovery = Some(spawn_discovery(
                self.ctx.lock.clone(),
                gateway.address,
                self.deposit_tx.clone(),
                self.ctx.config.discovery_interval,
            ));
        }
    }

    fn start_deposit(&mut self, tx: GatewayTransaction) {
        let state = restore_deposit_state(&tx);
        let deposit_id = tx.deposit_id();
        debug!(deposit_id = %deposit_id, state = %state, "Restored deposit");
        self.events.emit(GatewayEvent::DepositUpdated {
            deposit_id: deposit_id.clone(),
            state,
        });
        if state == DepositState::ErrorRestoring {
            self.events.emit(GatewayEvent::Error {
                deposit_id: Some(deposit_id.clone()),
                message: "deposit record is missing its source transaction".into(),
            });
        }
        if state == DepositState::Accepted {
            self.events.emit(GatewayEvent::SignatureRequested {
                deposit_id: deposit_id.clone(),
            });
        }

        let (commands, task) = match (&self.shared, state.is_terminal()) {
            (Some(shared), false) => {
                let (commands, task) = deposit::spawn(
                    self.ctx.clone(),
                    shared.clone(),
                    tx,
                    state,
                    self.updates_tx.clone(),
                );
                (Some(commands), Some(task))
            }
            _ => (None, None),
        };
        self.slots.insert(deposit_id, DepositSlot { state, commands, task });
    }

    fn refresh_state(&mut self) {
        if !matches!(self.state, GatewayState::Listening | GatewayState::RequestingSignature) {
            return;
        }
        let waiting = self.slots.values().any(|slot| {
            matches!(slot.state, DepositState::Accepted | DepositState::ErrorSubmitting)
        });
        let next = if waiting {
            GatewayState::RequestingSignature
        } else {
            GatewayState::Listening
        };
        if next != self.state {
            self.set_state(next);
        }
    }

    fn on_deposit(&mut self, deposit: LockDeposit) {
        let deposit_id = deposit.id();
        if self.expired || self.session.transactions.contains_key(&deposit_id) {
            return;
        }
        info!(
            session = %self.session.id,
            deposit_id = %deposit_id,
            amount = %deposit.amount,
            "Deposit detected"
        );
        let tx = GatewayTransaction::from_deposit(&deposit, now_millis());
        self.session.transactions.insert(deposit_id.clone(), tx.clone());
        self.events.emit(GatewayEvent::DepositDetected { deposit_id });
        self.start_deposit(tx);
        self.persist();
    }

    fn on_update(&mut self, message: DepositMessage) {
        let DepositMessage { deposit_id, update } = message;
        let Some(entry) = self.session.transactions.get_mut(&deposit_id) else {
            warn!(deposit_id = %deposit_id, "Update for unknown deposit");
            return;
        };

        match update {
            DepositUpdate::Confirmations { current, target } => {
                entry.record_confirmations(current, target);
            }
            DepositUpdate::RenHash(hash) => entry.ren_vm_hash = Some(hash),
            DepositUpdate::Signed(signature) => {
                entry.ren_signature = Some(signature);
                entry.error = None;
            }
            DepositUpdate::DestTxHash(hash) => {
                entry.dest_tx_hash = Some(hash);
                entry.error = None;
            }
            DepositUpdate::Error(message) => {
                entry.error = Some(message.clone());
                self.events.emit(GatewayEvent::Error {
                    deposit_id: Some(deposit_id.clone()),
                    message,
                });
            }
            DepositUpdate::State(state) => {
                match state {
                    DepositState::Rejected => entry.rejected = true,
                    DepositState::Completed => entry.completed = true,
                    _ => {}
                }
                self.on_deposit_state(&deposit_id, state);
            }
        }
        self.persist();
    }

    fn on_deposit_state(&mut self, deposit_id: &str, state: DepositState) {
        let Some(slot) = self.slots.get_mut(deposit_id) else {
            return;
        };
        slot.state = state;
        self.events.emit(GatewayEvent::DepositUpdated {
            deposit_id: deposit_id.to_string(),
            state,
        });
        if state == DepositState::Accepted {
            self.events.emit(GatewayEvent::SignatureRequested {
                deposit_id: deposit_id.to_string(),
            });
        }
        if state.is_terminal() && slot.release() {
            debug!(deposit_id = %deposit_id, state = %state, "Deposit released");
            self.events.emit(GatewayEvent::DepositReleased {
                deposit_id: deposit_id.to_string(),
            });
        }
        self.refresh_state();
    }

    fn on_expired(&mut self) {
        info!(session = %self.session.id, "Gateway expired, no longer accepting deposits");
        self.expired = true;
        if let Some(discovery) = self.discovery.take() {
            discovery.abort();
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle_command(&mut self, command: GatewayCommand) {
        match command {
            GatewayCommand::Deposit {
                deposit_id,
                action,
                reply,
            } => self.forward(deposit_id, action, reply),
            GatewayCommand::Retry { reply } => {
                if self.state == GatewayState::ErrorCreating {
                    let _ = reply.send(Ok(()));
                    self.create().await;
                } else {
                    let _ = reply.send(Err(RenVmError::guard(self.state, "retry")));
                }
            }
            GatewayCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.session.clone()));
            }
            GatewayCommand::Stop => {}
        }
    }

    fn forward(&mut self, deposit_id: String, action: DepositAction, reply: oneshot::Sender<Result<()>>) {
        let Some(slot) = self.slots.get(&deposit_id) else {
            let _ = reply.send(Err(RenVmError::guard(
                self.state,
                format!("{} unknown deposit {}", action, deposit_id),
            )));
            return;
        };
        let Some(commands) = &slot.commands else {
            let _ = reply.send(Err(RenVmError::guard(slot.state, action)));
            return;
        };
        let command = DepositCommand {
            deposit_id,
            action,
            reply,
        };
        if let Err(mpsc::error::SendError(command)) = commands.send(command) {
            let _ = command.reply.send(Err(RenVmError::guard(slot.state, action)));
        }
    }

    // ------------------------------------------------------------------------
    // Ending
    // ------------------------------------------------------------------------

    fn release_all(&mut self) {
        if let Some(discovery) = self.discovery.take() {
            discovery.abort();
        }
        for (deposit_id, slot) in self.slots.iter_mut() {
            if slot.release() {
                self.events.emit(GatewayEvent::DepositReleased {
                    deposit_id: deposit_id.clone(),
                });
            }
        }
    }

    fn complete(mut self) -> GatewaySession {
        self.release_all();
        self.set_state(GatewayState::Completed);
        info!(session = %self.session.id, deposits = self.session.transactions.len(), "Gateway session completed");
        self.events.emit(GatewayEvent::Completed {
            session: Box::new(self.session.clone()),
        });
        self.session
    }

    fn shutdown(mut self) -> GatewaySession {
        debug!(session = %self.session.id, state = %self.state, "Gateway session stopped");
        self.release_all();
        self.session
    }
}

/// Scan `address` until aborted, feeding every deposit seen into `sender`
fn spawn_discovery(
    lock: Arc<dyn LockChain>,
    address: String,
    sender: DepositSender,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = lock.get_deposits(&address, &sender).await {
                warn!(chain = %lock.name(), gateway = %address, error = %e, "Deposit discovery failed");
            }
            if sender.is_closed() {
                break;
            }
            tokio::time::sleep(interval).await;
        }
    })
}
