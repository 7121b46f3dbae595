//! Progress notifications emitted by running sessions
//!
//! The eventual result of a session is the value its handle's `wait` returns; these
//! events are the separate progress stream.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::TxStatus;

use super::types::{BurnState, DepositState, GatewaySession, GatewayState};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    StateChanged {
        state: GatewayState,
    },
    GatewayAddress {
        address: String,
    },
    DepositDetected {
        deposit_id: String,
    },
    DepositUpdated {
        deposit_id: String,
        state: DepositState,
    },
    /// A deposit is signed and waits for `sign` or `reject`
    SignatureRequested {
        deposit_id: String,
    },
    /// A deposit's task ended and its resources were freed
    DepositReleased {
        deposit_id: String,
    },
    /// Full snapshot, emitted after every change worth persisting
    SessionUpdated {
        session: Box<GatewaySession>,
    },
    Completed {
        session: Box<GatewaySession>,
    },
    Error {
        deposit_id: Option<String>,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BurnEvent {
    StateChanged {
        state: BurnState,
    },
    Confirmations {
        current: u64,
        target: u64,
    },
    RenStatus {
        status: TxStatus,
    },
    SessionUpdated {
        session: Box<GatewaySession>,
    },
    Completed {
        session: Box<GatewaySession>,
    },
    Error {
        message: String,
    },
}

pub type GatewayEvents = mpsc::UnboundedReceiver<GatewayEvent>;
pub type BurnEvents = mpsc::UnboundedReceiver<BurnEvent>;

/// Event sender that does not care whether anyone is listening
#[derive(Debug, Clone)]
pub(crate) struct Emitter<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> Emitter<E> {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }
}
