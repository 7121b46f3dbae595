//! Error types surfaced by the client core
//!
//! Every failure that crosses a module boundary is a [`RenVmError`] variant carrying
//! enough context (method, hash, expected vs actual) to reproduce it. Chain adapters
//! work in `eyre::Result` and are folded into [`RenVmError::Chain`] at the engine boundary.

use thiserror::Error;

/// Result alias for core operations
pub type Result<T, E = RenVmError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RenVmError {
    /// A typed value or type descriptor could not be decoded
    #[error("decode error at {path}: {reason}")]
    Decode { path: String, reason: String },

    /// Transport failure after all retries were used
    #[error("{method} failed after {attempts} attempt(s): {reason}")]
    Transport {
        method: String,
        attempts: u32,
        reason: String,
    },

    /// The node answered with an `error` field
    #[error("{method} returned error {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    /// The queried transaction is unknown to the network
    #[error("transaction not found: {hash}")]
    TransactionNotFound { hash: String },

    /// The node rejected the request parameters
    #[error("invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },

    /// A wait loop was stopped by its cancellation predicate
    #[error("wait for {hash} cancelled")]
    Cancelled { hash: String },

    /// The network reverted the transaction
    #[error("transaction {hash} reverted: {reason}")]
    Reverted { hash: String, reason: String },

    /// A returned signature recovers to neither candidate authority
    #[error("signature for {hash} recovers to neither {candidates:?}, expected {expected}")]
    AuthorityMismatch {
        hash: String,
        expected: String,
        candidates: Vec<String>,
    },

    /// A signature could not be parsed or recovered
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// A command or event is not valid in the current state
    #[error("{event} is not allowed in state {state}")]
    Guard { state: String, event: String },

    /// An address could not be encoded or decoded
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A chain adapter call failed
    #[error("chain {chain} error: {source}")]
    Chain {
        chain: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Configuration is missing or malformed
    #[error("config error: {0}")]
    Config(String),

    /// A session task stopped before producing a result
    #[error("session {id} stopped: {reason}")]
    SessionStopped { id: String, reason: String },
}

impl RenVmError {
    pub(crate) fn decode(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RenVmError::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn guard(state: impl ToString, event: impl ToString) -> Self {
        RenVmError::Guard {
            state: state.to_string(),
            event: event.to_string(),
        }
    }

    pub(crate) fn chain(chain: impl Into<String>, source: eyre::Report) -> Self {
        RenVmError::Chain {
            chain: chain.into(),
            source: source.into(),
        }
    }

    /// Errors `wait_for_tx` treats as "keep polling"
    pub fn is_pending_query(&self) -> bool {
        match self {
            RenVmError::TransactionNotFound { .. } => true,
            RenVmError::Rpc { message, .. } => {
                let message = message.to_lowercase();
                message.contains("not found") || message.contains("not available")
            }
            _ => false,
        }
    }

    /// Whether a later attempt at the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RenVmError::Transport { .. } | RenVmError::Chain { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_query_classification() {
        let not_available = RenVmError::Rpc {
            method: "ren_queryTx".into(),
            code: -32603,
            message: "result not available".into(),
        };
        assert!(not_available.is_pending_query());

        let not_found = RenVmError::TransactionNotFound { hash: "abc".into() };
        assert!(not_found.is_pending_query());

        let invalid = RenVmError::Rpc {
            method: "ren_queryTx".into(),
            code: -32602,
            message: "invalid selector".into(),
        };
        assert!(!invalid.is_pending_query());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = RenVmError::AuthorityMismatch {
            hash: "0xabc".into(),
            expected: "0x01".into(),
            candidates: vec!["0x02".into(), "0x03".into()],
        };
        let message = err.to_string();
        assert!(message.contains("0xabc"));
        assert!(message.contains("0x01"));
        assert!(message.contains("0x03"));
    }
}
