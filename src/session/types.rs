//! Persisted session records and machine states
//!
//! A [`GatewaySession`] serializes to a plain JSON record: no channels, no handles,
//! transactions keyed by `{txid}_{txindex}`. Field names follow the camelCase
//! layout wallets already persist.

use std::collections::BTreeMap;
use std::fmt;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::chain::{BurnDetails, ContractCall, LockDeposit};
use crate::error::Result;
use crate::hash::keccak256_concat;
use crate::signature::Signature;
use crate::types::{pad_bytes32, Network};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Session nonce from the current time, for callers that do not bring their own
pub fn time_nonce() -> [u8; 32] {
    pad_bytes32(&now_millis().to_be_bytes())
}

/// Amounts persist as decimal strings; numbers and 0x-hex strings are read too
pub(crate) mod decimal {
    use std::str::FromStr;

    use alloy::primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = Value::deserialize(d)?;
        parse(&raw).map_err(D::Error::custom)
    }

    fn parse(raw: &Value) -> Result<U256, String> {
        match raw {
            Value::String(s) => U256::from_str(s).map_err(|e| format!("invalid amount {}: {}", s, e)),
            Value::Number(n) => n
                .as_u64()
                .map(U256::from)
                .ok_or_else(|| format!("invalid amount {}", n)),
            other => Err(format!("invalid amount {}", other)),
        }
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Option<U256>, s: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => s.serialize_some(&v.to_string()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<U256>, D::Error> {
            match Option::<Value>::deserialize(d)? {
                None | Some(Value::Null) => Ok(None),
                Some(raw) => parse(&raw).map(Some).map_err(D::Error::custom),
            }
        }
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Lock on the asset's home chain, mint on the destination
    Mint,
    /// Burn on the host chain, release on the asset's home chain
    Burn,
}

/// Gateway parameters fixed when the address is derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayParams {
    pub address: String,
    #[serde(with = "hex::serde")]
    pub gpubkey: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub phash: [u8; 32],
    /// Hash of the normalized mint selector
    #[serde(with = "hex::serde")]
    pub shash: [u8; 32],
    #[serde(with = "hex::serde")]
    pub ghash: [u8; 32],
    /// Recipient bytes bound into gHash
    #[serde(with = "hex::serde")]
    pub to: Vec<u8>,
    /// Lock-chain confirmations RenVM asked for when the gateway was opened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_target: Option<u64>,
}

impl GatewayParams {
    /// Value of the `to` field in RenVM transaction inputs
    pub fn to_field(&self) -> String {
        hex::encode(&self.to)
    }
}

/// One cross-chain transfer intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySession {
    pub id: String,
    pub network: Network,
    pub direction: Direction,
    pub source_asset: String,
    pub source_chain: String,
    pub dest_chain: String,
    pub dest_address: String,
    #[serde(default, with = "decimal::option", skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<U256>,
    #[serde(with = "hex::serde")]
    pub nonce: [u8; 32],
    /// Unix milliseconds after which no new deposits are accepted
    pub expiry_time: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contract_calls: Vec<ContractCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayParams>,
    #[serde(default)]
    pub transactions: BTreeMap<String, GatewayTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewaySession {
    /// A lock-and-mint session sending `asset` from `source_chain` to `dest_address` on `dest_chain`
    pub fn mint(
        network: Network,
        asset: &str,
        source_chain: &str,
        dest_chain: &str,
        dest_address: &str,
        nonce: [u8; 32],
        expiry_time: i64,
    ) -> Self {
        Self {
            id: session_id(Direction::Mint, asset, dest_address, &nonce),
            network,
            direction: Direction::Mint,
            source_asset: asset.to_string(),
            source_chain: source_chain.to_string(),
            dest_chain: dest_chain.to_string(),
            dest_address: dest_address.to_string(),
            target_amount: None,
            nonce,
            expiry_time,
            contract_calls: Vec::new(),
            gateway: None,
            transactions: BTreeMap::new(),
            error: None,
        }
    }

    /// A burn-and-release session burning `amount` on `source_chain`, releasing to `dest_address`
    pub fn burn(
        network: Network,
        asset: &str,
        source_chain: &str,
        dest_chain: &str,
        dest_address: &str,
        amount: U256,
        expiry_time: i64,
    ) -> Self {
        let nonce = time_nonce();
        Self {
            id: session_id(Direction::Burn, asset, dest_address, &nonce),
            network,
            direction: Direction::Burn,
            source_asset: asset.to_string(),
            source_chain: source_chain.to_string(),
            dest_chain: dest_chain.to_string(),
            dest_address: dest_address.to_string(),
            target_amount: Some(amount),
            nonce,
            expiry_time,
            contract_calls: Vec::new(),
            gateway: None,
            transactions: BTreeMap::new(),
            error: None,
        }
    }

    pub fn with_target_amount(mut self, amount: U256) -> Self {
        self.target_amount = Some(amount);
        self
    }

    /// Mint through contract calls; the last call's target and arguments form gHash
    pub fn with_contract_calls(mut self, calls: Vec<ContractCall>) -> Self {
        self.contract_calls = calls;
        self
    }

    pub fn gateway_address(&self) -> Option<&str> {
        self.gateway.as_ref().map(|g| g.address.as_str())
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expiry_time <= now_ms
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| crate::RenVmError::decode("session", e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::RenVmError::decode("session", e.to_string()))
    }
}

fn session_id(direction: Direction, asset: &str, to: &str, nonce: &[u8; 32]) -> String {
    let tag: &[u8] = match direction {
        Direction::Mint => b"mint",
        Direction::Burn => b"burn",
    };
    let digest = keccak256_concat(&[tag, asset.as_bytes(), to.as_bytes(), &nonce[..]]);
    hex::encode(&digest[..12])
}

// ============================================================================
// Transactions
// ============================================================================

/// Signature RenVM returned for a mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenSignature {
    /// Amount after fees, the one signed over
    #[serde(with = "decimal")]
    pub amount: U256,
    #[serde(with = "hex::serde")]
    pub phash: [u8; 32],
    #[serde(with = "hex::serde")]
    pub nhash: [u8; 32],
    #[serde(with = "hex::serde")]
    pub sighash: [u8; 32],
    /// 65-byte `r ‖ s ‖ v`, 0x-hex
    pub signature: String,
}

impl RenSignature {
    pub fn signature(&self) -> Result<Signature> {
        Signature::from_hex(&self.signature)
    }
}

/// What RenVM reported for a completed release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenRelease {
    #[serde(default, with = "decimal::option", skip_serializing_if = "Option::is_none")]
    pub amount: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
}

/// One asset movement observed under a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTransaction {
    pub source_tx_hash: String,
    #[serde(default, with = "hex::serde")]
    pub source_txid: Vec<u8>,
    #[serde(default)]
    pub source_tx_index: u32,
    #[serde(with = "decimal")]
    pub source_tx_amount: U256,
    #[serde(default)]
    pub source_tx_confs: u64,
    #[serde(default)]
    pub source_tx_conf_target: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_source_tx: Option<serde_json::Value>,
    #[serde(rename = "renVMHash", default, skip_serializing_if = "Option::is_none")]
    pub ren_vm_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ren_signature: Option<RenSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ren_release: Option<RenRelease>,
    /// Gateway burn counter, burns only
    #[serde(default, with = "decimal::option", skip_serializing_if = "Option::is_none")]
    pub burn_nonce: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rejected: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub detected_at: i64,
}

impl GatewayTransaction {
    pub fn from_deposit(deposit: &LockDeposit, detected_at: i64) -> Self {
        Self {
            source_tx_hash: deposit.tx_hash.clone(),
            source_txid: deposit.txid.clone(),
            source_tx_index: deposit.txindex,
            source_tx_amount: deposit.amount,
            source_tx_confs: 0,
            source_tx_conf_target: 0,
            raw_source_tx: deposit.raw.clone(),
            ren_vm_hash: None,
            ren_signature: None,
            ren_release: None,
            burn_nonce: None,
            dest_tx_hash: None,
            rejected: false,
            completed: false,
            error: None,
            detected_at,
        }
    }

    /// Record of a burn submitted on the mint chain
    pub fn from_burn(burn: &BurnDetails, detected_at: i64) -> Self {
        Self {
            source_tx_hash: burn.tx_hash.clone(),
            source_txid: hex::decode(burn.tx_hash.trim_start_matches("0x")).unwrap_or_default(),
            source_tx_index: 0,
            source_tx_amount: burn.amount,
            source_tx_confs: 0,
            source_tx_conf_target: 0,
            raw_source_tx: None,
            ren_vm_hash: None,
            ren_signature: None,
            ren_release: None,
            burn_nonce: Some(burn.nonce),
            dest_tx_hash: None,
            rejected: false,
            completed: false,
            error: None,
            detected_at,
        }
    }

    /// Lock-chain view of this transaction
    pub fn to_deposit(&self) -> LockDeposit {
        LockDeposit {
            tx_hash: self.source_tx_hash.clone(),
            txid: self.source_txid.clone(),
            txindex: self.source_tx_index,
            amount: self.source_tx_amount,
            raw: self.raw_source_tx.clone(),
        }
    }

    /// Record a confirmation count; counts never go down. Returns whether anything changed.
    pub fn record_confirmations(&mut self, current: u64, target: u64) -> bool {
        let confs = self.source_tx_confs.max(current);
        let changed = confs != self.source_tx_confs || target != self.source_tx_conf_target;
        self.source_tx_confs = confs;
        self.source_tx_conf_target = target;
        changed
    }

    /// A target of zero still needs the transaction to be seen once
    pub fn is_confirmed(&self) -> bool {
        self.source_tx_confs >= self.source_tx_conf_target.max(1)
    }

    /// Key of this transaction in the session map, `{txid}_{txindex}`
    pub fn deposit_id(&self) -> String {
        format!("{}_{}", self.source_tx_hash, self.source_tx_index)
    }
}

// ============================================================================
// Machine states
// ============================================================================

/// Gateway (lock-and-mint) machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    Restoring,
    Creating,
    ErrorCreating,
    Listening,
    RequestingSignature,
    Completed,
}

impl GatewayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayState::Restoring => "restoring",
            GatewayState::Creating => "creating",
            GatewayState::ErrorCreating => "error_creating",
            GatewayState::Listening => "listening",
            GatewayState::RequestingSignature => "requesting_signature",
            GatewayState::Completed => "completed",
        }
    }
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-deposit machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositState {
    RestoringDeposit,
    RestoredDeposit,
    ErrorRestoring,
    SrcSettling,
    SrcConfirmed,
    ErrorAccepting,
    Accepted,
    Claiming,
    ErrorSubmitting,
    DestInitiated,
    Rejected,
    Completed,
}

impl DepositState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositState::RestoringDeposit => "restoring_deposit",
            DepositState::RestoredDeposit => "restored_deposit",
            DepositState::ErrorRestoring => "error_restoring",
            DepositState::SrcSettling => "src_settling",
            DepositState::SrcConfirmed => "src_confirmed",
            DepositState::ErrorAccepting => "error_accepting",
            DepositState::Accepted => "accepted",
            DepositState::Claiming => "claiming",
            DepositState::ErrorSubmitting => "error_submitting",
            DepositState::DestInitiated => "dest_initiated",
            DepositState::Rejected => "rejected",
            DepositState::Completed => "completed",
        }
    }

    /// No further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DepositState::Rejected | DepositState::Completed | DepositState::ErrorRestoring
        )
    }

    /// Still working towards a mint; expired gateways wait for these
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != DepositState::DestInitiated
    }
}

impl fmt::Display for DepositState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Burn-and-release machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnState {
    Restoring,
    Created,
    ErrorBurning,
    SrcSettling,
    SrcConfirmed,
    ErrorReleasing,
    DestInitiated,
    Completed,
}

impl BurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BurnState::Restoring => "restoring",
            BurnState::Created => "created",
            BurnState::ErrorBurning => "error_burning",
            BurnState::SrcSettling => "src_settling",
            BurnState::SrcConfirmed => "src_confirmed",
            BurnState::ErrorReleasing => "error_releasing",
            BurnState::DestInitiated => "dest_initiated",
            BurnState::Completed => "completed",
        }
    }
}

impl fmt::Display for BurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> LockDeposit {
        LockDeposit {
            tx_hash: "3e59ad8c7f32c4d742087b65f69cbf416fdfdf77b9a86a1bcbc5b8967369ea18".into(),
            txid: vec![1, 2, 3],
            txindex: 0,
            amount: U256::from(310000u64),
            raw: None,
        }
    }

    #[test]
    fn test_session_json_layout() {
        let mut session = GatewaySession::mint(
            Network::Testnet,
            "BTC",
            "Bitcoin",
            "Ethereum",
            "0xEA8b2fF0d7f546AFAeAE1771306736357dEFa434",
            [0x20; 32],
            1_618_895_431_076,
        );
        let tx = GatewayTransaction::from_deposit(&deposit(), 1_618_809_102_845);
        session.transactions.insert(tx.deposit_id(), tx);

        let json: serde_json::Value = serde_json::from_str(&session.to_json().unwrap()).unwrap();
        assert_eq!(json["sourceAsset"], "BTC");
        assert_eq!(json["expiryTime"], 1_618_895_431_076i64);
        assert_eq!(json["nonce"], "20".repeat(32));
        let tx = &json["transactions"]["3e59ad8c7f32c4d742087b65f69cbf416fdfdf77b9a86a1bcbc5b8967369ea18_0"];
        assert_eq!(tx["sourceTxAmount"], "310000");
        assert_eq!(tx["detectedAt"], 1_618_809_102_845i64);
        assert!(tx.get("renSignature").is_none());

        let restored = GatewaySession::from_json(&session.to_json().unwrap()).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_amount_accepts_numbers() {
        let json = serde_json::json!({
            "sourceTxHash": "ab",
            "sourceTxAmount": 42,
            "detectedAt": 0
        });
        let tx: GatewayTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(tx.source_tx_amount, U256::from(42u64));
        assert_eq!(tx.source_tx_confs, 0);
    }

    #[test]
    fn test_confirmations_never_decrease() {
        let mut tx = GatewayTransaction::from_deposit(&deposit(), 0);
        assert!(tx.record_confirmations(3, 6));
        assert!(!tx.record_confirmations(1, 6));
        assert_eq!(tx.source_tx_confs, 3);
        assert!(!tx.is_confirmed());
        tx.record_confirmations(6, 6);
        assert!(tx.is_confirmed());
    }

    #[test]
    fn test_zero_target_needs_one_confirmation() {
        let mut tx = GatewayTransaction::from_deposit(&deposit(), 0);
        tx.record_confirmations(0, 0);
        assert!(!tx.is_confirmed());
        tx.record_confirmations(1, 0);
        assert!(tx.is_confirmed());
    }

    #[test]
    fn test_outputs_of_one_tx_get_distinct_ids() {
        let first = GatewayTransaction::from_deposit(&deposit(), 0);
        let second = GatewayTransaction::from_deposit(&LockDeposit { txindex: 1, ..deposit() }, 0);
        assert_eq!(first.source_tx_hash, second.source_tx_hash);
        assert_ne!(first.deposit_id(), second.deposit_id());
        assert!(second.deposit_id().ends_with("_1"));
    }

    #[test]
    fn test_session_ids_depend_on_nonce() {
        let a = GatewaySession::mint(Network::Testnet, "BTC", "Bitcoin", "Ethereum", "0x01", [1; 32], 0);
        let b = GatewaySession::mint(Network::Testnet, "BTC", "Bitcoin", "Ethereum", "0x01", [2; 32], 0);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 24);
    }

    #[test]
    fn test_expiry() {
        let session = GatewaySession::mint(Network::Testnet, "BTC", "Bitcoin", "Ethereum", "0x01", [1; 32], 1000);
        assert!(session.is_expired_at(1000));
        assert!(!session.is_expired_at(999));
    }
}
