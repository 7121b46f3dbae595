//! Hash computation for RenVM transactions
//!
//! Pure functions that reproduce the hashes RenVM recomputes on its side, so every
//! field order and padding rule here is part of the wire contract.
//!
//! ## Hashes
//!
//! - `pHash` = keccak256(payload), zero for an empty payload
//! - `sHash` = keccak256(normalized selector)
//! - `gHash` = keccak256(pHash ‖ sHash ‖ to ‖ nonce)
//! - `nHash` = keccak256(nonce ‖ txid ‖ u32be(txindex))
//! - `sighash` = keccak256(pHash ‖ u256be(amount) ‖ sHash ‖ pad32(to) ‖ nHash)
//! - transaction hash = sha256(string(version) ‖ string(selector) ‖ typed(in))

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::U256;
use bitcoin::hashes::{hash160, Hash};
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};

use crate::pack::{marshal_string, marshal_typed, TypedValue};
use crate::types::{pad_bytes32, to_url_base64, Selector};

/// Transaction version used by current RenVM selectors
pub const TX_VERSION: &str = "1";

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    keccak256_concat(&[data])
}

/// keccak256 over several slices without an intermediate buffer
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Compute sha256 hash of data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// ripemd160(sha256(data)), the UTXO public-key and script hash
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

// ============================================================================
// Protocol hashes
// ============================================================================

/// pHash of already-encoded payload bytes; an empty payload hashes to 32 zero bytes
pub fn payload_hash_bytes(payload: &[u8]) -> [u8; 32] {
    if payload.is_empty() {
        return [0u8; 32];
    }
    keccak256(payload)
}

/// ABI-encode contract arguments as a parameter list
pub fn encode_payload(args: &[DynSolValue]) -> Vec<u8> {
    if args.is_empty() {
        return Vec::new();
    }
    DynSolValue::Tuple(args.to_vec()).abi_encode_params()
}

/// pHash of an ordered argument list
pub fn payload_hash(args: &[DynSolValue]) -> [u8; 32] {
    payload_hash_bytes(&encode_payload(args))
}

/// sHash: keccak256 of the normalized selector
pub fn selector_hash(selector: &Selector) -> [u8; 32] {
    keccak256(selector.normalized().as_bytes())
}

/// gHash binds a gateway to its payload, selector, recipient and session nonce
pub fn gateway_hash(
    payload_hash: &[u8; 32],
    destination_address: &[u8],
    selector_hash: &[u8; 32],
    session_nonce: &[u8; 32],
) -> [u8; 32] {
    keccak256_concat(&[
        &payload_hash[..],
        &selector_hash[..],
        destination_address,
        &session_nonce[..],
    ])
}

/// nHash identifies one deposit under a session nonce
pub fn nonce_hash(nonce: &[u8; 32], txid: &[u8], txindex: u32) -> [u8; 32] {
    keccak256_concat(&[&nonce[..], txid, &txindex.to_be_bytes()[..]])
}

/// Hash the network signs to authorize a mint
pub fn sighash(
    payload_hash: &[u8; 32],
    amount: U256,
    destination_address: &[u8],
    selector_hash: &[u8; 32],
    nonce_hash: &[u8; 32],
) -> [u8; 32] {
    keccak256_concat(&[
        &payload_hash[..],
        &amount.to_be_bytes::<32>()[..],
        &selector_hash[..],
        &pad_bytes32(destination_address)[..],
        &nonce_hash[..],
    ])
}

/// Raw transaction hash
pub fn transaction_hash(version: &str, selector: &Selector, input: &TypedValue) -> [u8; 32] {
    let mut data = marshal_string(version);
    data.extend_from_slice(&marshal_string(selector.as_str()));
    data.extend_from_slice(&marshal_typed(input));
    sha256(&data)
}

/// Transaction hash as the URL-base64 string nodes index transactions by
pub fn transaction_hash_b64(version: &str, selector: &Selector, input: &TypedValue) -> String {
    to_url_base64(&transaction_hash(version, selector, input))
}

/// Convert bytes32 to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}
