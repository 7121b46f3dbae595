//! Signature normalization and mint-authority verification
//!
//! RenVM returns `(r, s, v)` signatures that are neither low-S canonical nor
//! guaranteed to carry the right recovery id. [`fix_signature`] canonicalizes `s`,
//! then picks whichever of `v` / flipped `v` recovers to the expected mint authority.

use alloy::primitives::{uint, U256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RenVmError, Result};
use crate::hash::{bytes32_to_hex, keccak256};
use crate::types::EvmAddress;

/// secp256k1 curve order
pub const SECP256K1_N: U256 =
    uint!(0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141_U256);

/// An `(r, s, v)` ECDSA signature as it travels in a `bytes65`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl Signature {
    /// Split `r ‖ s ‖ v`
    pub fn from_bytes65(bytes: &[u8; 65]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Signature { r, s, v: bytes[64] }
    }

    pub fn to_bytes65(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes65()))
    }

    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = crate::types::decode_hex(value)?;
        let fixed: [u8; 65] = bytes.as_slice().try_into().map_err(|_| {
            RenVmError::InvalidSignature(format!("expected 65 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_bytes65(&fixed))
    }

    fn with_v(self, v: u8) -> Self {
        Signature { v, ..self }
    }
}

/// Map any recovery byte onto 27/28
pub fn normalize_v(v: u8) -> u8 {
    (v % 27) + 27
}

fn flip_v(v: u8) -> u8 {
    if v == 27 {
        28
    } else {
        27
    }
}

/// Low-S canonicalization without an authority check
///
/// `v` is normalized to 27/28 first; when `s > n/2`, `s` becomes `n - s` and `v` flips.
pub fn fix_signature_simple(signature: &Signature) -> Signature {
    let mut v = normalize_v(signature.v);
    let mut s = U256::from_be_bytes(signature.s);

    if s > SECP256K1_N >> 1 {
        s = SECP256K1_N - s;
        v = flip_v(v);
    }

    Signature {
        r: signature.r,
        s: s.to_be_bytes::<32>(),
        v,
    }
}

/// Canonicalize and pick the recovery id that recovers to `expected`
///
/// Fails with [`RenVmError::AuthorityMismatch`] when neither `v` nor its flip
/// recovers to the expected authority.
pub fn fix_signature(
    signature: &Signature,
    hash: &[u8; 32],
    expected: &EvmAddress,
) -> Result<Signature> {
    let canonical = fix_signature_simple(signature);
    let mut candidates = Vec::with_capacity(2);

    for v in [canonical.v, flip_v(canonical.v)] {
        let candidate = canonical.with_v(v);
        match recover_address(hash, &candidate) {
            Ok(address) if &address == expected => {
                if v != canonical.v {
                    debug!(hash = %bytes32_to_hex(hash), "Recovered authority with flipped v");
                }
                return Ok(candidate);
            }
            Ok(address) => candidates.push(address.as_hex()),
            Err(e) => candidates.push(format!("<{}>", e)),
        }
    }

    Err(RenVmError::AuthorityMismatch {
        hash: bytes32_to_hex(hash),
        expected: expected.as_hex(),
        candidates,
    })
}

/// EVM address of the key that produced `signature` over `hash`
pub fn recover_address(hash: &[u8; 32], signature: &Signature) -> Result<EvmAddress> {
    let recovery_byte = normalize_v(signature.v) - 27;
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| RenVmError::InvalidSignature(format!("bad recovery id {}", signature.v)))?;

    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&signature.r);
    rs[32..].copy_from_slice(&signature.s);
    let ecdsa = EcdsaSignature::from_slice(&rs)
        .map_err(|e| RenVmError::InvalidSignature(e.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(hash, &ecdsa, recovery_id)
        .map_err(|e| RenVmError::InvalidSignature(e.to_string()))?;
    Ok(address_of(&key))
}

/// EVM address of a SEC1 (compressed or uncompressed) secp256k1 public key
pub fn authority_from_pubkey(pubkey: &[u8]) -> Result<EvmAddress> {
    let key = VerifyingKey::from_sec1_bytes(pubkey)
        .map_err(|e| RenVmError::InvalidSignature(format!("bad public key: {}", e)))?;
    Ok(address_of(&key))
}

fn address_of(key: &VerifyingKey) -> EvmAddress {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    EvmAddress(address)
}

/// Compare a recomputed sighash with the one the network returned
///
/// A mismatch is logged and tolerated: the network is authoritative for amounts and fees.
pub fn verify_sighash(expected: &[u8; 32], returned: &[u8; 32], tx_hash: &str) -> bool {
    if expected == returned {
        return true;
    }
    warn!(
        tx_hash = %tx_hash,
        expected = %bytes32_to_hex(expected),
        returned = %bytes32_to_hex(returned),
        "Sighash returned by RenVM does not match local computation"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn signer() -> SigningKey {
        SigningKey::from_slice(&[0x11u8; 32]).unwrap()
    }

    fn sign(key: &SigningKey, hash: &[u8; 32]) -> Signature {
        let (sig, recid) = key.sign_prehash_recoverable(hash).unwrap();
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Signature {
            r,
            s,
            v: recid.to_byte() + 27,
        }
    }

    fn authority(key: &SigningKey) -> EvmAddress {
        address_of(key.verifying_key())
    }

    #[test]
    fn test_fix_signature_simple_vectors() {
        let high = Signature {
            r: [0u8; 32],
            s: SECP256K1_N.to_be_bytes::<32>(),
            v: 0,
        };
        let fixed = fix_signature_simple(&high);
        assert_eq!(fixed.s, [0u8; 32]);
        assert_eq!(fixed.v, 28);

        let fixed = fix_signature_simple(&Signature { v: 1, ..high });
        assert_eq!(fixed.s, [0u8; 32]);
        assert_eq!(fixed.v, 27);
    }

    #[test]
    fn test_normalize_v() {
        assert_eq!(normalize_v(0), 27);
        assert_eq!(normalize_v(1), 28);
        assert_eq!(normalize_v(27), 27);
        assert_eq!(normalize_v(28), 28);
    }

    #[test]
    fn test_high_s_is_canonicalized_and_recovers() {
        let key = signer();
        let hash = keccak256(b"mint authorization");
        let good = sign(&key, &hash);

        let high_s = SECP256K1_N - U256::from_be_bytes(good.s);
        let malleated = Signature {
            r: good.r,
            s: high_s.to_be_bytes::<32>(),
            v: flip_v(good.v),
        };

        let fixed = fix_signature(&malleated, &hash, &authority(&key)).unwrap();
        assert_eq!(fixed.s, good.s);
        assert_eq!(fixed.v, good.v);
        assert_eq!(recover_address(&hash, &fixed).unwrap(), authority(&key));
    }

    #[test]
    fn test_wrong_parity_recovered_by_fallback() {
        let key = signer();
        let hash = keccak256(b"wrong parity");
        let good = sign(&key, &hash);
        let bad_v = Signature {
            v: flip_v(good.v),
            ..good
        };

        let fixed = fix_signature(&bad_v, &hash, &authority(&key)).unwrap();
        assert_eq!(fixed.v, good.v);
    }

    #[test]
    fn test_unknown_authority_is_rejected() {
        let key = signer();
        let hash = keccak256(b"someone else");
        let sig = sign(&key, &hash);

        let other = EvmAddress([0x42; 20]);
        match fix_signature(&sig, &hash, &other) {
            Err(RenVmError::AuthorityMismatch { candidates, .. }) => {
                assert_eq!(candidates.len(), 2)
            }
            other => panic!("expected authority mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_authority_from_compressed_pubkey() {
        let key = signer();
        let compressed = key.verifying_key().to_encoded_point(true);
        assert_eq!(
            authority_from_pubkey(compressed.as_bytes()).unwrap(),
            authority(&key)
        );
    }

    #[test]
    fn test_bytes65_roundtrip() {
        let sig = Signature {
            r: [1u8; 32],
            s: [2u8; 32],
            v: 27,
        };
        assert_eq!(Signature::from_bytes65(&sig.to_bytes65()), sig);
        assert_eq!(Signature::from_hex(&sig.to_hex()).unwrap(), sig);
    }

    #[test]
    fn test_verify_sighash_is_soft() {
        assert!(verify_sighash(&[1u8; 32], &[1u8; 32], "tx"));
        assert!(!verify_sighash(&[1u8; 32], &[2u8; 32], "tx"));
    }
}
