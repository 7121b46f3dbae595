//! Gateway address derivation for UTXO chains
//!
//! A gateway address is the P2SH address of the script
//!
//! ```text
//! PUSH(gHash) OP_DROP OP_DUP OP_HASH160 PUSH(hash160(gPubKey)) OP_EQUALVERIFY OP_CHECKSIG
//! ```
//!
//! It depends only on the network, the shard key hash and the gateway hash, so a
//! deposit is detected by plain address equality. Chain families share the script and
//! differ only in how the script hash is rendered ([`AddressFamily`]).

pub mod cashaddr;

use bech32::FromBase32;

use crate::error::{RenVmError, Result};
use crate::hash::hash160;

const OP_DROP: u8 = 0x75;
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

/// How a family renders hashes as addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressEncoding {
    /// base58check with per-network version prefixes
    Base58 {
        p2sh_mainnet: &'static [u8],
        p2sh_testnet: &'static [u8],
        p2pkh_mainnet: &'static [u8],
        p2pkh_testnet: &'static [u8],
        /// bech32 human-readable parts for segwit, when supported
        segwit_hrp: Option<(&'static str, &'static str)>,
    },
    /// CashAddr, with base58 legacy addresses still accepted on decode
    CashAddr {
        prefix_mainnet: &'static str,
        prefix_testnet: &'static str,
        legacy_p2sh_mainnet: u8,
        legacy_p2sh_testnet: u8,
    },
}

/// Parameters of one UTXO chain family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFamily {
    pub name: &'static str,
    pub encoding: AddressEncoding,
}

pub const BITCOIN: AddressFamily = AddressFamily {
    name: "Bitcoin",
    encoding: AddressEncoding::Base58 {
        p2sh_mainnet: &[0x05],
        p2sh_testnet: &[0xc4],
        p2pkh_mainnet: &[0x00],
        p2pkh_testnet: &[0x6f],
        segwit_hrp: Some(("bc", "tb")),
    },
};

pub const ZCASH: AddressFamily = AddressFamily {
    name: "Zcash",
    encoding: AddressEncoding::Base58 {
        p2sh_mainnet: &[0x1c, 0xbd],
        p2sh_testnet: &[0x1c, 0xba],
        p2pkh_mainnet: &[0x1c, 0xb8],
        p2pkh_testnet: &[0x1d, 0x25],
        segwit_hrp: None,
    },
};

pub const BITCOIN_CASH: AddressFamily = AddressFamily {
    name: "BitcoinCash",
    encoding: AddressEncoding::CashAddr {
        prefix_mainnet: "bitcoincash",
        prefix_testnet: "bchtest",
        legacy_p2sh_mainnet: 0x05,
        legacy_p2sh_testnet: 0xc4,
    },
};

pub const DIGIBYTE: AddressFamily = AddressFamily {
    name: "DigiByte",
    encoding: AddressEncoding::Base58 {
        p2sh_mainnet: &[0x3f],
        p2sh_testnet: &[0x8c],
        p2pkh_mainnet: &[0x1e],
        p2pkh_testnet: &[0x7e],
        segwit_hrp: Some(("dgb", "dgbt")),
    },
};

pub const DOGECOIN: AddressFamily = AddressFamily {
    name: "Dogecoin",
    encoding: AddressEncoding::Base58 {
        p2sh_mainnet: &[0x16],
        p2sh_testnet: &[0xc4],
        p2pkh_mainnet: &[0x1e],
        p2pkh_testnet: &[0x71],
        segwit_hrp: None,
    },
};

/// Look a family up by chain name
pub fn family_by_name(name: &str) -> Option<AddressFamily> {
    [BITCOIN, ZCASH, BITCOIN_CASH, DIGIBYTE, DOGECOIN]
        .into_iter()
        .find(|family| family.name.eq_ignore_ascii_case(name))
}

// ============================================================================
// Derivation
// ============================================================================

/// The gateway redeem script
pub fn gateway_script(gateway_hash: &[u8; 32], pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(1 + 32 + 4 + 20 + 2);
    script.push(32);
    script.extend_from_slice(gateway_hash);
    script.extend_from_slice(&[OP_DROP, OP_DUP, OP_HASH160, 20]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

/// Deposit address for a gateway
pub fn derive_gateway_address(
    family: &AddressFamily,
    is_testnet: bool,
    pubkey_hash: &[u8; 20],
    gateway_hash: &[u8; 32],
) -> Result<String> {
    let script_hash = hash160(&gateway_script(gateway_hash, pubkey_hash));
    script_hash_to_address(family, is_testnet, &script_hash)
}

/// Render a 20-byte script hash as a P2SH address
pub fn script_hash_to_address(
    family: &AddressFamily,
    is_testnet: bool,
    script_hash: &[u8; 20],
) -> Result<String> {
    match family.encoding {
        AddressEncoding::Base58 {
            p2sh_mainnet,
            p2sh_testnet,
            ..
        } => {
            let prefix = if is_testnet { p2sh_testnet } else { p2sh_mainnet };
            let mut raw = prefix.to_vec();
            raw.extend_from_slice(script_hash);
            Ok(bs58::encode(raw).with_check().into_string())
        }
        AddressEncoding::CashAddr {
            prefix_mainnet,
            prefix_testnet,
            ..
        } => {
            let prefix = if is_testnet { prefix_testnet } else { prefix_mainnet };
            cashaddr::encode(prefix, cashaddr::VERSION_P2SH, script_hash)
        }
    }
}

/// Recover the script hash from a P2SH address (or the witness program from a
/// segwit address)
pub fn address_to_script_hash(
    family: &AddressFamily,
    is_testnet: bool,
    address: &str,
) -> Result<Vec<u8>> {
    let invalid = |reason: String| RenVmError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    match family.encoding {
        AddressEncoding::Base58 {
            p2sh_mainnet,
            p2sh_testnet,
            segwit_hrp,
            ..
        } => {
            if let Some(program) = decode_segwit(address, segwit_hrp, is_testnet) {
                return Ok(program);
            }
            let prefix = if is_testnet { p2sh_testnet } else { p2sh_mainnet };
            let raw = decode_base58(address).map_err(invalid)?;
            strip_prefix(&raw, prefix)
                .ok_or_else(|| invalid(format!("not a {} P2SH address", family.name)))
        }
        AddressEncoding::CashAddr {
            prefix_mainnet,
            prefix_testnet,
            legacy_p2sh_mainnet,
            legacy_p2sh_testnet,
        } => {
            let prefix = if is_testnet { prefix_testnet } else { prefix_mainnet };
            match cashaddr::decode(address, prefix) {
                Ok((cashaddr::VERSION_P2SH, hash)) => Ok(hash),
                Ok((version, _)) => Err(invalid(format!("version {} is not P2SH", version))),
                Err(_) => {
                    let legacy = if is_testnet {
                        legacy_p2sh_testnet
                    } else {
                        legacy_p2sh_mainnet
                    };
                    let raw = decode_base58(address).map_err(invalid)?;
                    strip_prefix(&raw, &[legacy])
                        .ok_or_else(|| invalid("not a P2SH address".to_string()))
                }
            }
        }
    }
}

/// Whether `address` is any address the family accepts on this network
pub fn is_valid_address(family: &AddressFamily, is_testnet: bool, address: &str) -> bool {
    match family.encoding {
        AddressEncoding::Base58 {
            p2sh_mainnet,
            p2sh_testnet,
            p2pkh_mainnet,
            p2pkh_testnet,
            segwit_hrp,
        } => {
            if decode_segwit(address, segwit_hrp, is_testnet).is_some() {
                return true;
            }
            let (p2sh, p2pkh) = if is_testnet {
                (p2sh_testnet, p2pkh_testnet)
            } else {
                (p2sh_mainnet, p2pkh_mainnet)
            };
            match decode_base58(address) {
                Ok(raw) => strip_prefix(&raw, p2sh).is_some() || strip_prefix(&raw, p2pkh).is_some(),
                Err(_) => false,
            }
        }
        AddressEncoding::CashAddr {
            prefix_mainnet,
            prefix_testnet,
            ..
        } => {
            let prefix = if is_testnet { prefix_testnet } else { prefix_mainnet };
            cashaddr::decode(address, prefix).is_ok()
                || address_to_script_hash(family, is_testnet, address).is_ok()
        }
    }
}

fn decode_base58(address: &str) -> std::result::Result<Vec<u8>, String> {
    bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| e.to_string())
}

fn strip_prefix(raw: &[u8], prefix: &[u8]) -> Option<Vec<u8>> {
    let hash = raw.strip_prefix(prefix)?;
    (hash.len() == 20).then(|| hash.to_vec())
}

fn decode_segwit(
    address: &str,
    hrp: Option<(&'static str, &'static str)>,
    is_testnet: bool,
) -> Option<Vec<u8>> {
    let (mainnet, testnet) = hrp?;
    let expected = if is_testnet { testnet } else { mainnet };
    let (decoded_hrp, data, _variant) = bech32::decode(address).ok()?;
    if decoded_hrp != expected || data.is_empty() {
        return None;
    }
    Vec::<u8>::from_base32(&data[1..]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY_HASH: &str = "751e76e8199196d454941c45d1b3a323f1433bd6";

    fn inputs() -> ([u8; 20], [u8; 32]) {
        let mut pkh = [0u8; 20];
        pkh.copy_from_slice(&hex::decode(PUBKEY_HASH).unwrap());
        let mut ghash = [0u8; 32];
        for (i, b) in ghash.iter_mut().enumerate() {
            *b = i as u8;
        }
        (pkh, ghash)
    }

    #[test]
    fn test_gateway_script_layout() {
        let (pkh, ghash) = inputs();
        let script = gateway_script(&ghash, &pkh);
        assert_eq!(
            hex::encode(&script),
            "20000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f\
             7576a914751e76e8199196d454941c45d1b3a323f1433bd688ac"
        );
    }

    #[test]
    fn test_derive_known_addresses() {
        let (pkh, ghash) = inputs();
        let cases = [
            (BITCOIN, false, "3HcArgbAbBKEPFFkdgddYSU195YmFU4N6N"),
            (BITCOIN, true, "2N9ANvRXCCdpab2tJJpFWAPTGMRkw61fG7o"),
            (ZCASH, false, "t3aUms21JZW6pytJea7SkgFZvPjjr53CLNb"),
            (ZCASH, true, "t2NTxuh7SRxiCXatPVrSoDskZWDy1vbexqJ"),
            (
                BITCOIN_CASH,
                false,
                "bitcoincash:pzhfwc7knxdgnufkajw0lhedqv03kdj4xssclg6knw",
            ),
            (
                BITCOIN_CASH,
                true,
                "bchtest:pzhfwc7knxdgnufkajw0lhedqv03kdj4xs52m0cp5j",
            ),
            (DIGIBYTE, false, "SdD9xyssmeC3pPLn41x7fiFdeLVUWkBXGV"),
            (DOGECOIN, false, "A8MRbXf4fFC8HcdE3pJ3na6NqevoMYwjEG"),
        ];
        for (family, testnet, expected) in cases {
            assert_eq!(
                derive_gateway_address(&family, testnet, &pkh, &ghash).unwrap(),
                expected,
                "{} testnet={}",
                family.name,
                testnet
            );
        }
    }

    #[test]
    fn test_derivation_is_deterministic_and_nonce_sensitive() {
        let (pkh, ghash) = inputs();
        let a = derive_gateway_address(&BITCOIN, true, &pkh, &ghash).unwrap();
        let b = derive_gateway_address(&BITCOIN, true, &pkh, &ghash).unwrap();
        assert_eq!(a, b);

        let mut other = ghash;
        other[0] ^= 1;
        let c = derive_gateway_address(&BITCOIN, true, &pkh, &other).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_script_hash_roundtrip_all_families() {
        let script_hash = hex::decode("ae9763d6999a89f136ec9cffdf2d031f1b365534").unwrap();
        let fixed: [u8; 20] = script_hash.as_slice().try_into().unwrap();
        for family in [BITCOIN, ZCASH, BITCOIN_CASH, DIGIBYTE, DOGECOIN] {
            for testnet in [false, true] {
                let address = script_hash_to_address(&family, testnet, &fixed).unwrap();
                assert_eq!(
                    address_to_script_hash(&family, testnet, &address).unwrap(),
                    script_hash,
                    "{} testnet={}",
                    family.name,
                    testnet
                );
                assert!(is_valid_address(&family, testnet, &address));
            }
        }
    }

    #[test]
    fn test_bitcoin_cash_accepts_legacy_p2sh() {
        assert_eq!(
            hex::encode(
                address_to_script_hash(&BITCOIN_CASH, false, "3CWFddi6m4ndiGyKqzYvsFYagqDLPVMTzC")
                    .unwrap()
            ),
            "76a04053bda0a88bda5177b86a15c3b29f559873"
        );
    }

    #[test]
    fn test_segwit_decodes_to_program() {
        let program = address_to_script_hash(
            &BITCOIN,
            false,
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
        )
        .unwrap();
        assert_eq!(hex::encode(program), PUBKEY_HASH);
    }

    #[test]
    fn test_wrong_network_rejected() {
        assert!(address_to_script_hash(&BITCOIN, true, "3HcArgbAbBKEPFFkdgddYSU195YmFU4N6N").is_err());
        assert!(!is_valid_address(&BITCOIN, false, "not-an-address"));
        assert!(is_valid_address(&BITCOIN, false, "1BpEi6DfDAUFd7GtittLSdBeYJvcoaVggu"));
    }

    #[test]
    fn test_family_lookup() {
        assert_eq!(family_by_name("bitcoincash"), Some(BITCOIN_CASH));
        assert_eq!(family_by_name("Zcash"), Some(ZCASH));
        assert!(family_by_name("Ethereum").is_none());
    }
}
