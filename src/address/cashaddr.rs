//! CashAddr encoding used by Bitcoin Cash
//!
//! `prefix:payload` where the payload is base32 of `version ‖ hash` followed by a
//! 40-bit BCH checksum computed over the prefix and payload.

use crate::error::{RenVmError, Result};

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATORS: [u64; 5] = [
    0x98f2bc8e61,
    0x79b76d99e2,
    0xf33e5fb3c4,
    0xae2eabe2a8,
    0x1e4f43e470,
];

/// Version byte for a 160-bit P2PKH hash
pub const VERSION_P2PKH: u8 = 0x00;
/// Version byte for a 160-bit P2SH hash
pub const VERSION_P2SH: u8 = 0x08;

fn polymod(values: &[u8]) -> u64 {
    let mut c: u64 = 1;
    for d in values {
        let c0 = c >> 35;
        c = ((c & 0x07_ffff_ffff) << 5) ^ u64::from(*d);
        for (i, generator) in GENERATORS.iter().enumerate() {
            if (c0 >> i) & 1 == 1 {
                c ^= generator;
            }
        }
    }
    c ^ 1
}

fn prefix_values(prefix: &str) -> Vec<u8> {
    let mut values: Vec<u8> = prefix.bytes().map(|b| b & 0x1f).collect();
    values.push(0);
    values
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let max = (1u32 << to) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);
    for value in data {
        let value = u32::from(*value);
        if value >> from != 0 {
            return None;
        }
        acc = (acc << from) | value;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max) as u8);
        }
    }
    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & max) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & max) != 0 {
        return None;
    }
    Some(out)
}

/// Encode `version ‖ hash` under `prefix`
pub fn encode(prefix: &str, version: u8, hash: &[u8]) -> Result<String> {
    let mut raw = Vec::with_capacity(hash.len() + 1);
    raw.push(version);
    raw.extend_from_slice(hash);
    let payload = convert_bits(&raw, 8, 5, true).ok_or_else(|| RenVmError::InvalidAddress {
        address: hex::encode(hash),
        reason: "cannot convert to base32".into(),
    })?;

    let mut checked = prefix_values(prefix);
    checked.extend_from_slice(&payload);
    checked.extend_from_slice(&[0u8; 8]);
    let checksum = polymod(&checked);

    let mut out = String::with_capacity(prefix.len() + 1 + payload.len() + 8);
    out.push_str(prefix);
    out.push(':');
    for value in &payload {
        out.push(CHARSET[*value as usize] as char);
    }
    for i in 0..8 {
        let value = (checksum >> (5 * (7 - i))) & 0x1f;
        out.push(CHARSET[value as usize] as char);
    }
    Ok(out)
}

/// Decode an address, returning `(version, hash)`
///
/// The prefix may be omitted, in which case `default_prefix` is assumed.
pub fn decode(address: &str, default_prefix: &str) -> Result<(u8, Vec<u8>)> {
    let invalid = |reason: &str| RenVmError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let has_upper = address.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = address.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower {
        return Err(invalid("mixed case"));
    }
    let lower = address.to_ascii_lowercase();
    let (prefix, body) = match lower.split_once(':') {
        Some((prefix, body)) => (prefix.to_string(), body.to_string()),
        None => (default_prefix.to_string(), lower.clone()),
    };
    if prefix != default_prefix {
        return Err(invalid("unexpected prefix"));
    }

    let mut values = Vec::with_capacity(body.len());
    for c in body.bytes() {
        let value = CHARSET
            .iter()
            .position(|x| *x == c)
            .ok_or_else(|| invalid("invalid character"))?;
        values.push(value as u8);
    }
    if values.len() < 8 {
        return Err(invalid("too short"));
    }

    let mut checked = prefix_values(&prefix);
    checked.extend_from_slice(&values);
    if polymod(&checked) != 0 {
        return Err(invalid("bad checksum"));
    }

    let payload = &values[..values.len() - 8];
    let raw = convert_bits(payload, 5, 8, false).ok_or_else(|| invalid("bad padding"))?;
    let (version, hash) = raw.split_first().ok_or_else(|| invalid("empty payload"))?;
    Ok((*version, hash.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "76a04053bda0a88bda5177b86a15c3b29f559873";

    #[test]
    fn test_encode_known_vectors() {
        let hash = hex::decode(HASH).unwrap();
        assert_eq!(
            encode("bitcoincash", VERSION_P2SH, &hash).unwrap(),
            "bitcoincash:ppm2qsznhks23z7629mms6s4cwef74vcwvn0h829pq"
        );
        assert_eq!(
            encode("bitcoincash", VERSION_P2PKH, &hash).unwrap(),
            "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a"
        );
    }

    #[test]
    fn test_decode_with_and_without_prefix() {
        let hash = hex::decode(HASH).unwrap();
        let (version, decoded) = decode(
            "bitcoincash:ppm2qsznhks23z7629mms6s4cwef74vcwvn0h829pq",
            "bitcoincash",
        )
        .unwrap();
        assert_eq!(version, VERSION_P2SH);
        assert_eq!(decoded, hash);

        let (_, decoded) =
            decode("ppm2qsznhks23z7629mms6s4cwef74vcwvn0h829pq", "bitcoincash").unwrap();
        assert_eq!(decoded, hash);
    }

    #[test]
    fn test_decode_rejects_bad_checksum_and_prefix() {
        assert!(decode(
            "bitcoincash:ppm2qsznhks23z7629mms6s4cwef74vcwvn0h829pp",
            "bitcoincash"
        )
        .is_err());
        assert!(decode(
            "bitcoincash:ppm2qsznhks23z7629mms6s4cwef74vcwvn0h829pq",
            "bchtest"
        )
        .is_err());
    }
}
