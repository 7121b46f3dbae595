//! Canonical binary encoding
//!
//! This is the byte form that feeds transaction hashes, so it must be reproducible
//! bit for bit:
//!
//! - unsigned integers: fixed-width big-endian
//! - bool: one byte
//! - string / bytes: u32 length prefix, then the raw bytes
//! - bytes32 / bytes65: raw bytes
//! - struct: field encodings concatenated in declared order
//! - list: u32 element count, then each element
//!
//! No type tags appear in a value encoding. [`marshal_type`] encodes the descriptor
//! separately and [`marshal_typed`] concatenates the two.

use super::types::{PackType, PackValue, TypedValue};

/// Length-prefixed UTF-8 string
pub fn marshal_string(value: &str) -> Vec<u8> {
    marshal_bytes(value.as_bytes())
}

/// Length-prefixed byte string
pub fn marshal_bytes(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + value.len());
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
    out
}

/// Encode a value without its type
pub fn marshal(value: &PackValue) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &PackValue, out: &mut Vec<u8>) {
    match value {
        PackValue::Nil => {}
        PackValue::Bool(b) => out.push(u8::from(*b)),
        PackValue::U8(v) => out.push(*v),
        PackValue::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
        PackValue::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
        PackValue::U64(v) => out.extend_from_slice(&v.to_be_bytes()),
        PackValue::U128(v) => out.extend_from_slice(&v.to_be_bytes()),
        PackValue::U256(v) => out.extend_from_slice(&v.to_be_bytes::<32>()),
        PackValue::Str(s) => out.extend_from_slice(&marshal_string(s)),
        PackValue::Bytes(b) => out.extend_from_slice(&marshal_bytes(b)),
        PackValue::Bytes32(b) => out.extend_from_slice(b),
        PackValue::Bytes65(b) => out.extend_from_slice(b),
        PackValue::Struct(fields) => {
            for (_, field) in fields {
                write_value(field, out);
            }
        }
        PackValue::List(items) => {
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                write_value(item, out);
            }
        }
    }
}

/// Encode a type descriptor
pub fn marshal_type(ty: &PackType) -> Vec<u8> {
    let mut out = Vec::new();
    write_type(ty, &mut out);
    out
}

fn write_type(ty: &PackType, out: &mut Vec<u8>) {
    out.push(ty.id());
    match ty {
        PackType::Struct(fields) => {
            out.extend_from_slice(&(fields.len() as u32).to_be_bytes());
            for field in fields {
                out.extend_from_slice(&marshal_string(&field.name));
                write_type(&field.ty, out);
            }
        }
        PackType::List(element) => write_type(element, out),
        _ => {}
    }
}

/// Type encoding followed by value encoding
pub fn marshal_typed(typed: &TypedValue) -> Vec<u8> {
    let mut out = marshal_type(&typed.t);
    write_value(&typed.v, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    #[test]
    fn test_marshal_primitives() {
        assert_eq!(marshal(&PackValue::Bool(true)), vec![1]);
        assert_eq!(marshal(&PackValue::U16(0x0102)), vec![1, 2]);
        assert_eq!(marshal(&PackValue::U32(1)), vec![0, 0, 0, 1]);
        assert_eq!(marshal(&PackValue::U64(1)).len(), 8);
        assert_eq!(marshal(&PackValue::U128(1)).len(), 16);

        let wide = marshal(&PackValue::U256(U256::from(0x1234u64)));
        assert_eq!(wide.len(), 32);
        assert_eq!(&wide[30..], &[0x12, 0x34]);
    }

    #[test]
    fn test_marshal_length_prefixed() {
        assert_eq!(
            marshal(&PackValue::Str("ab".into())),
            vec![0, 0, 0, 2, b'a', b'b']
        );
        assert_eq!(marshal(&PackValue::Bytes(vec![])), vec![0, 0, 0, 0]);
        assert_eq!(marshal(&PackValue::Bytes32([7u8; 32])), vec![7u8; 32]);
    }

    #[test]
    fn test_marshal_struct_is_ordered_concatenation() {
        let value = PackValue::structure(vec![
            ("a", PackValue::U8(1)),
            ("b", PackValue::U8(2)),
        ]);
        assert_eq!(marshal(&value), vec![1, 2]);

        let swapped = PackValue::structure(vec![
            ("b", PackValue::U8(2)),
            ("a", PackValue::U8(1)),
        ]);
        assert_ne!(marshal(&value), marshal(&swapped));
    }

    #[test]
    fn test_marshal_list_has_count_prefix() {
        let value = PackValue::List(vec![PackValue::U8(9), PackValue::U8(8)]);
        assert_eq!(marshal(&value), vec![0, 0, 0, 2, 9, 8]);
    }

    #[test]
    fn test_marshal_type() {
        assert_eq!(marshal_type(&PackType::U256), vec![7]);
        assert_eq!(marshal_type(&PackType::list(PackType::Bytes32)), vec![21, 12]);

        let ty = PackType::structure(&[("to", PackType::Str)]);
        assert_eq!(
            marshal_type(&ty),
            vec![20, 0, 0, 0, 1, 0, 0, 0, 2, b't', b'o', 10]
        );
    }

    #[test]
    fn test_marshal_typed_concatenates() {
        let typed = TypedValue::new(
            PackType::structure(&[("n", PackType::U8)]),
            PackValue::structure(vec![("n", PackValue::U8(5))]),
        )
        .unwrap();
        let mut expected = marshal_type(&typed.t);
        expected.push(5);
        assert_eq!(marshal_typed(&typed), expected);
    }
}
