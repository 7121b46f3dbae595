//! JSON transport encoding
//!
//! Unsigned integers travel as decimal strings, byte types as URL-safe base64 without
//! padding. Decoding is driven by the type descriptor and fails with a decode error on
//! any shape mismatch.

use alloy::primitives::U256;
use serde_json::{Map, Value};

use super::types::{PackType, PackValue, TypedValue};
use crate::error::{RenVmError, Result};
use crate::types::{from_url_base64, to_url_base64};

/// Encode a value into its transport form
pub fn to_transport(value: &PackValue) -> Value {
    match value {
        PackValue::Nil => Value::Null,
        PackValue::Bool(b) => Value::Bool(*b),
        PackValue::U8(v) => Value::String(v.to_string()),
        PackValue::U16(v) => Value::String(v.to_string()),
        PackValue::U32(v) => Value::String(v.to_string()),
        PackValue::U64(v) => Value::String(v.to_string()),
        PackValue::U128(v) => Value::String(v.to_string()),
        PackValue::U256(v) => Value::String(v.to_string()),
        PackValue::Str(s) => Value::String(s.clone()),
        PackValue::Bytes(b) => Value::String(to_url_base64(b)),
        PackValue::Bytes32(b) => Value::String(to_url_base64(b)),
        PackValue::Bytes65(b) => Value::String(to_url_base64(b)),
        PackValue::Struct(fields) => {
            let mut object = Map::new();
            for (name, field) in fields {
                object.insert(name.clone(), to_transport(field));
            }
            Value::Object(object)
        }
        PackValue::List(items) => Value::Array(items.iter().map(to_transport).collect()),
    }
}

/// `{"t": type, "v": value}`
pub fn typed_to_transport(typed: &TypedValue) -> Value {
    let mut object = Map::new();
    object.insert("t".to_string(), typed.t.to_json());
    object.insert("v".to_string(), to_transport(&typed.v));
    Value::Object(object)
}

/// Decode a transport value against a type descriptor
pub fn unmarshal(ty: &PackType, value: &Value) -> Result<PackValue> {
    unmarshal_at(ty, value, "v")
}

/// Decode `{"t": type, "v": value}` using the embedded type
pub fn unmarshal_typed(value: &Value) -> Result<TypedValue> {
    let t = value
        .get("t")
        .ok_or_else(|| RenVmError::decode("t", "missing type"))?;
    let t = PackType::from_json(t)?;
    let v = value
        .get("v")
        .ok_or_else(|| RenVmError::decode("v", "missing value"))?;
    let v = unmarshal(&t, v)?;
    Ok(TypedValue { t, v })
}

fn unmarshal_at(ty: &PackType, value: &Value, path: &str) -> Result<PackValue> {
    match ty {
        PackType::Nil => Ok(PackValue::Nil),
        PackType::Bool => value
            .as_bool()
            .map(PackValue::Bool)
            .ok_or_else(|| mismatch(path, "bool", value)),
        PackType::U8 => parse_small::<u8>(value, path).map(PackValue::U8),
        PackType::U16 => parse_small::<u16>(value, path).map(PackValue::U16),
        PackType::U32 => parse_small::<u32>(value, path).map(PackValue::U32),
        PackType::U64 => parse_small::<u64>(value, path).map(PackValue::U64),
        PackType::U128 => parse_small::<u128>(value, path).map(PackValue::U128),
        PackType::U256 => parse_u256(value, path).map(PackValue::U256),
        PackType::Str => value
            .as_str()
            .map(|s| PackValue::Str(s.to_string()))
            .ok_or_else(|| mismatch(path, "string", value)),
        PackType::Bytes => decode_bytes(value, path).map(PackValue::Bytes),
        PackType::Bytes32 => {
            let bytes = decode_bytes(value, path)?;
            let fixed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                RenVmError::decode(path, format!("expected 32 bytes, got {}", bytes.len()))
            })?;
            Ok(PackValue::Bytes32(fixed))
        }
        PackType::Bytes65 => {
            let bytes = decode_bytes(value, path)?;
            let fixed: [u8; 65] = bytes.as_slice().try_into().map_err(|_| {
                RenVmError::decode(path, format!("expected 65 bytes, got {}", bytes.len()))
            })?;
            Ok(PackValue::Bytes65(fixed))
        }
        PackType::Struct(fields) => {
            let object = value
                .as_object()
                .ok_or_else(|| mismatch(path, "struct", value))?;
            let mut out = Vec::with_capacity(fields.len());
            for field in fields {
                let field_path = format!("{}.{}", path, field.name);
                let raw = object
                    .get(&field.name)
                    .ok_or_else(|| RenVmError::decode(&field_path, "missing field"))?;
                out.push((field.name.clone(), unmarshal_at(&field.ty, raw, &field_path)?));
            }
            Ok(PackValue::Struct(out))
        }
        PackType::List(element) => {
            let items = value
                .as_array()
                .ok_or_else(|| mismatch(path, "list", value))?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| unmarshal_at(element, item, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>>>()
                .map(PackValue::List)
        }
    }
}

fn mismatch(path: &str, expected: &str, value: &Value) -> RenVmError {
    RenVmError::decode(path, format!("expected {}, got {}", expected, value))
}

fn parse_small<T>(value: &Value, path: &str) -> Result<T>
where
    T: std::str::FromStr + TryFrom<u64>,
{
    match value {
        Value::String(s) => s
            .parse::<T>()
            .map_err(|_| RenVmError::decode(path, format!("invalid integer {}", s))),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| T::try_from(n).ok())
            .ok_or_else(|| RenVmError::decode(path, format!("invalid integer {}", n))),
        other => Err(mismatch(path, "integer", other)),
    }
}

fn parse_u256(value: &Value, path: &str) -> Result<U256> {
    match value {
        Value::String(s) => U256::from_str_radix(s, 10)
            .map_err(|e| RenVmError::decode(path, format!("invalid integer {}: {}", s, e))),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| RenVmError::decode(path, format!("invalid integer {}", n))),
        other => Err(mismatch(path, "integer", other)),
    }
}

fn decode_bytes(value: &Value, path: &str) -> Result<Vec<u8>> {
    let encoded = value
        .as_str()
        .ok_or_else(|| mismatch(path, "base64 string", value))?;
    from_url_base64(encoded).map_err(|e| RenVmError::decode(path, e.to_string()))
}
