//! Pack type descriptors and values

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::error::{RenVmError, Result};

/// Type descriptor of a pack value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackType {
    Nil,
    Bool,
    U8,
    U16,
    U32,
    U64,
    U128,
    U256,
    Str,
    Bytes,
    Bytes32,
    Bytes65,
    /// Ordered fields; order fixes the binary layout
    Struct(Vec<PackField>),
    List(Box<PackType>),
}

/// Named struct field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackField {
    pub name: String,
    pub ty: PackType,
}

impl PackType {
    /// Build a struct type from `(name, type)` pairs
    pub fn structure(fields: &[(&str, PackType)]) -> Self {
        PackType::Struct(
            fields
                .iter()
                .map(|(name, ty)| PackField {
                    name: name.to_string(),
                    ty: ty.clone(),
                })
                .collect(),
        )
    }

    pub fn list(element: PackType) -> Self {
        PackType::List(Box::new(element))
    }

    /// Numeric identifier used in the binary type encoding
    pub fn id(&self) -> u8 {
        match self {
            PackType::Nil => 0,
            PackType::Bool => 1,
            PackType::U8 => 2,
            PackType::U16 => 3,
            PackType::U32 => 4,
            PackType::U64 => 5,
            PackType::U128 => 6,
            PackType::U256 => 7,
            PackType::Str => 10,
            PackType::Bytes => 11,
            PackType::Bytes32 => 12,
            PackType::Bytes65 => 13,
            PackType::Struct(_) => 20,
            PackType::List(_) => 21,
        }
    }

    /// Name used in the JSON type form; `None` for struct and list
    pub fn primitive_name(&self) -> Option<&'static str> {
        Some(match self {
            PackType::Nil => "nil",
            PackType::Bool => "bool",
            PackType::U8 => "u8",
            PackType::U16 => "u16",
            PackType::U32 => "u32",
            PackType::U64 => "u64",
            PackType::U128 => "u128",
            PackType::U256 => "u256",
            PackType::Str => "string",
            PackType::Bytes => "bytes",
            PackType::Bytes32 => "bytes32",
            PackType::Bytes65 => "bytes65",
            PackType::Struct(_) | PackType::List(_) => return None,
        })
    }

    fn from_primitive_name(name: &str) -> Option<Self> {
        Some(match name {
            "nil" => PackType::Nil,
            "bool" => PackType::Bool,
            "u8" => PackType::U8,
            "u16" => PackType::U16,
            "u32" => PackType::U32,
            "u64" => PackType::U64,
            "u128" => PackType::U128,
            "u256" => PackType::U256,
            "string" => PackType::Str,
            "bytes" => PackType::Bytes,
            "bytes32" => PackType::Bytes32,
            "bytes65" => PackType::Bytes65,
            _ => return None,
        })
    }

    /// JSON form: `"u256"`, `{"struct": [{"name": T}, ...]}` or `{"list": T}`
    pub fn to_json(&self) -> Value {
        match self {
            PackType::Struct(fields) => {
                let fields: Vec<Value> = fields
                    .iter()
                    .map(|field| {
                        let mut entry = Map::new();
                        entry.insert(field.name.clone(), field.ty.to_json());
                        Value::Object(entry)
                    })
                    .collect();
                json!({ "struct": fields })
            }
            PackType::List(element) => json!({ "list": element.to_json() }),
            primitive => Value::String(primitive.primitive_name().unwrap_or("nil").to_string()),
        }
    }

    /// Parse the JSON form; unknown type tags are decode errors
    pub fn from_json(value: &Value) -> Result<Self> {
        Self::from_json_at(value, "t")
    }

    fn from_json_at(value: &Value, path: &str) -> Result<Self> {
        match value {
            Value::String(name) => Self::from_primitive_name(name)
                .ok_or_else(|| RenVmError::decode(path, format!("unknown type {}", name))),
            Value::Object(object) => {
                if let Some(fields) = object.get("struct") {
                    let fields = fields
                        .as_array()
                        .ok_or_else(|| RenVmError::decode(path, "struct fields must be a list"))?;
                    let mut out = Vec::with_capacity(fields.len());
                    for field in fields {
                        let entry = field.as_object().filter(|o| o.len() == 1).ok_or_else(|| {
                            RenVmError::decode(path, "struct field must be a single-key object")
                        })?;
                        for (name, ty) in entry {
                            out.push(PackField {
                                name: name.clone(),
                                ty: Self::from_json_at(ty, &format!("{}.{}", path, name))?,
                            });
                        }
                    }
                    Ok(PackType::Struct(out))
                } else if let Some(element) = object.get("list") {
                    Ok(PackType::list(Self::from_json_at(
                        element,
                        &format!("{}[]", path),
                    )?))
                } else {
                    Err(RenVmError::decode(path, "unrecognized type object"))
                }
            }
            other => Err(RenVmError::decode(path, format!("unrecognized type {}", other))),
        }
    }
}

impl fmt::Display for PackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for PackType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        PackType::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// A pack value; its shape must match the [`PackType`] it is paired with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackValue {
    Nil,
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    U256(U256),
    Str(String),
    Bytes(Vec<u8>),
    Bytes32([u8; 32]),
    Bytes65([u8; 65]),
    Struct(Vec<(String, PackValue)>),
    List(Vec<PackValue>),
}

impl PackValue {
    /// Build a struct value from `(name, value)` pairs
    pub fn structure(fields: Vec<(&str, PackValue)>) -> Self {
        PackValue::Struct(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            PackValue::Nil => "nil",
            PackValue::Bool(_) => "bool",
            PackValue::U8(_) => "u8",
            PackValue::U16(_) => "u16",
            PackValue::U32(_) => "u32",
            PackValue::U64(_) => "u64",
            PackValue::U128(_) => "u128",
            PackValue::U256(_) => "u256",
            PackValue::Str(_) => "string",
            PackValue::Bytes(_) => "bytes",
            PackValue::Bytes32(_) => "bytes32",
            PackValue::Bytes65(_) => "bytes65",
            PackValue::Struct(_) => "struct",
            PackValue::List(_) => "list",
        }
    }

    /// Check recursively that this value has the shape of `ty`
    pub fn check(&self, ty: &PackType) -> Result<()> {
        self.check_at(ty, "v")
    }

    fn check_at(&self, ty: &PackType, path: &str) -> Result<()> {
        let ok = match (ty, self) {
            (PackType::Nil, PackValue::Nil)
            | (PackType::Bool, PackValue::Bool(_))
            | (PackType::U8, PackValue::U8(_))
            | (PackType::U16, PackValue::U16(_))
            | (PackType::U32, PackValue::U32(_))
            | (PackType::U64, PackValue::U64(_))
            | (PackType::U128, PackValue::U128(_))
            | (PackType::U256, PackValue::U256(_))
            | (PackType::Str, PackValue::Str(_))
            | (PackType::Bytes, PackValue::Bytes(_))
            | (PackType::Bytes32, PackValue::Bytes32(_))
            | (PackType::Bytes65, PackValue::Bytes65(_)) => true,
            (PackType::Struct(fields), PackValue::Struct(values)) => {
                if fields.len() != values.len() {
                    return Err(RenVmError::decode(
                        path,
                        format!("expected {} fields, got {}", fields.len(), values.len()),
                    ));
                }
                for (field, (name, value)) in fields.iter().zip(values) {
                    if &field.name != name {
                        return Err(RenVmError::decode(
                            path,
                            format!("expected field {}, got {}", field.name, name),
                        ));
                    }
                    value.check_at(&field.ty, &format!("{}.{}", path, name))?;
                }
                true
            }
            (PackType::List(element), PackValue::List(values)) => {
                for (i, value) in values.iter().enumerate() {
                    value.check_at(element, &format!("{}[{}]", path, i))?;
                }
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(RenVmError::decode(
                path,
                format!("expected {}, got {}", ty, self.kind()),
            ))
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Look up a struct field by name
    pub fn field(&self, name: &str) -> Result<&PackValue> {
        match self {
            PackValue::Struct(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value)
                .ok_or_else(|| RenVmError::decode(name, "missing field")),
            other => Err(RenVmError::decode(
                name,
                format!("field lookup on {}", other.kind()),
            )),
        }
    }

    /// Like [`PackValue::field`] but absent fields are `None`
    pub fn opt_field(&self, name: &str) -> Option<&PackValue> {
        self.field(name).ok()
    }

    /// Any unsigned integer widened to 256 bits
    pub fn as_u256(&self) -> Result<U256> {
        match self {
            PackValue::U8(v) => Ok(U256::from(*v)),
            PackValue::U16(v) => Ok(U256::from(*v)),
            PackValue::U32(v) => Ok(U256::from(*v)),
            PackValue::U64(v) => Ok(U256::from(*v)),
            PackValue::U128(v) => Ok(U256::from(*v)),
            PackValue::U256(v) => Ok(*v),
            other => Err(RenVmError::decode("uint", format!("got {}", other.kind()))),
        }
    }

    /// Any unsigned integer that fits in 64 bits
    pub fn as_u64(&self) -> Result<u64> {
        let wide = self.as_u256()?;
        u64::try_from(wide).map_err(|_| RenVmError::decode("u64", format!("{} overflows", wide)))
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            PackValue::Str(s) => Ok(s.as_str()),
            other => Err(RenVmError::decode("string", format!("got {}", other.kind()))),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            PackValue::Bool(b) => Ok(*b),
            other => Err(RenVmError::decode("bool", format!("got {}", other.kind()))),
        }
    }

    /// Raw bytes of any byte type
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            PackValue::Bytes(b) => Ok(b.as_slice()),
            PackValue::Bytes32(b) => Ok(b.as_slice()),
            PackValue::Bytes65(b) => Ok(b.as_slice()),
            other => Err(RenVmError::decode("bytes", format!("got {}", other.kind()))),
        }
    }

    pub fn as_bytes32(&self) -> Result<[u8; 32]> {
        crate::types::to_bytes32(self.as_bytes()?)
    }

    pub fn as_bytes65(&self) -> Result<[u8; 65]> {
        let bytes = self.as_bytes()?;
        bytes
            .try_into()
            .map_err(|_| RenVmError::decode("bytes65", format!("got {} bytes", bytes.len())))
    }

    pub fn as_list(&self) -> Result<&[PackValue]> {
        match self {
            PackValue::List(items) => Ok(items.as_slice()),
            other => Err(RenVmError::decode("list", format!("got {}", other.kind()))),
        }
    }
}

/// A value paired with its own type descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedValue {
    pub t: PackType,
    pub v: PackValue,
}

impl TypedValue {
    /// Pair a value with its type, rejecting mismatched shapes
    pub fn new(t: PackType, v: PackValue) -> Result<Self> {
        v.check(&t)?;
        Ok(Self { t, v })
    }

    /// The empty struct `{t: {struct: []}, v: {}}`
    pub fn empty_struct() -> Self {
        Self {
            t: PackType::Struct(Vec::new()),
            v: PackValue::Struct(Vec::new()),
        }
    }
}
