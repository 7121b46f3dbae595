//! Pack: RenVM's typed value format
//!
//! A [`TypedValue`] pairs a [`PackValue`] tree with its [`PackType`] descriptor.
//! Two encodings exist:
//!
//! - **binary** ([`marshal`], [`marshal_type`], [`marshal_typed`]): canonical bytes used
//!   for transaction hashes
//! - **transport** ([`to_transport`], [`unmarshal`]): the JSON form sent to and received
//!   from RenVM nodes
//!
//! ## Usage
//!
//! ```ignore
//! use renvm_rs::pack::{PackType, PackValue, to_transport, unmarshal};
//!
//! let ty = PackType::structure(&[("to", PackType::Str)]);
//! let value = PackValue::structure(vec![("to", PackValue::Str("0xabc".into()))]);
//! assert_eq!(unmarshal(&ty, &to_transport(&value))?, value);
//! ```

pub mod binary;
pub mod transport;
pub mod types;

pub use binary::{marshal, marshal_bytes, marshal_string, marshal_type, marshal_typed};
pub use transport::{to_transport, typed_to_transport, unmarshal, unmarshal_typed};
pub use types::{PackField, PackType, PackValue, TypedValue};
