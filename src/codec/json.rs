//! JSON codec using `serde_json`.
//!
//! Unit values get special treatment on both ends: a capability returning
//! `()` replies with [`UNIT_RESULT`], and a caller asking for `()` accepts
//! whatever result arrives.

use std::any::TypeId;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Result sent for capabilities that return nothing.
pub const UNIT_RESULT: &str = "OK";

/// JSON codec for envelopes and opaque values.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode a capability return value.
    pub fn encode_result<T: Serialize + 'static>(value: &T) -> Result<Value> {
        if TypeId::of::<T>() == TypeId::of::<()>() {
            return Ok(Value::String(UNIT_RESULT.to_string()));
        }
        Ok(serde_json::to_value(value)?)
    }

    /// Decode a result into the caller's requested type.
    pub fn decode_result<T: DeserializeOwned + 'static>(value: Value) -> Result<T> {
        if TypeId::of::<T>() == TypeId::of::<()>() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Encode call parameters into a positional list.
    ///
    /// Tuples and sequences serialize as arrays and map one element per
    /// parameter. `()` means no parameters; any other value is a single
    /// parameter.
    pub fn encode_params<P: Serialize>(params: &P) -> Result<Vec<Value>> {
        Ok(match serde_json::to_value(params)? {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            other => vec![other],
        })
    }
}
