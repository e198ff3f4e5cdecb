//! Request and response envelopes.
//!
//! The wire shape follows JSON-RPC 2.0:
//!
//! ```text
//! request:  { "jsonrpc": "2.0", "id": "...", "method": "...", "params": [..] }
//! response: { "jsonrpc": "2.0", "id": "...", "result": .. }
//!           { "jsonrpc": "2.0", "id": "...", "error": { "code", "message", "data"?, "exceptionType"? } }
//! ```
//!
//! `params` may be absent or `null` on the wire, both meaning "no parameters".
//! Numeric ids are accepted and kept in their decimal text form.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error_code::{ErrorCode, Reason};
use crate::error::RpcError;
use crate::exception::RemoteException;

/// Protocol version carried in every envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// A method-call envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Protocol version, must be [`PROTOCOL_VERSION`]. Absent decodes as "".
    #[serde(default)]
    pub jsonrpc: String,
    /// Caller-assigned request id, echoed on the response.
    #[serde(default, deserialize_with = "id_text")]
    pub id: String,
    /// Capability name.
    pub method: String,
    /// Positional parameters.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Vec<Value>,
}

impl CallRequest {
    /// Create a request for the current protocol version.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Whether the version field matches [`PROTOCOL_VERSION`].
    #[inline]
    pub fn is_supported_version(&self) -> bool {
        self.jsonrpc == PROTOCOL_VERSION
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

fn id_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_from_value(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid id: {value}")))
}

/// String ids as-is, numbers in decimal, `null` as the empty id.
fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Keeps an explicit `null` distinguishable from an absent member.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// The error member of a response.
///
/// In memory the per-parameter messages and the exception payload are kept
/// apart; on the wire both share the `data` member, with `exceptionType`
/// telling them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireError", into = "WireError")]
pub struct CallError {
    /// Numeric error class.
    pub code: i32,
    /// Reason text (or the exception message for application exceptions).
    pub reason: String,
    /// Per-parameter validation messages.
    pub messages: Option<Vec<String>>,
    /// Registered name of a remote application exception.
    pub exception_type: Option<String>,
    /// Encoded state of a remote application exception.
    pub exception_payload: Option<Value>,
}

impl CallError {
    /// A protocol error for one of the fixed reasons.
    pub fn from_reason(reason: Reason) -> Self {
        Self {
            code: reason.code().value(),
            reason: reason.as_str().to_string(),
            messages: None,
            exception_type: None,
            exception_payload: None,
        }
    }

    /// A protocol error carrying per-parameter messages.
    pub fn with_messages(reason: Reason, messages: Vec<String>) -> Self {
        Self {
            messages: Some(messages),
            ..Self::from_reason(reason)
        }
    }

    /// Wrap a declared application exception.
    pub fn from_exception(exception: &RemoteException) -> Self {
        Self {
            code: ErrorCode::ServerError.value(),
            reason: exception.message().to_string(),
            messages: None,
            exception_type: Some(exception.exception_type().to_string()),
            exception_payload: Some(exception.payload().clone()),
        }
    }

    /// Whether this error carries a remote application exception.
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.exception_type.is_some()
    }

    /// Convert into the local error taxonomy.
    pub fn into_rpc_error(self) -> RpcError {
        match self.exception_type {
            Some(exception_type) => RpcError::Remote(RemoteException::new(
                exception_type,
                self.reason,
                self.exception_payload.unwrap_or(Value::Null),
            )),
            None => RpcError::Protocol {
                code: self.code,
                reason: self.reason,
                messages: self.messages.unwrap_or_default(),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireError {
    code: i32,
    message: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    data: Option<Value>,
    #[serde(
        rename = "exceptionType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    exception_type: Option<String>,
}

impl From<WireError> for CallError {
    fn from(wire: WireError) -> Self {
        if wire.exception_type.is_some() {
            return Self {
                code: wire.code,
                reason: wire.message,
                messages: None,
                exception_type: wire.exception_type,
                exception_payload: wire.data,
            };
        }

        let messages = wire
            .data
            .and_then(|data| serde_json::from_value::<Vec<String>>(data).ok());
        Self {
            code: wire.code,
            reason: wire.message,
            messages,
            exception_type: None,
            exception_payload: None,
        }
    }
}

impl From<CallError> for WireError {
    fn from(err: CallError) -> Self {
        let data = if err.is_exception() {
            err.exception_payload
        } else {
            err.messages
                .map(|m| Value::Array(m.into_iter().map(Value::String).collect()))
        };
        Self {
            code: err.code,
            message: err.reason,
            data,
            exception_type: err.exception_type,
        }
    }
}

/// A reply envelope. Well-formed responses carry exactly one of
/// `result`/`error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, deserialize_with = "id_text")]
    pub id: String,
    /// `Some(Value::Null)` when the wire carried `"result": null`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
}

impl CallResponse {
    /// A successful reply.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// A failed reply.
    pub fn failure(id: impl Into<String>, error: CallError) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Whether exactly one of `result`/`error` is present.
    #[inline]
    pub fn is_well_formed(&self) -> bool {
        self.result.is_some() != self.error.is_some()
    }
}

/// Best-effort extraction of the request id from a body that failed to
/// decode as a [`CallRequest`].
pub fn peek_request_id(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("id").and_then(id_from_value))
        .unwrap_or_default()
}
