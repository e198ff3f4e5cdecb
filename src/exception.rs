//! Application exceptions that cross the wire.
//!
//! A capability declares the [`ApplicationError`] types it may raise. When
//! one of them is returned, the server sends its registered name and encoded
//! state; the caller gets a [`RemoteException`] back and can turn it into the
//! same typed value with [`RemoteException::downcast`].
//!
//! # Example
//!
//! ```
//! use rmq_rpc::exception::{ApplicationError, Fault, RemoteException};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct QuotaExceeded {
//!     limit: u32,
//! }
//!
//! impl std::fmt::Display for QuotaExceeded {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "quota of {} exceeded", self.limit)
//!     }
//! }
//!
//! impl ApplicationError for QuotaExceeded {
//!     const NAME: &'static str = "QuotaExceeded";
//! }
//!
//! let fault: Fault = QuotaExceeded { limit: 3 }.into();
//! let Fault::Application(remote) = fault else { unreachable!() };
//! assert_eq!(remote.downcast::<QuotaExceeded>().unwrap(), QuotaExceeded { limit: 3 });
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, RpcError};

/// An error type a capability may raise across the wire.
pub trait ApplicationError:
    Serialize + DeserializeOwned + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Stable identity shared by server and client.
    const NAME: &'static str;
}

/// A remote application exception: type identity, message and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteException {
    exception_type: String,
    message: String,
    payload: Value,
}

impl RemoteException {
    pub fn new(
        exception_type: impl Into<String>,
        message: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
            payload,
        }
    }

    /// Capture a typed application error.
    pub fn from_error<E: ApplicationError>(error: &E) -> Result<Self> {
        Ok(Self::new(E::NAME, error.to_string(), serde_json::to_value(error)?))
    }

    #[inline]
    pub fn exception_type(&self) -> &str {
        &self.exception_type
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Whether this exception was raised as `E`.
    pub fn is<E: ApplicationError>(&self) -> bool {
        self.exception_type == E::NAME
    }

    /// Reconstruct the typed exception.
    ///
    /// Fails with [`RpcError::Client`] when the type identity does not match
    /// `E` or the payload does not decode as `E`.
    pub fn downcast<E: ApplicationError>(&self) -> Result<E> {
        if !self.is::<E>() {
            return Err(RpcError::Client(format!(
                "Could not find exception type: expected {}, got {}",
                E::NAME,
                self.exception_type
            )));
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            RpcError::Client(format!("Failed to rebuild exception {}: {}", E::NAME, e))
        })
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exception_type, self.message)
    }
}

impl std::error::Error for RemoteException {}

/// Failure returned by a capability handler.
#[derive(Debug)]
pub enum Fault {
    /// A declared application exception. Sent to the caller as typed data
    /// when the capability declares that type, otherwise treated as unknown.
    Application(RemoteException),
    /// Anything else. Logged server-side, never put on the wire.
    Internal(String),
}

impl Fault {
    /// An internal failure from anything displayable.
    pub fn internal(err: impl fmt::Display) -> Self {
        Fault::Internal(err.to_string())
    }
}

impl<E: ApplicationError> From<E> for Fault {
    fn from(error: E) -> Self {
        match RemoteException::from_error(&error) {
            Ok(remote) => Fault::Application(remote),
            Err(e) => Fault::Internal(format!("could not encode {}: {}", E::NAME, e)),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Application(remote) => write!(f, "{remote}"),
            Fault::Internal(detail) => write!(f, "internal: {detail}"),
        }
    }
}
