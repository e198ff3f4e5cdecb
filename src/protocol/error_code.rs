//! Protocol error classes and reasons.
//!
//! Codes classify the failure, reasons carry the fixed human readable text
//! that goes into the `message` field of the wire error object.

/// Protocol error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed envelope, wrong version, bad parameters.
    BadRequest,
    /// Unknown method.
    NotFound,
    /// Capability failed (application exceptions use this class too).
    ServerError,
}

impl ErrorCode {
    /// Numeric value sent on the wire.
    #[inline]
    pub const fn value(self) -> i32 {
        match self {
            ErrorCode::BadRequest => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::ServerError => 500,
        }
    }
}

/// Fixed failure reasons produced by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    NoSuchMethod,
    UnknownException,
    WrongRpcVersion,
    CouldNotParseRequest,
    CouldNotParseParams,
    InvalidParamCount,
    InvalidParamType,
}

impl Reason {
    /// Text sent as the error `message`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Reason::NoSuchMethod => "No such method",
            Reason::UnknownException => "Unknown error",
            Reason::WrongRpcVersion => "jsonrpc must be 2.0",
            Reason::CouldNotParseRequest => "Could not parse request",
            Reason::CouldNotParseParams => "Could not parse parameter",
            Reason::InvalidParamCount => "Invalid number of parameters",
            Reason::InvalidParamType => "Invalid parameter type",
        }
    }

    /// The error class a reason is always reported under.
    pub const fn code(self) -> ErrorCode {
        match self {
            Reason::NoSuchMethod => ErrorCode::NotFound,
            Reason::UnknownException => ErrorCode::ServerError,
            _ => ErrorCode::BadRequest,
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
