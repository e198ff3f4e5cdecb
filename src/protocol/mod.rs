//! Protocol module - wire envelopes and error classes.
//!
//! - [`CallRequest`] / [`CallResponse`] / [`CallError`] envelopes
//! - [`ErrorCode`] and [`Reason`] for protocol-level failures

mod envelope;
mod error_code;

pub use envelope::{peek_request_id, CallError, CallRequest, CallResponse, PROTOCOL_VERSION};
pub use error_code::{ErrorCode, Reason};
