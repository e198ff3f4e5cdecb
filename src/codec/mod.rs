//! Codec module - serialization of envelopes and opaque values.
//!
//! [`JsonCodec`] is a marker struct with static methods, the same shape for
//! envelopes (bytes on the wire) and for the opaque values inside them
//! (parameters, results, exception payloads).
//!
//! # Example
//!
//! ```
//! use rmq_rpc::codec::JsonCodec;
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let params = JsonCodec::encode_params(&("a", 2)).unwrap();
//! assert_eq!(params.len(), 2);
//! ```

mod json;

pub use json::{JsonCodec, UNIT_RESULT};
