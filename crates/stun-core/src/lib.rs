//! STUN message model and wire codec (RFC 5389).
//!
//! This crate is the protocol layer shared by STUN clients and test servers:
//! typed messages and attributes plus strict binary encoding/decoding. It is
//! runtime-agnostic; transports and the transaction engine live in
//! `stun-client`.
//!
//! # Example
//!
//! ```
//! use stun_core::{codec, StunMessage};
//!
//! let request = StunMessage::binding_request();
//! let wire = codec::encode(&request);
//! let decoded = codec::decode(&wire).unwrap();
//! assert_eq!(decoded.transaction_id, request.transaction_id);
//! ```

pub mod attribute;
pub mod codec;
pub mod error;
pub mod message;

pub use attribute::{StunAttribute, StunAttributeType};
pub use error::{Error, Result};
pub use message::{StunMessage, StunMessageType, TransactionId, HEADER_SIZE, MAGIC_COOKIE};
