//! Error types for STUN message encoding and decoding

use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while decoding wire data or reading attributes.
///
/// Every variant here means the offending datagram is unusable as a STUN
/// message. Callers on the receive path are expected to log and drop the
/// datagram rather than abort the transaction waiting on it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Buffer too small to hold a STUN header
    #[error("message truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    /// The two most significant header bits were not zero
    #[error("not a STUN message: nonzero leading bits in type 0x{0:04x}")]
    InvalidTypePrefix(u16),

    /// The magic cookie did not match RFC 5389
    #[error("invalid magic cookie 0x{0:08x}")]
    InvalidMagicCookie(u32),

    /// The declared message length disagrees with the buffer
    #[error("declared length {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// An attribute extended past the end of the message
    #[error("truncated attribute 0x{attr_type:04x}: need {needed} bytes")]
    TruncatedAttribute { attr_type: u16, needed: usize },

    /// An attribute value could not be interpreted
    #[error("invalid {name} attribute: {reason}")]
    InvalidAttribute { name: &'static str, reason: String },

    /// Address family byte other than IPv4 (1) or IPv6 (2)
    #[error("unsupported address family {0}")]
    UnsupportedAddressFamily(u8),

    /// Requested attribute is absent from the message
    #[error("message has no {0} attribute")]
    MissingAttribute(&'static str),
}

impl Error {
    /// Create an invalid-attribute error
    pub fn invalid_attribute(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name,
            reason: reason.into(),
        }
    }
}
